use crate::envelope::EventEnvelope;

/// A pure fold from an event stream to a read-model value.
///
/// Read models are disposable; events are the source of truth. Rebuilds
/// replay a full stream through an implementation of this trait; the
/// incremental projectors in the infrastructure layer reuse the same fold
/// so both paths produce identical rows.
pub trait Projection: Default {
    /// Apply one envelope (in version order). Unknown event types are
    /// ignored so legacy consumers keep working.
    fn apply(&mut self, envelope: &EventEnvelope);

    /// Replay a whole stream from scratch.
    fn replay<'a>(envelopes: impl IntoIterator<Item = &'a EventEnvelope>) -> Self {
        let mut projection = Self::default();
        for envelope in envelopes {
            projection.apply(envelope);
        }
        projection
    }
}
