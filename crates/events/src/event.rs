use chrono::{DateTime, Utc};

/// A domain event: a fact that happened, immutable and append-only.
///
/// Events must be:
/// - **Serializable**: stored and transported as JSON payloads
/// - **Cloneable**: copied when rehydrating aggregates and projections
/// - **Send + Sync + 'static**: they cross task boundaries (bus, projectors)
pub trait DomainEvent: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name, namespaced by aggregate (e.g. "task.status_changed").
    ///
    /// Used for bus topic routing, projector dispatch, and observability.
    /// Never change it: historical payloads are decoded by this tag.
    fn event_type(&self) -> &'static str;

    /// When the event occurred (business time, UTC).
    fn occurred_at(&self) -> DateTime<Utc>;
}
