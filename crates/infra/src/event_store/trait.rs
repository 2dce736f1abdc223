use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use flowra_core::{AggregateId, ExpectedVersion};
use flowra_events::{AggregateType, DomainEvent, EventEnvelope, EventMetadata};

use std::sync::Arc;

/// An event ready to be appended to a stream (not yet assigned a version).
///
/// Domain modules build this from their typed events using serde, preserving
/// the metadata needed for later deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: AggregateType,

    pub event_type: String,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
    pub metadata: EventMetadata,
}

impl UncommittedEvent {
    /// Convenience constructor from a typed domain event.
    ///
    /// Keeps infra decoupled from the domain crates while still capturing
    /// the event metadata needed for deserialization and routing.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: AggregateType,
        event_id: Uuid,
        event: &E,
        metadata: EventMetadata,
    ) -> Result<Self, EventStoreError>
    where
        E: DomainEvent + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            aggregate_id,
            aggregate_type,
            event_type: event.event_type().to_string(),
            occurred_at: event.occurred_at(),
            payload,
            metadata,
        })
    }

    /// Commit this event at the given stream version.
    pub fn into_envelope(self, version: u64) -> EventEnvelope {
        EventEnvelope::new(
            self.event_id,
            self.aggregate_id,
            self.aggregate_type,
            self.event_type,
            version,
            self.occurred_at,
            self.payload,
            self.metadata,
        )
    }
}

#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The expected tail version did not match the stream.
    #[error("concurrency conflict: expected version {expected:?}, found {found}")]
    ConcurrencyConflict {
        expected: ExpectedVersion,
        found: u64,
    },

    /// An event with this id is already in the store (retry after partial).
    #[error("duplicate event id: {0}")]
    DuplicateEventId(Uuid),

    /// The caller asked for the strict distinction and the stream is empty.
    #[error("stream not found: {0}")]
    StreamNotFound(AggregateId),

    /// Malformed append (cross-stream batch, serialization failure, ...).
    #[error("invalid append: {0}")]
    InvalidAppend(String),

    /// The backend is unreachable or failed mid-operation.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

/// Append-only event store with per-stream optimistic locking.
///
/// Implementations must:
/// - keep versions contiguous: an append at tail `N` assigns
///   `[N+1, N+len]`
/// - never rewrite or delete committed events
/// - stage one outbox entry per appended event within the same transaction
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Load the full stream, version ascending. Empty vec for unknown ids.
    async fn load_events(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>, EventStoreError>;

    /// Incremental tail: events with `version > after_version`.
    async fn load_events_after(
        &self,
        aggregate_id: AggregateId,
        after_version: u64,
    ) -> Result<Vec<EventEnvelope>, EventStoreError>;

    /// Append events iff the stream tail matches `expected_version`.
    async fn append_events(
        &self,
        aggregate_id: AggregateId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<EventEnvelope>, EventStoreError>;

    /// Like [`EventStore::load_events`] but fails on unknown streams.
    async fn load_events_strict(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let events = self.load_events(aggregate_id).await?;
        if events.is_empty() {
            return Err(EventStoreError::StreamNotFound(aggregate_id));
        }
        Ok(events)
    }
}

#[async_trait]
impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    async fn load_events(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        (**self).load_events(aggregate_id).await
    }

    async fn load_events_after(
        &self,
        aggregate_id: AggregateId,
        after_version: u64,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        (**self).load_events_after(aggregate_id, after_version).await
    }

    async fn append_events(
        &self,
        aggregate_id: AggregateId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        (**self).append_events(aggregate_id, events, expected_version).await
    }
}

/// Reject batches that mix streams or aggregate types.
pub(crate) fn validate_batch(
    aggregate_id: AggregateId,
    events: &[UncommittedEvent],
) -> Result<(), EventStoreError> {
    let Some(first) = events.first() else {
        return Ok(());
    };
    let aggregate_type = &first.aggregate_type;

    for (idx, e) in events.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch contains a foreign aggregate_id (index {idx})"
            )));
        }
        if &e.aggregate_type != aggregate_type {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch contains multiple aggregate_types (index {idx})"
            )));
        }
    }
    Ok(())
}
