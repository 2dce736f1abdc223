use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use uuid::Uuid;

use flowra_core::{AggregateId, ExpectedVersion};
use flowra_events::EventEnvelope;

use crate::outbox::r#trait::OutboxEntry;

use super::r#trait::{EventStore, EventStoreError, UncommittedEvent, validate_batch};

/// Shared journal backing the in-memory store and its collocated outbox.
///
/// A single lock spans both tables so an append and its outbox staging are
/// one atomic step, mirroring the single transaction of the postgres
/// backend.
#[derive(Debug, Default)]
pub(crate) struct Journal {
    pub(crate) streams: HashMap<AggregateId, Vec<EventEnvelope>>,
    pub(crate) event_ids: HashSet<Uuid>,
    pub(crate) outbox: Vec<OutboxEntry>,
}

/// In-memory append-only event store.
///
/// Intended for tests/dev and `mock` mode. Not optimized for performance.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    pub(crate) journal: Arc<RwLock<Journal>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The outbox view over the same journal.
    pub fn outbox(&self) -> crate::outbox::InMemoryOutbox {
        crate::outbox::InMemoryOutbox::over(self.journal.clone())
    }

    fn current_version(stream: &[EventEnvelope]) -> u64 {
        stream.last().map(|e| e.version()).unwrap_or(0)
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn load_events(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let journal = self
            .journal
            .read()
            .map_err(|_| EventStoreError::StorageUnavailable("journal lock poisoned".to_string()))?;

        Ok(journal.streams.get(&aggregate_id).cloned().unwrap_or_default())
    }

    async fn load_events_after(
        &self,
        aggregate_id: AggregateId,
        after_version: u64,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let journal = self
            .journal
            .read()
            .map_err(|_| EventStoreError::StorageUnavailable("journal lock poisoned".to_string()))?;

        Ok(journal
            .streams
            .get(&aggregate_id)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|e| e.version() > after_version)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn append_events(
        &self,
        aggregate_id: AggregateId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }
        validate_batch(aggregate_id, &events)?;

        let mut journal = self
            .journal
            .write()
            .map_err(|_| EventStoreError::StorageUnavailable("journal lock poisoned".to_string()))?;

        // Duplicate event ids refuse the whole batch before any mutation.
        for e in &events {
            if journal.event_ids.contains(&e.event_id) {
                return Err(EventStoreError::DuplicateEventId(e.event_id));
            }
        }

        let current = Self::current_version(
            journal
                .streams
                .get(&aggregate_id)
                .map(|s| s.as_slice())
                .unwrap_or(&[]),
        );
        if !expected_version.matches(current) {
            return Err(EventStoreError::ConcurrencyConflict {
                expected: expected_version,
                found: current,
            });
        }

        // Assign contiguous versions and stage outbox entries in the same
        // lock scope: either all of it lands or none of it does.
        let mut committed = Vec::with_capacity(events.len());
        let mut next = current + 1;
        for e in events {
            let event_id = e.event_id;
            let envelope = e.into_envelope(next);
            next += 1;

            journal.event_ids.insert(event_id);
            journal.outbox.push(OutboxEntry::staged(envelope.clone()));
            journal
                .streams
                .entry(aggregate_id)
                .or_default()
                .push(envelope.clone());
            committed.push(envelope);
        }

        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flowra_events::{AggregateType, EventMetadata};
    use serde_json::json;

    fn uncommitted(aggregate_id: AggregateId, event_type: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type: AggregateType::Task,
            event_type: event_type.to_string(),
            occurred_at: Utc::now(),
            payload: json!({}),
            metadata: EventMetadata::default(),
        }
    }

    #[tokio::test]
    async fn append_assigns_contiguous_versions() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let first = store
            .append_events(id, vec![uncommitted(id, "task.created")], ExpectedVersion::NoStream)
            .await
            .unwrap();
        assert_eq!(first[0].version(), 1);

        let batch = vec![
            uncommitted(id, "task.status_changed"),
            uncommitted(id, "task.assigned"),
        ];
        let committed = store
            .append_events(id, batch, ExpectedVersion::Exact(1))
            .await
            .unwrap();
        let versions: Vec<u64> = committed.iter().map(|e| e.version()).collect();
        assert_eq!(versions, vec![2, 3]);

        let stream = store.load_events(id).await.unwrap();
        let all: Vec<u64> = stream.iter().map(|e| e.version()).collect();
        assert_eq!(all, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn wrong_expectation_is_a_concurrency_conflict() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        store
            .append_events(id, vec![uncommitted(id, "task.created")], ExpectedVersion::NoStream)
            .await
            .unwrap();

        let err = store
            .append_events(id, vec![uncommitted(id, "task.assigned")], ExpectedVersion::Exact(0))
            .await
            .unwrap_err();
        assert!(matches!(err, EventStoreError::ConcurrencyConflict { found: 1, .. }));
    }

    #[tokio::test]
    async fn replayed_event_id_is_rejected() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        let event = uncommitted(id, "task.created");
        let event_id = event.event_id;

        store
            .append_events(id, vec![event.clone()], ExpectedVersion::NoStream)
            .await
            .unwrap();

        let err = store
            .append_events(id, vec![event], ExpectedVersion::Exact(1))
            .await
            .unwrap_err();
        assert!(matches!(err, EventStoreError::DuplicateEventId(found) if found == event_id));
    }

    #[tokio::test]
    async fn unknown_stream_loads_empty_but_strict_load_fails() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        assert!(store.load_events(id).await.unwrap().is_empty());
        assert!(matches!(
            store.load_events_strict(id).await.unwrap_err(),
            EventStoreError::StreamNotFound(found) if found == id
        ));
    }

    #[tokio::test]
    async fn load_after_returns_the_tail() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        for (i, expected) in [(0u64, ExpectedVersion::NoStream), (1, ExpectedVersion::Exact(1)), (2, ExpectedVersion::Exact(2))] {
            let _ = i;
            store
                .append_events(id, vec![uncommitted(id, "task.title_updated")], expected)
                .await
                .unwrap();
        }

        let tail = store.load_events_after(id, 1).await.unwrap();
        let versions: Vec<u64> = tail.iter().map(|e| e.version()).collect();
        assert_eq!(versions, vec![2, 3]);
    }

    #[tokio::test]
    async fn every_appended_event_has_exactly_one_outbox_entry() {
        let store = InMemoryEventStore::new();
        let outbox = store.outbox();
        let id = AggregateId::new();

        let committed = store
            .append_events(
                id,
                vec![uncommitted(id, "task.created"), uncommitted(id, "task.assigned")],
                ExpectedVersion::NoStream,
            )
            .await
            .unwrap();

        use crate::outbox::Outbox as _;
        let entries = outbox.poll(10).await.unwrap();
        assert_eq!(entries.len(), committed.len());
        for (entry, envelope) in entries.iter().zip(&committed) {
            assert_eq!(&entry.envelope, envelope);
        }
    }
}
