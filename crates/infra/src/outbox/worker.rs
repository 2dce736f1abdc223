//! Outbox worker: drains staged entries into the event bus.
//!
//! Single consumer per shard. Entries are published strictly in claim order,
//! so one stream's events reach the bus in version order.

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tracing::{debug, error, info, warn};

use flowra_events::EventBus;

use crate::workers::WorkerHandle;

use super::r#trait::{Outbox, OutboxError};

#[derive(Debug, Clone)]
pub struct OutboxWorkerConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    /// Publish attempts per entry before it is held in `failed`.
    pub max_retries: u32,
    /// Completed entries older than this are deleted by the periodic sweep.
    pub cleanup_after: Duration,
    /// Run the cleanup sweep every N poll cycles.
    pub cleanup_every_cycles: u32,
}

impl Default for OutboxWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 100,
            max_retries: 5,
            cleanup_after: Duration::from_secs(24 * 60 * 60),
            cleanup_every_cycles: 60,
        }
    }
}

/// Drives `Outbox -> EventBus`, at-least-once.
pub struct OutboxWorker<O, B> {
    outbox: O,
    bus: B,
    config: OutboxWorkerConfig,
}

impl<O, B> OutboxWorker<O, B>
where
    O: Outbox + Send + Sync + 'static,
    B: EventBus + Send + Sync + 'static,
{
    pub fn new(outbox: O, bus: B, config: OutboxWorkerConfig) -> Self {
        Self { outbox, bus, config }
    }

    /// Spawn the worker loop; returns a handle for graceful shutdown.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = WorkerHandle::channel();

        let join = tokio::spawn(async move {
            info!(
                poll_interval_ms = self.config.poll_interval.as_millis() as u64,
                batch_size = self.config.batch_size,
                max_retries = self.config.max_retries,
                "outbox worker started"
            );

            let mut cycles: u32 = 0;
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                match self.process_batch().await {
                    Ok(0) => debug!("outbox drained"),
                    Ok(published) => debug!(published, "outbox batch published"),
                    Err(err) => error!(error = %err, "outbox poll failed"),
                }

                cycles = cycles.wrapping_add(1);
                if cycles % self.config.cleanup_every_cycles == 0 {
                    let older_than = ChronoDuration::from_std(self.config.cleanup_after)
                        .unwrap_or_else(|_| ChronoDuration::hours(24));
                    match self.outbox.cleanup(older_than).await {
                        Ok(0) => {}
                        Ok(removed) => debug!(removed, "outbox cleanup"),
                        Err(err) => warn!(error = %err, "outbox cleanup failed"),
                    }
                }

                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }

            info!("outbox worker stopped");
        });

        WorkerHandle::new(shutdown_tx, join)
    }

    /// Claim one batch and publish it in order. Returns the publish count.
    pub async fn process_batch(&self) -> Result<usize, OutboxError> {
        let entries = self.outbox.poll(self.config.batch_size).await?;
        let mut published = 0usize;

        for entry in entries {
            let topic = entry.envelope.topic();
            match self.bus.publish(&topic, entry.envelope.clone()).await {
                Ok(()) => {
                    if let Err(err) = self.outbox.mark_completed(entry.entry_id).await {
                        // The event reached the bus but the bookkeeping
                        // failed; the entry will be redelivered, which
                        // idempotent subscribers absorb.
                        error!(
                            entry_id = %entry.entry_id,
                            error = %err,
                            "published but failed to mark completed"
                        );
                    } else {
                        published += 1;
                    }
                }
                Err(err) => {
                    warn!(
                        entry_id = %entry.entry_id,
                        event_id = %entry.envelope.event_id(),
                        topic = %topic,
                        retry_count = entry.retry_count,
                        error = %err,
                        "publish failed"
                    );
                    let message = err.to_string();
                    let result = if entry.retry_count >= self.config.max_retries {
                        self.outbox.mark_exhausted(entry.entry_id, &message).await
                    } else {
                        self.outbox.mark_failed(entry.entry_id, &message).await
                    };
                    if let Err(mark_err) = result {
                        error!(
                            entry_id = %entry.entry_id,
                            error = %mark_err,
                            "failed to record publish failure"
                        );
                    }
                }
            }
        }

        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::{EventStore, InMemoryEventStore, UncommittedEvent};
    use async_trait::async_trait;
    use chrono::Utc;
    use flowra_core::{AggregateId, ExpectedVersion};
    use flowra_events::{
        AggregateType, BusError, EventEnvelope, EventMetadata, EventSubscription, InMemoryEventBus,
    };
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    fn uncommitted(aggregate_id: AggregateId) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type: AggregateType::Task,
            event_type: "task.created".to_string(),
            occurred_at: Utc::now(),
            payload: serde_json::json!({}),
            metadata: EventMetadata::default(),
        }
    }

    fn worker_config() -> OutboxWorkerConfig {
        OutboxWorkerConfig {
            poll_interval: Duration::from_millis(10),
            batch_size: 100,
            max_retries: 2,
            cleanup_after: Duration::from_secs(3600),
            cleanup_every_cycles: 1000,
        }
    }

    #[tokio::test]
    async fn drains_appended_events_to_the_bus_in_version_order() {
        let store = InMemoryEventStore::new();
        let outbox = store.outbox();
        let bus = Arc::new(InMemoryEventBus::new());
        let mut sub = bus.subscribe("task.*");

        let id = AggregateId::new();
        store
            .append_events(
                id,
                vec![uncommitted(id), uncommitted(id), uncommitted(id)],
                ExpectedVersion::NoStream,
            )
            .await
            .unwrap();

        let worker = OutboxWorker::new(outbox.clone(), bus.clone(), worker_config());
        let published = worker.process_batch().await.unwrap();
        assert_eq!(published, 3);

        use crate::outbox::Outbox as _;
        assert_eq!(outbox.count().await.unwrap(), 0);

        for expected_version in 1..=3u64 {
            let envelope = sub.recv().await.unwrap();
            assert_eq!(envelope.version(), expected_version);
        }
    }

    struct FailingBus {
        failures_left: AtomicU32,
        inner: InMemoryEventBus,
    }

    #[async_trait]
    impl flowra_events::EventBus for FailingBus {
        async fn publish(&self, topic: &str, envelope: EventEnvelope) -> Result<(), BusError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(BusError::Publish("transport down".to_string()));
            }
            self.inner.publish(topic, envelope).await
        }

        fn subscribe(&self, pattern: &str) -> EventSubscription {
            self.inner.subscribe(pattern)
        }
    }

    #[tokio::test]
    async fn failed_publishes_are_retried_on_the_next_batch() {
        let store = InMemoryEventStore::new();
        let outbox = store.outbox().with_visibility_timeout(Duration::from_secs(0));
        let bus = Arc::new(FailingBus {
            failures_left: AtomicU32::new(1),
            inner: InMemoryEventBus::new(),
        });

        let id = AggregateId::new();
        store
            .append_events(id, vec![uncommitted(id)], ExpectedVersion::NoStream)
            .await
            .unwrap();

        let worker = OutboxWorker::new(outbox.clone(), bus.clone(), worker_config());
        assert_eq!(worker.process_batch().await.unwrap(), 0);
        assert_eq!(worker.process_batch().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn exhausted_entries_are_held_in_failed() {
        let store = InMemoryEventStore::new();
        let outbox = store.outbox().with_visibility_timeout(Duration::from_secs(0));
        let bus = Arc::new(FailingBus {
            failures_left: AtomicU32::new(u32::MAX),
            inner: InMemoryEventBus::new(),
        });

        let id = AggregateId::new();
        store
            .append_events(id, vec![uncommitted(id)], ExpectedVersion::NoStream)
            .await
            .unwrap();

        let worker = OutboxWorker::new(outbox.clone(), bus.clone(), worker_config());
        // attempt 1 and 2 fail and requeue; the entry reaches max_retries on
        // the second claim, so the third poll finds nothing deliverable.
        worker.process_batch().await.unwrap();
        worker.process_batch().await.unwrap();
        assert_eq!(worker.process_batch().await.unwrap(), 0);

        use crate::outbox::Outbox as _;
        assert_eq!(outbox.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn spawned_worker_shuts_down_cleanly() {
        let store = InMemoryEventStore::new();
        let bus = Arc::new(InMemoryEventBus::new());
        let worker = OutboxWorker::new(store.outbox(), bus, worker_config());
        let handle = worker.spawn();
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.shutdown().await;
    }
}
