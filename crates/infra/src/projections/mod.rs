//! Incremental projectors: event stream → read-model rows.
//!
//! Each projector consumes one aggregate type from the bus and maintains a
//! row per aggregate. Writes are guarded by `stored.version <
//! event.version`, so at-least-once delivery and reordering cannot regress
//! a row. A version gap means a delivery was lost: the projector enqueues a
//! repair task and lets the rebuild path catch the row up from the store.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use flowra_core::AggregateId;
use flowra_events::{
    AggregateType, EventEnvelope, EventHandler, HandlerError, Projection,
};

use crate::event_store::{EventStore, EventStoreError};
use crate::read_model::{ReadModelError, ReadModelRow, ReadModelStore};
use crate::repair::{RepairError, RepairQueue, RepairTask};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    ReadModel(#[from] ReadModelError),

    #[error(transparent)]
    Repair(#[from] RepairError),
}

/// A read-model maintainer for one aggregate type.
#[async_trait]
pub trait Projector: Send + Sync {
    fn aggregate_type(&self) -> AggregateType;

    /// Apply one envelope incrementally (idempotent, order-tolerant).
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), ProjectionError>;

    /// Rebuild one aggregate's row from its full stream. Idempotent.
    async fn rebuild_one(&self, aggregate_id: AggregateId) -> Result<(), ProjectionError>;
}

/// Generic projector over any row that knows how to fold events.
pub struct ReadModelProjector<R: ReadModelRow> {
    aggregate_type: AggregateType,
    store: Arc<dyn EventStore>,
    rows: Arc<dyn ReadModelStore<R>>,
    repair: Arc<dyn RepairQueue>,
}

/// Maintains the task-board rows from `task.*` events.
pub type TaskBoardProjector = ReadModelProjector<crate::read_model::TaskBoardRow>;

/// Maintains the chat-list rows from `chat.*` events.
pub type ChatListProjector = ReadModelProjector<crate::read_model::ChatListRow>;

impl<R> ReadModelProjector<R>
where
    R: ReadModelRow + Projection,
{
    pub fn new(
        aggregate_type: AggregateType,
        store: Arc<dyn EventStore>,
        rows: Arc<dyn ReadModelStore<R>>,
        repair: Arc<dyn RepairQueue>,
    ) -> Self {
        Self {
            aggregate_type,
            store,
            rows,
            repair,
        }
    }

    async fn request_rebuild(&self, aggregate_id: AggregateId) -> Result<(), ProjectionError> {
        let task = RepairTask::readmodel_sync(aggregate_id, self.aggregate_type.clone());
        self.repair.enqueue(task).await?;
        Ok(())
    }
}

#[async_trait]
impl<R> Projector for ReadModelProjector<R>
where
    R: ReadModelRow + Projection,
{
    fn aggregate_type(&self) -> AggregateType {
        self.aggregate_type.clone()
    }

    #[instrument(
        skip(self, envelope),
        fields(
            aggregate_id = %envelope.aggregate_id(),
            event_type = envelope.event_type(),
            version = envelope.version()
        ),
        err
    )]
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != &self.aggregate_type {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let stored = self.rows.get(aggregate_id).await?;
        let stored_version = stored.as_ref().map(|r| r.row_version()).unwrap_or(0);

        if envelope.version() <= stored_version {
            // Duplicate delivery or stale reordering; the guard makes this
            // a no-op.
            debug!(stored_version, "skipping already-applied event");
            return Ok(());
        }

        if envelope.version() > stored_version + 1 {
            warn!(
                stored_version,
                event_version = envelope.version(),
                "version gap detected; requesting rebuild"
            );
            self.request_rebuild(aggregate_id).await?;
            return Ok(());
        }

        let mut row = stored.unwrap_or_default();
        row.apply(envelope);
        match self.rows.upsert_if_newer(row).await {
            Ok(true) => {}
            Ok(false) => {
                // A concurrent writer got there first with the same or
                // newer version; per-row monotonicity still holds.
                debug!("conditional upsert lost the race");
            }
            Err(err) => {
                // Leave a recovery breadcrumb before surfacing: the rebuild
                // path will catch the row up once storage recovers.
                self.request_rebuild(aggregate_id).await?;
                return Err(err.into());
            }
        }
        Ok(())
    }

    #[instrument(skip(self), fields(aggregate_id = %aggregate_id), err)]
    async fn rebuild_one(&self, aggregate_id: AggregateId) -> Result<(), ProjectionError> {
        let stream = self.store.load_events(aggregate_id).await?;
        if stream.is_empty() {
            // No history: the idempotent rebuild of a void stream clears
            // whatever partial row may exist.
            self.rows.delete(aggregate_id).await?;
            return Ok(());
        }

        let row = R::replay(stream.iter());
        self.rows.put(row).await?;
        Ok(())
    }
}

/// Bus adapter: lets a projector run under the generic subscriber runner.
///
/// The projector itself leaves a repair breadcrumb on every failing path;
/// this adapter only translates the error for the redelivery policy.
pub struct ProjectorHandler<P> {
    name: &'static str,
    projector: Arc<P>,
}

impl<P> ProjectorHandler<P> {
    pub fn new(name: &'static str, projector: Arc<P>) -> Self {
        Self { name, projector }
    }
}

#[async_trait]
impl<P> EventHandler for ProjectorHandler<P>
where
    P: Projector + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        self.projector.handle(envelope).await.map_err(|err| {
            warn!(
                projector = self.name,
                aggregate_id = %envelope.aggregate_id(),
                error = %err,
                "projection failed"
            );
            HandlerError::retryable(err.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::{InMemoryEventStore, UncommittedEvent};
    use crate::read_model::{InMemoryReadModelStore, TaskBoardRow};
    use crate::repair::InMemoryRepairQueue;
    use chrono::Utc;
    use flowra_core::{ChatId, ExpectedVersion, TaskId, UserId};
    use flowra_core::Aggregate;
    use flowra_events::EventMetadata;
    use flowra_tasks::{ChangeStatus, CreateTask, Task, TaskCommand, TaskStatus};
    use uuid::Uuid;

    struct Fixture {
        store: Arc<InMemoryEventStore>,
        rows: Arc<InMemoryReadModelStore<TaskBoardRow>>,
        repair: Arc<InMemoryRepairQueue>,
        projector: TaskBoardProjector,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryEventStore::new());
        let rows = Arc::new(InMemoryReadModelStore::new());
        let repair = Arc::new(InMemoryRepairQueue::new());
        let projector = TaskBoardProjector::new(
            AggregateType::Task,
            store.clone(),
            rows.clone(),
            repair.clone(),
        );
        Fixture {
            store,
            rows,
            repair,
            projector,
        }
    }

    /// Drive a task through commands and append the events, returning the
    /// committed envelopes.
    async fn seed_task(store: &InMemoryEventStore, task_id: TaskId) -> Vec<EventEnvelope> {
        let mut task = Task::empty(task_id);
        let mut committed = Vec::new();

        let commands = vec![
            TaskCommand::Create(CreateTask {
                task_id,
                chat_id: ChatId::new(),
                title: "Projector fodder".to_string(),
                entity_type: None,
                priority: None,
                assignee_id: None,
                due_date: None,
                created_by: UserId::new(),
                occurred_at: Utc::now(),
            }),
            TaskCommand::ChangeStatus(ChangeStatus {
                task_id,
                status: TaskStatus::InProgress,
                occurred_at: Utc::now(),
            }),
            TaskCommand::ChangeStatus(ChangeStatus {
                task_id,
                status: TaskStatus::Done,
                occurred_at: Utc::now(),
            }),
        ];

        let mut appended = 0u64;
        for command in commands {
            let effect = task.handle(&command).unwrap();
            let mut batch = Vec::new();
            for event in effect.events() {
                batch.push(
                    UncommittedEvent::from_typed(
                        task_id.into(),
                        AggregateType::Task,
                        Uuid::now_v7(),
                        event,
                        EventMetadata::default(),
                    )
                    .unwrap(),
                );
                task.apply(event);
            }
            let expected = if appended == 0 {
                ExpectedVersion::NoStream
            } else {
                ExpectedVersion::Exact(appended)
            };
            appended += batch.len() as u64;
            committed.extend(
                store
                    .append_events(task_id.into(), batch, expected)
                    .await
                    .unwrap(),
            );
        }
        committed
    }

    #[tokio::test]
    async fn incremental_apply_tracks_the_stream() {
        let f = fixture();
        let task_id = TaskId::new();
        let envelopes = seed_task(&f.store, task_id).await;

        for envelope in &envelopes {
            f.projector.handle(envelope).await.unwrap();
        }

        let row = f.rows.get(task_id.into()).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Done);
        assert_eq!(row.version, 3);
    }

    #[tokio::test]
    async fn double_delivery_leaves_the_row_identical() {
        let f = fixture();
        let task_id = TaskId::new();
        let envelopes = seed_task(&f.store, task_id).await;

        for envelope in &envelopes {
            f.projector.handle(envelope).await.unwrap();
        }
        let first_pass = f.rows.get(task_id.into()).await.unwrap().unwrap();

        for envelope in &envelopes {
            f.projector.handle(envelope).await.unwrap();
        }
        let second_pass = f.rows.get(task_id.into()).await.unwrap().unwrap();

        assert_eq!(first_pass, second_pass);
    }

    #[tokio::test]
    async fn version_gap_enqueues_repair_instead_of_applying() {
        let f = fixture();
        let task_id = TaskId::new();
        let envelopes = seed_task(&f.store, task_id).await;

        // Deliver version 1, skip version 2, deliver version 3.
        f.projector.handle(&envelopes[0]).await.unwrap();
        f.projector.handle(&envelopes[2]).await.unwrap();

        let row = f.rows.get(task_id.into()).await.unwrap().unwrap();
        assert_eq!(row.version, 1, "gapped event must not be applied");
        assert_eq!(f.repair.stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn rebuild_matches_incremental_result() {
        let f = fixture();
        let task_id = TaskId::new();
        let envelopes = seed_task(&f.store, task_id).await;

        for envelope in &envelopes {
            f.projector.handle(envelope).await.unwrap();
        }
        let incremental = f.rows.get(task_id.into()).await.unwrap().unwrap();

        f.rows.delete(task_id.into()).await.unwrap();
        f.projector.rebuild_one(task_id.into()).await.unwrap();
        let rebuilt = f.rows.get(task_id.into()).await.unwrap().unwrap();

        assert_eq!(incremental, rebuilt);

        // Rebuilding again is a no-op by content.
        f.projector.rebuild_one(task_id.into()).await.unwrap();
        assert_eq!(f.rows.get(task_id.into()).await.unwrap().unwrap(), rebuilt);
    }

    #[tokio::test]
    async fn rebuild_of_a_void_stream_clears_the_row() {
        let f = fixture();
        let task_id = TaskId::new();

        f.rows
            .put(TaskBoardRow {
                id: task_id,
                version: 9,
                ..TaskBoardRow::default()
            })
            .await
            .unwrap();

        f.projector.rebuild_one(task_id.into()).await.unwrap();
        assert!(f.rows.get(task_id.into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn foreign_aggregate_types_are_ignored() {
        let f = fixture();
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            flowra_core::AggregateId::new(),
            AggregateType::Chat,
            "chat.created",
            1,
            Utc::now(),
            serde_json::json!({}),
            EventMetadata::default(),
        );
        f.projector.handle(&envelope).await.unwrap();
        assert_eq!(f.repair.stats().await.unwrap().total, 0);
    }

    #[test]
    fn projector_is_registered_for_its_aggregate_type() {
        let f = fixture();
        assert_eq!(f.projector.aggregate_type(), AggregateType::Task);
    }
}
