//! Repair worker: drains the repair queue into projector rebuilds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use flowra_events::AggregateType;

use crate::projections::Projector;
use crate::workers::WorkerHandle;

use super::{RepairError, RepairQueue, RepairTask};

#[derive(Debug, Clone)]
pub struct RepairWorkerConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    /// Rebuild attempts per task before it is held in `failed`.
    pub max_retries: u32,
}

impl Default for RepairWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            batch_size: 10,
            max_retries: 3,
        }
    }
}

/// Polls the repair queue and dispatches rebuilds by aggregate type.
pub struct RepairWorker<Q> {
    queue: Q,
    projectors: HashMap<AggregateType, Arc<dyn Projector>>,
    config: RepairWorkerConfig,
}

impl<Q> RepairWorker<Q>
where
    Q: RepairQueue + Send + Sync + 'static,
{
    pub fn new(queue: Q, config: RepairWorkerConfig) -> Self {
        Self {
            queue,
            projectors: HashMap::new(),
            config,
        }
    }

    /// Register the projector responsible for one aggregate type.
    pub fn register(mut self, projector: Arc<dyn Projector>) -> Self {
        self.projectors.insert(projector.aggregate_type(), projector);
        self
    }

    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = WorkerHandle::channel();

        let join = tokio::spawn(async move {
            info!(
                poll_interval_ms = self.config.poll_interval.as_millis() as u64,
                batch_size = self.config.batch_size,
                max_retries = self.config.max_retries,
                "repair worker started"
            );

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                match self.process_batch().await {
                    Ok(0) => debug!("repair queue drained"),
                    Ok(repaired) => info!(repaired, "repair batch done"),
                    Err(err) => error!(error = %err, "repair poll failed"),
                }

                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }

            info!("repair worker stopped");
        });

        WorkerHandle::new(shutdown_tx, join)
    }

    /// Claim one batch and run the rebuilds. Returns the completed count.
    pub async fn process_batch(&self) -> Result<usize, RepairError> {
        let tasks = self.queue.poll(self.config.batch_size).await?;
        let mut completed = 0usize;

        for task in tasks {
            match self.run_task(&task).await {
                Ok(()) => {
                    self.queue.mark_completed(task.task_id).await?;
                    completed += 1;
                }
                Err(err) => {
                    warn!(
                        task_id = %task.task_id,
                        aggregate_id = %task.aggregate_id,
                        retry_count = task.retry_count,
                        error = %err,
                        "rebuild failed"
                    );
                    if task.retry_count >= self.config.max_retries {
                        self.queue.mark_failed(task.task_id).await?;
                    } else {
                        self.queue.release(task.task_id).await?;
                    }
                }
            }
        }

        Ok(completed)
    }

    async fn run_task(&self, task: &RepairTask) -> Result<(), String> {
        let projector = self
            .projectors
            .get(&task.aggregate_type)
            .ok_or_else(|| format!("no projector registered for '{}'", task.aggregate_type))?;

        projector
            .rebuild_one(task.aggregate_id)
            .await
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::{EventStore, InMemoryEventStore, UncommittedEvent};
    use crate::projections::TaskBoardProjector;
    use crate::read_model::{InMemoryReadModelStore, ReadModelStore, TaskBoardRow};
    use crate::repair::{InMemoryRepairQueue, RepairStatus};
    use chrono::Utc;
    use flowra_core::{AggregateId, ExpectedVersion};
    use flowra_events::EventMetadata;
    use serde_json::json;
    use uuid::Uuid;

    fn config() -> RepairWorkerConfig {
        RepairWorkerConfig {
            poll_interval: Duration::from_millis(10),
            batch_size: 10,
            max_retries: 2,
        }
    }

    async fn seed_minimal_task(store: &InMemoryEventStore, id: AggregateId) {
        let event = UncommittedEvent {
            event_id: Uuid::now_v7(),
            aggregate_id: id,
            aggregate_type: AggregateType::Task,
            event_type: "task.created".to_string(),
            occurred_at: Utc::now(),
            payload: json!({
                "Created": {
                    "task_id": id.as_uuid(),
                    "chat_id": Uuid::now_v7(),
                    "title": "Repaired",
                    "entity_type": "task",
                    "status": "to_do",
                    "priority": "medium",
                    "assignee_id": null,
                    "due_date": null,
                    "created_by": Uuid::now_v7(),
                    "occurred_at": Utc::now(),
                }
            }),
            metadata: EventMetadata::default(),
        };
        store
            .append_events(id, vec![event], ExpectedVersion::NoStream)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn worker_rebuilds_and_completes_the_task() {
        let store = Arc::new(InMemoryEventStore::new());
        let rows = Arc::new(InMemoryReadModelStore::<TaskBoardRow>::new());
        let queue = Arc::new(InMemoryRepairQueue::new());
        let projector = Arc::new(TaskBoardProjector::new(
            AggregateType::Task,
            store.clone(),
            rows.clone(),
            queue.clone(),
        ));

        let id = AggregateId::new();
        seed_minimal_task(&store, id).await;
        queue
            .enqueue(RepairTask::readmodel_sync(id, AggregateType::Task))
            .await
            .unwrap();

        let worker = RepairWorker::new(queue.clone(), config()).register(projector);
        assert_eq!(worker.process_batch().await.unwrap(), 1);

        let row = rows.get(id).await.unwrap().unwrap();
        assert_eq!(row.title, "Repaired");
        assert_eq!(row.version, 1);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn unroutable_tasks_fail_after_max_retries() {
        let queue = Arc::new(InMemoryRepairQueue::new());
        queue
            .enqueue(RepairTask::readmodel_sync(
                AggregateId::new(),
                AggregateType::Chat,
            ))
            .await
            .unwrap();

        // No chat projector registered: each attempt fails.
        let worker = RepairWorker::new(queue.clone(), config());
        worker.process_batch().await.unwrap();
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 1, "first failure releases the task");

        worker.process_batch().await.unwrap();
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.failed, 1, "second failure exhausts max_retries=2");

        // Terminal until an operator requeues.
        assert_eq!(worker.process_batch().await.unwrap(), 0);
        queue.requeue_failed().await.unwrap();
        assert_eq!(queue.stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn spawned_worker_shuts_down_cleanly() {
        let queue = Arc::new(InMemoryRepairQueue::new());
        let handle = RepairWorker::new(queue, config()).spawn();
        tokio::time::sleep(Duration::from_millis(25)).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn claimed_status_is_visible_in_stats() {
        let queue = InMemoryRepairQueue::new();
        queue
            .enqueue(RepairTask::readmodel_sync(
                AggregateId::new(),
                AggregateType::Task,
            ))
            .await
            .unwrap();
        let claimed = queue.poll(1).await.unwrap();
        assert_eq!(claimed[0].status, RepairStatus::Processing);
        assert_eq!(queue.stats().await.unwrap().processing, 1);
    }
}
