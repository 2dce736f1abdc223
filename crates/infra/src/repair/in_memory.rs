use std::sync::RwLock;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use super::{RepairError, RepairQueue, RepairStats, RepairStatus, RepairTask};

/// In-memory repair queue for tests/dev.
#[derive(Debug)]
pub struct InMemoryRepairQueue {
    tasks: RwLock<Vec<RepairTask>>,
    visibility_timeout: Duration,
}

impl Default for InMemoryRepairQueue {
    fn default() -> Self {
        Self {
            tasks: RwLock::new(Vec::new()),
            visibility_timeout: Duration::seconds(60),
        }
    }
}

impl InMemoryRepairQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_visibility_timeout(mut self, timeout: StdDuration) -> Self {
        self.visibility_timeout =
            Duration::from_std(timeout).unwrap_or_else(|_| Duration::seconds(60));
        self
    }

    fn lock_err() -> RepairError {
        RepairError::StorageUnavailable("task lock poisoned".to_string())
    }
}

#[async_trait]
impl RepairQueue for InMemoryRepairQueue {
    async fn enqueue(&self, task: RepairTask) -> Result<Uuid, RepairError> {
        let mut tasks = self.tasks.write().map_err(|_| Self::lock_err())?;

        if let Some(open) = tasks.iter().find(|t| {
            t.aggregate_id == task.aggregate_id
                && t.task_type == task.task_type
                && t.status.is_open()
        }) {
            return Ok(open.task_id);
        }

        let id = task.task_id;
        tasks.push(task);
        Ok(id)
    }

    async fn poll(&self, batch_size: usize) -> Result<Vec<RepairTask>, RepairError> {
        let mut tasks = self.tasks.write().map_err(|_| Self::lock_err())?;
        let now = Utc::now();
        let reclaim_before = now - self.visibility_timeout;

        let mut candidates: Vec<usize> = tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| match t.status {
                RepairStatus::Pending => true,
                RepairStatus::Processing => t.last_retry_at.is_none_or(|at| at < reclaim_before),
                RepairStatus::Completed | RepairStatus::Failed => false,
            })
            .map(|(idx, _)| idx)
            .collect();

        candidates.sort_by(|&a, &b| {
            (tasks[a].created_at, tasks[a].task_id).cmp(&(tasks[b].created_at, tasks[b].task_id))
        });
        candidates.truncate(batch_size);

        let mut claimed = Vec::with_capacity(candidates.len());
        for idx in candidates {
            let task = &mut tasks[idx];
            task.status = RepairStatus::Processing;
            task.retry_count += 1;
            task.last_retry_at = Some(now);
            claimed.push(task.clone());
        }
        Ok(claimed)
    }

    async fn mark_completed(&self, task_id: Uuid) -> Result<(), RepairError> {
        self.set_status(task_id, RepairStatus::Completed)
    }

    async fn mark_failed(&self, task_id: Uuid) -> Result<(), RepairError> {
        self.set_status(task_id, RepairStatus::Failed)
    }

    async fn release(&self, task_id: Uuid) -> Result<(), RepairError> {
        self.set_status(task_id, RepairStatus::Pending)
    }

    async fn requeue_failed(&self) -> Result<u64, RepairError> {
        let mut tasks = self.tasks.write().map_err(|_| Self::lock_err())?;
        let mut requeued = 0;
        for task in tasks.iter_mut() {
            if task.status == RepairStatus::Failed {
                task.status = RepairStatus::Pending;
                task.retry_count = 0;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn stats(&self) -> Result<RepairStats, RepairError> {
        let tasks = self.tasks.read().map_err(|_| Self::lock_err())?;
        let mut stats = RepairStats::default();
        for task in tasks.iter() {
            match task.status {
                RepairStatus::Pending => stats.pending += 1,
                RepairStatus::Processing => stats.processing += 1,
                RepairStatus::Completed => stats.completed += 1,
                RepairStatus::Failed => stats.failed += 1,
            }
            stats.total += 1;
        }
        Ok(stats)
    }
}

impl InMemoryRepairQueue {
    fn set_status(&self, task_id: Uuid, status: RepairStatus) -> Result<(), RepairError> {
        let mut tasks = self.tasks.write().map_err(|_| Self::lock_err())?;
        let task = tasks
            .iter_mut()
            .find(|t| t.task_id == task_id)
            .ok_or(RepairError::NotFound(task_id))?;
        task.status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowra_core::AggregateId;
    use flowra_events::AggregateType;

    fn task() -> RepairTask {
        RepairTask::readmodel_sync(AggregateId::new(), AggregateType::Task)
    }

    #[tokio::test]
    async fn enqueue_dedups_open_tasks_per_aggregate() {
        let queue = InMemoryRepairQueue::new();
        let first = task();
        let aggregate_id = first.aggregate_id;

        let id_a = queue.enqueue(first).await.unwrap();
        let id_b = queue
            .enqueue(RepairTask::readmodel_sync(aggregate_id, AggregateType::Task))
            .await
            .unwrap();
        assert_eq!(id_a, id_b);
        assert_eq!(queue.stats().await.unwrap().pending, 1);

        // Once completed, a fresh request enqueues a new task.
        queue.poll(1).await.unwrap();
        queue.mark_completed(id_a).await.unwrap();
        let id_c = queue
            .enqueue(RepairTask::readmodel_sync(aggregate_id, AggregateType::Task))
            .await
            .unwrap();
        assert_ne!(id_a, id_c);
    }

    #[tokio::test]
    async fn poll_claims_and_counts_attempts() {
        let queue = InMemoryRepairQueue::new();
        queue.enqueue(task()).await.unwrap();

        let claimed = queue.poll(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, RepairStatus::Processing);
        assert_eq!(claimed[0].retry_count, 1);
        assert!(queue.poll(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn released_tasks_are_polled_again() {
        let queue = InMemoryRepairQueue::new();
        let id = queue.enqueue(task()).await.unwrap();

        queue.poll(1).await.unwrap();
        queue.release(id).await.unwrap();

        let again = queue.poll(1).await.unwrap();
        assert_eq!(again[0].retry_count, 2);
    }

    #[tokio::test]
    async fn requeue_failed_resets_retries() {
        let queue = InMemoryRepairQueue::new();
        let id = queue.enqueue(task()).await.unwrap();
        queue.poll(1).await.unwrap();
        queue.mark_failed(id).await.unwrap();
        assert_eq!(queue.stats().await.unwrap().failed, 1);

        assert_eq!(queue.requeue_failed().await.unwrap(), 1);
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.pending, 1);
        assert_eq!(queue.poll(1).await.unwrap()[0].retry_count, 1);
    }

    #[tokio::test]
    async fn stuck_processing_tasks_are_reclaimed() {
        let queue = InMemoryRepairQueue::new().with_visibility_timeout(StdDuration::ZERO);
        queue.enqueue(task()).await.unwrap();

        assert_eq!(queue.poll(1).await.unwrap().len(), 1);
        assert_eq!(queue.poll(1).await.unwrap().len(), 1);
    }
}
