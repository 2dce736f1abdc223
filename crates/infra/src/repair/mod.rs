//! Repair queue: persistent FIFO of read-model rebuild requests.
//!
//! When a projector detects a gap or fails to apply an event, it enqueues a
//! repair task here. The repair worker claims tasks (`pending ->
//! processing`, the claim is the lock), dispatches to the matching
//! projector's rebuild, and records the outcome. Tasks whose retries are
//! exhausted become `failed` and stay terminal until an operator requeues
//! them.

pub mod in_memory;
pub mod postgres;
pub mod worker;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use flowra_core::AggregateId;
use flowra_events::AggregateType;

pub use in_memory::InMemoryRepairQueue;
pub use postgres::PostgresRepairQueue;
pub use worker::{RepairWorker, RepairWorkerConfig};

/// What kind of repair is requested. Currently only read-model rebuilds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairKind {
    ReadmodelSync,
}

impl RepairKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairKind::ReadmodelSync => "readmodel_sync",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl RepairStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairStatus::Pending => "pending",
            RepairStatus::Processing => "processing",
            RepairStatus::Completed => "completed",
            RepairStatus::Failed => "failed",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, RepairStatus::Pending | RepairStatus::Processing)
    }
}

/// A request to rebuild one aggregate's read-model row from scratch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairTask {
    pub task_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: AggregateType,
    pub task_type: RepairKind,
    pub status: RepairStatus,
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RepairTask {
    pub fn readmodel_sync(aggregate_id: AggregateId, aggregate_type: AggregateType) -> Self {
        Self {
            task_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type,
            task_type: RepairKind::ReadmodelSync,
            status: RepairStatus::Pending,
            retry_count: 0,
            last_retry_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Queue statistics for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
}

#[derive(Debug, Error)]
pub enum RepairError {
    #[error("repair task not found: {0}")]
    NotFound(Uuid),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

/// Persistent FIFO of repair tasks.
#[async_trait]
pub trait RepairQueue: Send + Sync {
    /// Enqueue a rebuild request.
    ///
    /// Deduplicated per open `(aggregate_id, task_type)`: while a rebuild is
    /// already queued or running, a second request is a no-op and the
    /// existing task id is returned.
    async fn enqueue(&self, task: RepairTask) -> Result<Uuid, RepairError>;

    /// Claim up to `batch_size` pending tasks, oldest first. Claimed tasks
    /// transition to `processing` with `retry_count` incremented; tasks
    /// stuck in `processing` past the visibility timeout are reclaimed.
    async fn poll(&self, batch_size: usize) -> Result<Vec<RepairTask>, RepairError>;

    async fn mark_completed(&self, task_id: Uuid) -> Result<(), RepairError>;

    /// Terminal failure (retries exhausted).
    async fn mark_failed(&self, task_id: Uuid) -> Result<(), RepairError>;

    /// Return a claimed task to `pending` for a later attempt.
    async fn release(&self, task_id: Uuid) -> Result<(), RepairError>;

    /// Operator path: flip every `failed` task back to `pending`.
    async fn requeue_failed(&self) -> Result<u64, RepairError>;

    async fn stats(&self) -> Result<RepairStats, RepairError>;
}

#[async_trait]
impl<Q> RepairQueue for Arc<Q>
where
    Q: RepairQueue + ?Sized,
{
    async fn enqueue(&self, task: RepairTask) -> Result<Uuid, RepairError> {
        (**self).enqueue(task).await
    }

    async fn poll(&self, batch_size: usize) -> Result<Vec<RepairTask>, RepairError> {
        (**self).poll(batch_size).await
    }

    async fn mark_completed(&self, task_id: Uuid) -> Result<(), RepairError> {
        (**self).mark_completed(task_id).await
    }

    async fn mark_failed(&self, task_id: Uuid) -> Result<(), RepairError> {
        (**self).mark_failed(task_id).await
    }

    async fn release(&self, task_id: Uuid) -> Result<(), RepairError> {
        (**self).release(task_id).await
    }

    async fn requeue_failed(&self) -> Result<u64, RepairError> {
        (**self).requeue_failed().await
    }

    async fn stats(&self) -> Result<RepairStats, RepairError> {
        (**self).stats().await
    }
}
