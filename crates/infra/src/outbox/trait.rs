use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use flowra_events::EventEnvelope;

/// Delivery state of an outbox entry.
///
/// `Failed` holds entries whose retries are exhausted; they are excluded
/// from polling and surfaced via `count()` and metrics until an operator
/// intervenes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Completed => "completed",
            OutboxStatus::Failed => "failed",
        }
    }
}

/// A staged event awaiting publication to the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub entry_id: Uuid,
    pub envelope: EventEnvelope,
    pub status: OutboxStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    pub fn staged(envelope: EventEnvelope) -> Self {
        Self {
            entry_id: Uuid::now_v7(),
            envelope,
            status: OutboxStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: Utc::now(),
            last_retry_at: None,
            processed_at: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("outbox entry not found: {0}")]
    NotFound(Uuid),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

/// Durable staging table for events between append and bus publication.
///
/// `poll` is safe to call concurrently across workers on the same backend:
/// the conditional `pending -> processing` update claims entries, so each
/// entry is handed to exactly one poller per visibility window.
#[async_trait]
pub trait Outbox: Send + Sync {
    /// Stage envelopes directly.
    ///
    /// The write path stages entries inside the append transaction instead;
    /// this entry point exists for re-staging and tests.
    async fn enqueue(&self, envelopes: Vec<EventEnvelope>) -> Result<(), OutboxError>;

    /// Claim up to `batch_size` deliverable entries, oldest first.
    ///
    /// Claimed entries transition to `processing` with `retry_count`
    /// incremented and `last_retry_at = now`. Entries already `processing`
    /// but older than the backend's visibility timeout are reclaimed.
    async fn poll(&self, batch_size: usize) -> Result<Vec<OutboxEntry>, OutboxError>;

    async fn mark_completed(&self, entry_id: Uuid) -> Result<(), OutboxError>;

    /// Record a publish failure and return the entry to `pending`.
    async fn mark_failed(&self, entry_id: Uuid, error: &str) -> Result<(), OutboxError>;

    /// Record a publish failure and hold the entry in `failed` (retries
    /// exhausted; excluded from polling until operator action).
    async fn mark_exhausted(&self, entry_id: Uuid, error: &str) -> Result<(), OutboxError>;

    /// Delete completed entries older than the threshold; returns the count.
    async fn cleanup(&self, older_than: Duration) -> Result<u64, OutboxError>;

    /// Number of non-completed entries (observability).
    async fn count(&self) -> Result<u64, OutboxError>;
}

#[async_trait]
impl<O> Outbox for Arc<O>
where
    O: Outbox + ?Sized,
{
    async fn enqueue(&self, envelopes: Vec<EventEnvelope>) -> Result<(), OutboxError> {
        (**self).enqueue(envelopes).await
    }

    async fn poll(&self, batch_size: usize) -> Result<Vec<OutboxEntry>, OutboxError> {
        (**self).poll(batch_size).await
    }

    async fn mark_completed(&self, entry_id: Uuid) -> Result<(), OutboxError> {
        (**self).mark_completed(entry_id).await
    }

    async fn mark_failed(&self, entry_id: Uuid, error: &str) -> Result<(), OutboxError> {
        (**self).mark_failed(entry_id, error).await
    }

    async fn mark_exhausted(&self, entry_id: Uuid, error: &str) -> Result<(), OutboxError> {
        (**self).mark_exhausted(entry_id, error).await
    }

    async fn cleanup(&self, older_than: Duration) -> Result<u64, OutboxError> {
        (**self).cleanup(older_than).await
    }

    async fn count(&self) -> Result<u64, OutboxError> {
        (**self).count().await
    }
}
