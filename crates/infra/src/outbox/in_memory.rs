use std::sync::{Arc, RwLock};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use flowra_events::EventEnvelope;

use crate::event_store::in_memory::Journal;

use super::r#trait::{Outbox, OutboxEntry, OutboxError, OutboxStatus};

/// Default window after which a claimed-but-unfinished entry is reclaimed.
pub const DEFAULT_VISIBILITY_TIMEOUT: StdDuration = StdDuration::from_secs(60);

/// In-memory outbox view over the store's journal.
///
/// Shares the journal lock with [`crate::event_store::InMemoryEventStore`],
/// so staged entries appear atomically with their append.
#[derive(Debug, Clone)]
pub struct InMemoryOutbox {
    journal: Arc<RwLock<Journal>>,
    visibility_timeout: Duration,
}

impl InMemoryOutbox {
    pub(crate) fn over(journal: Arc<RwLock<Journal>>) -> Self {
        Self {
            journal,
            visibility_timeout: Duration::from_std(DEFAULT_VISIBILITY_TIMEOUT)
                .unwrap_or_else(|_| Duration::seconds(60)),
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: StdDuration) -> Self {
        self.visibility_timeout =
            Duration::from_std(timeout).unwrap_or_else(|_| Duration::seconds(60));
        self
    }

    fn lock_err() -> OutboxError {
        OutboxError::StorageUnavailable("journal lock poisoned".to_string())
    }
}

#[async_trait]
impl Outbox for InMemoryOutbox {
    async fn enqueue(&self, envelopes: Vec<EventEnvelope>) -> Result<(), OutboxError> {
        let mut journal = self.journal.write().map_err(|_| Self::lock_err())?;
        for envelope in envelopes {
            journal.outbox.push(OutboxEntry::staged(envelope));
        }
        Ok(())
    }

    async fn poll(&self, batch_size: usize) -> Result<Vec<OutboxEntry>, OutboxError> {
        let mut journal = self.journal.write().map_err(|_| Self::lock_err())?;
        let now = Utc::now();
        let reclaim_before = now - self.visibility_timeout;

        // Deliverable = pending, or processing past the visibility window.
        let mut candidates: Vec<usize> = journal
            .outbox
            .iter()
            .enumerate()
            .filter(|(_, e)| match e.status {
                OutboxStatus::Pending => true,
                OutboxStatus::Processing => {
                    e.last_retry_at.is_none_or(|t| t < reclaim_before)
                }
                OutboxStatus::Completed | OutboxStatus::Failed => false,
            })
            .map(|(idx, _)| idx)
            .collect();

        candidates.sort_by(|&a, &b| {
            let ea = &journal.outbox[a];
            let eb = &journal.outbox[b];
            (ea.created_at, ea.entry_id).cmp(&(eb.created_at, eb.entry_id))
        });
        candidates.truncate(batch_size);

        let mut claimed = Vec::with_capacity(candidates.len());
        for idx in candidates {
            let entry = &mut journal.outbox[idx];
            entry.status = OutboxStatus::Processing;
            entry.retry_count += 1;
            entry.last_retry_at = Some(now);
            claimed.push(entry.clone());
        }
        Ok(claimed)
    }

    async fn mark_completed(&self, entry_id: Uuid) -> Result<(), OutboxError> {
        let mut journal = self.journal.write().map_err(|_| Self::lock_err())?;
        let entry = journal
            .outbox
            .iter_mut()
            .find(|e| e.entry_id == entry_id)
            .ok_or(OutboxError::NotFound(entry_id))?;
        entry.status = OutboxStatus::Completed;
        entry.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_failed(&self, entry_id: Uuid, error: &str) -> Result<(), OutboxError> {
        let mut journal = self.journal.write().map_err(|_| Self::lock_err())?;
        let entry = journal
            .outbox
            .iter_mut()
            .find(|e| e.entry_id == entry_id)
            .ok_or(OutboxError::NotFound(entry_id))?;
        entry.status = OutboxStatus::Pending;
        entry.last_error = Some(error.to_string());
        Ok(())
    }

    async fn mark_exhausted(&self, entry_id: Uuid, error: &str) -> Result<(), OutboxError> {
        let mut journal = self.journal.write().map_err(|_| Self::lock_err())?;
        let entry = journal
            .outbox
            .iter_mut()
            .find(|e| e.entry_id == entry_id)
            .ok_or(OutboxError::NotFound(entry_id))?;
        entry.status = OutboxStatus::Failed;
        entry.last_error = Some(error.to_string());
        Ok(())
    }

    async fn cleanup(&self, older_than: Duration) -> Result<u64, OutboxError> {
        let mut journal = self.journal.write().map_err(|_| Self::lock_err())?;
        let threshold = Utc::now() - older_than;
        let before = journal.outbox.len();
        journal.outbox.retain(|e| {
            !(e.status == OutboxStatus::Completed
                && e.processed_at.is_some_and(|t| t < threshold))
        });
        Ok((before - journal.outbox.len()) as u64)
    }

    async fn count(&self) -> Result<u64, OutboxError> {
        let journal = self.journal.read().map_err(|_| Self::lock_err())?;
        Ok(journal
            .outbox
            .iter()
            .filter(|e| e.status != OutboxStatus::Completed)
            .count() as u64)
    }
}
