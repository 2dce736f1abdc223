//! Postgres-backed outbox.
//!
//! Claiming is a single conditional `UPDATE ... WHERE entry_id IN (SELECT
//! ... FOR UPDATE SKIP LOCKED)`: concurrent pollers never hand out the same
//! entry, and `SKIP LOCKED` keeps them from serialising on each other.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use flowra_events::EventEnvelope;

use super::r#trait::{Outbox, OutboxEntry, OutboxError, OutboxStatus};

#[derive(Debug, Clone)]
pub struct PostgresOutbox {
    pool: Arc<PgPool>,
    visibility_timeout: Duration,
}

impl PostgresOutbox {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            visibility_timeout: Duration::seconds(60),
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: StdDuration) -> Self {
        self.visibility_timeout =
            Duration::from_std(timeout).unwrap_or_else(|_| Duration::seconds(60));
        self
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> OutboxError {
    OutboxError::StorageUnavailable(format!("sqlx error in {operation}: {err}"))
}

fn entry_from_row(row: &sqlx::postgres::PgRow) -> Result<OutboxEntry, OutboxError> {
    let entry_id: Uuid = row
        .try_get("entry_id")
        .map_err(|e| map_sqlx_error("read entry_id", e))?;
    let envelope: serde_json::Value = row
        .try_get("envelope")
        .map_err(|e| map_sqlx_error("read envelope", e))?;
    let envelope: EventEnvelope = serde_json::from_value(envelope)
        .map_err(|e| OutboxError::StorageUnavailable(format!("bad envelope column: {e}")))?;
    let status: String = row
        .try_get("status")
        .map_err(|e| map_sqlx_error("read status", e))?;
    let status = match status.as_str() {
        "pending" => OutboxStatus::Pending,
        "processing" => OutboxStatus::Processing,
        "completed" => OutboxStatus::Completed,
        "failed" => OutboxStatus::Failed,
        other => {
            return Err(OutboxError::StorageUnavailable(format!(
                "unknown outbox status '{other}'"
            )));
        }
    };
    let retry_count: i32 = row
        .try_get("retry_count")
        .map_err(|e| map_sqlx_error("read retry_count", e))?;
    let last_error: Option<String> = row
        .try_get("last_error")
        .map_err(|e| map_sqlx_error("read last_error", e))?;
    let created_at: DateTime<Utc> = row
        .try_get("created_at")
        .map_err(|e| map_sqlx_error("read created_at", e))?;
    let last_retry_at: Option<DateTime<Utc>> = row
        .try_get("last_retry_at")
        .map_err(|e| map_sqlx_error("read last_retry_at", e))?;
    let processed_at: Option<DateTime<Utc>> = row
        .try_get("processed_at")
        .map_err(|e| map_sqlx_error("read processed_at", e))?;

    Ok(OutboxEntry {
        entry_id,
        envelope,
        status,
        retry_count: retry_count.max(0) as u32,
        last_error,
        created_at,
        last_retry_at,
        processed_at,
    })
}

#[async_trait]
impl Outbox for PostgresOutbox {
    #[instrument(skip(self, envelopes), fields(count = envelopes.len()), err)]
    async fn enqueue(&self, envelopes: Vec<EventEnvelope>) -> Result<(), OutboxError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        for envelope in &envelopes {
            let payload = serde_json::to_value(envelope).map_err(|e| {
                OutboxError::StorageUnavailable(format!("envelope serialization failed: {e}"))
            })?;
            sqlx::query(
                r#"
                INSERT INTO outbox_entries (entry_id, event_id, envelope, status, retry_count, created_at)
                VALUES ($1, $2, $3, 'pending', 0, NOW())
                ON CONFLICT (event_id) DO NOTHING
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(envelope.event_id())
            .bind(&payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("enqueue", e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn poll(&self, batch_size: usize) -> Result<Vec<OutboxEntry>, OutboxError> {
        let visibility_secs = self.visibility_timeout.num_seconds().max(0);

        let rows = sqlx::query(
            r#"
            UPDATE outbox_entries
            SET status = 'processing',
                retry_count = retry_count + 1,
                last_retry_at = NOW()
            WHERE entry_id IN (
                SELECT entry_id
                FROM outbox_entries
                WHERE status = 'pending'
                   OR (status = 'processing'
                       AND last_retry_at < NOW() - make_interval(secs => $2))
                ORDER BY created_at ASC, entry_id ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING entry_id, event_id, envelope, status, retry_count, last_error,
                      created_at, last_retry_at, processed_at
            "#,
        )
        .bind(batch_size as i64)
        .bind(visibility_secs as f64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("poll", e))?;

        let mut entries: Vec<OutboxEntry> =
            rows.iter().map(entry_from_row).collect::<Result<_, _>>()?;
        // RETURNING does not guarantee the selection order.
        entries.sort_by(|a, b| (a.created_at, a.entry_id).cmp(&(b.created_at, b.entry_id)));
        Ok(entries)
    }

    #[instrument(skip(self), fields(entry_id = %entry_id), err)]
    async fn mark_completed(&self, entry_id: Uuid) -> Result<(), OutboxError> {
        let result = sqlx::query(
            "UPDATE outbox_entries SET status = 'completed', processed_at = NOW() WHERE entry_id = $1",
        )
        .bind(entry_id)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_completed", e))?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(entry_id));
        }
        Ok(())
    }

    #[instrument(skip(self, error), fields(entry_id = %entry_id), err)]
    async fn mark_failed(&self, entry_id: Uuid, error: &str) -> Result<(), OutboxError> {
        let result = sqlx::query(
            "UPDATE outbox_entries SET status = 'pending', last_error = $2 WHERE entry_id = $1",
        )
        .bind(entry_id)
        .bind(error)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_failed", e))?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(entry_id));
        }
        Ok(())
    }

    #[instrument(skip(self, error), fields(entry_id = %entry_id), err)]
    async fn mark_exhausted(&self, entry_id: Uuid, error: &str) -> Result<(), OutboxError> {
        let result = sqlx::query(
            "UPDATE outbox_entries SET status = 'failed', last_error = $2 WHERE entry_id = $1",
        )
        .bind(entry_id)
        .bind(error)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_exhausted", e))?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(entry_id));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn cleanup(&self, older_than: Duration) -> Result<u64, OutboxError> {
        let secs = older_than.num_seconds().max(0);
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_entries
            WHERE status = 'completed'
              AND processed_at < NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(secs as f64)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("cleanup", e))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn count(&self) -> Result<u64, OutboxError> {
        let row = sqlx::query(
            "SELECT COUNT(*)::BIGINT AS remaining FROM outbox_entries WHERE status <> 'completed'",
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count", e))?;

        let remaining: i64 = row
            .try_get("remaining")
            .map_err(|e| map_sqlx_error("read remaining", e))?;
        Ok(remaining.max(0) as u64)
    }
}
