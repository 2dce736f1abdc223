//! Postgres-backed event store.
//!
//! Events and their outbox entries are written in a single transaction, so
//! an appended event always has exactly one staged outbox entry. Optimistic
//! concurrency is enforced twice: a version check inside the transaction and
//! the unique constraint on `(aggregate_id, version)`, which converts racing
//! inserts into concurrency conflicts.
//!
//! ## Error Mapping
//!
//! | Postgres error | Constraint | `EventStoreError` |
//! |----------------|-----------|-------------------|
//! | `23505` unique violation | `events_pkey` | `DuplicateEventId` |
//! | `23505` unique violation | `events_aggregate_id_version_key` | `ConcurrencyConflict` |
//! | other database error | — | `StorageUnavailable` |
//! | pool closed / io / timeout | — | `StorageUnavailable` |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use flowra_core::{AggregateId, ExpectedVersion};
use flowra_events::{AggregateType, EventEnvelope, EventMetadata};

use super::r#trait::{EventStore, EventStoreError, UncommittedEvent, validate_batch};

/// Postgres-backed append-only event store.
///
/// Shareable across tasks: all operations go through the sqlx pool.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_where(
        &self,
        aggregate_id: AggregateId,
        after_version: u64,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                aggregate_id,
                aggregate_type,
                event_type,
                version,
                occurred_at,
                payload,
                metadata
            FROM events
            WHERE aggregate_id = $1 AND version > $2
            ORDER BY version ASC
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .bind(after_version as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_events", e))?;

        rows.iter().map(envelope_from_row).collect()
    }
}

#[async_trait::async_trait]
impl EventStore for PostgresEventStore {
    #[instrument(skip(self), fields(aggregate_id = %aggregate_id), err)]
    async fn load_events(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        self.load_where(aggregate_id, 0).await
    }

    #[instrument(skip(self), fields(aggregate_id = %aggregate_id, after_version), err)]
    async fn load_events_after(
        &self,
        aggregate_id: AggregateId,
        after_version: u64,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        self.load_where(aggregate_id, after_version).await
    }

    #[instrument(
        skip(self, events),
        fields(
            aggregate_id = %aggregate_id,
            event_count = events.len(),
            expected_version = ?expected_version
        ),
        err
    )]
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

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let current = current_stream_version(&mut tx, aggregate_id).await?;
        if !expected_version.matches(current) {
            return Err(EventStoreError::ConcurrencyConflict {
                expected: expected_version,
                found: current,
            });
        }

        let mut committed = Vec::with_capacity(events.len());
        let mut next = current + 1;
        for event in events {
            let envelope = event.into_envelope(next);
            next += 1;

            insert_event(&mut tx, &envelope).await?;
            stage_outbox_entry(&mut tx, &envelope).await?;
            committed.push(envelope);
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(committed)
    }
}

async fn current_stream_version(
    tx: &mut Transaction<'_, Postgres>,
    aggregate_id: AggregateId,
) -> Result<u64, EventStoreError> {
    let row = sqlx::query(
        "SELECT COALESCE(MAX(version), 0) AS current_version FROM events WHERE aggregate_id = $1",
    )
    .bind(aggregate_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("current_stream_version", e))?;

    let current: i64 = row
        .try_get("current_version")
        .map_err(|e| EventStoreError::StorageUnavailable(format!("bad version column: {e}")))?;
    Ok(current as u64)
}

async fn insert_event(
    tx: &mut Transaction<'_, Postgres>,
    envelope: &EventEnvelope,
) -> Result<(), EventStoreError> {
    let metadata = serde_json::to_value(envelope.metadata()).map_err(|e| {
        EventStoreError::InvalidAppend(format!("metadata serialization failed: {e}"))
    })?;

    sqlx::query(
        r#"
        INSERT INTO events (
            event_id,
            aggregate_id,
            aggregate_type,
            event_type,
            version,
            occurred_at,
            payload,
            metadata
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(envelope.event_id())
    .bind(envelope.aggregate_id().as_uuid())
    .bind(envelope.aggregate_type().as_str())
    .bind(envelope.event_type())
    .bind(envelope.version() as i64)
    .bind(envelope.occurred_at())
    .bind(envelope.payload())
    .bind(&metadata)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_insert_violation(envelope, e))?;

    Ok(())
}

async fn stage_outbox_entry(
    tx: &mut Transaction<'_, Postgres>,
    envelope: &EventEnvelope,
) -> Result<(), EventStoreError> {
    let payload = serde_json::to_value(envelope).map_err(|e| {
        EventStoreError::InvalidAppend(format!("envelope serialization failed: {e}"))
    })?;

    sqlx::query(
        r#"
        INSERT INTO outbox_entries (entry_id, event_id, envelope, status, retry_count, created_at)
        VALUES ($1, $2, $3, 'pending', 0, NOW())
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(envelope.event_id())
    .bind(&payload)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("stage_outbox_entry", e))?;

    Ok(())
}

/// Distinguish the two unique constraints that can fire on event insert.
fn map_insert_violation(envelope: &EventEnvelope, err: sqlx::Error) -> EventStoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return match db_err.constraint() {
                Some("events_pkey") => EventStoreError::DuplicateEventId(envelope.event_id()),
                _ => EventStoreError::ConcurrencyConflict {
                    expected: ExpectedVersion::Exact(envelope.version().saturating_sub(1)),
                    found: envelope.version(),
                },
            };
        }
    }
    map_sqlx_error("insert_event", err)
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => EventStoreError::StorageUnavailable(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            EventStoreError::StorageUnavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            EventStoreError::StorageUnavailable(format!("connection pool timed out in {operation}"))
        }
        other => EventStoreError::StorageUnavailable(format!("sqlx error in {operation}: {other}")),
    }
}

pub(crate) fn envelope_from_row(row: &sqlx::postgres::PgRow) -> Result<EventEnvelope, EventStoreError> {
    let event_id: Uuid = row
        .try_get("event_id")
        .map_err(|e| row_error("event_id", e))?;
    let aggregate_id: Uuid = row
        .try_get("aggregate_id")
        .map_err(|e| row_error("aggregate_id", e))?;
    let aggregate_type: String = row
        .try_get("aggregate_type")
        .map_err(|e| row_error("aggregate_type", e))?;
    let event_type: String = row
        .try_get("event_type")
        .map_err(|e| row_error("event_type", e))?;
    let version: i64 = row.try_get("version").map_err(|e| row_error("version", e))?;
    let occurred_at: DateTime<Utc> = row
        .try_get("occurred_at")
        .map_err(|e| row_error("occurred_at", e))?;
    let payload: serde_json::Value = row
        .try_get("payload")
        .map_err(|e| row_error("payload", e))?;
    let metadata: serde_json::Value = row
        .try_get("metadata")
        .map_err(|e| row_error("metadata", e))?;
    let metadata: EventMetadata = serde_json::from_value(metadata)
        .map_err(|e| EventStoreError::StorageUnavailable(format!("bad metadata column: {e}")))?;

    Ok(EventEnvelope::new(
        event_id,
        AggregateId::from_uuid(aggregate_id),
        AggregateType::from(aggregate_type),
        event_type,
        version as u64,
        occurred_at,
        payload,
        metadata,
    ))
}

fn row_error(column: &str, err: sqlx::Error) -> EventStoreError {
    EventStoreError::StorageUnavailable(format!("failed to read column {column}: {err}"))
}
