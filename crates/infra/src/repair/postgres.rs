//! Postgres-backed repair queue.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use flowra_core::AggregateId;
use flowra_events::AggregateType;

use super::{RepairError, RepairKind, RepairQueue, RepairStats, RepairStatus, RepairTask};

#[derive(Debug, Clone)]
pub struct PostgresRepairQueue {
    pool: Arc<PgPool>,
    visibility_timeout: Duration,
}

impl PostgresRepairQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            visibility_timeout: Duration::seconds(120),
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: StdDuration) -> Self {
        self.visibility_timeout =
            Duration::from_std(timeout).unwrap_or_else(|_| Duration::seconds(120));
        self
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepairError {
    RepairError::StorageUnavailable(format!("sqlx error in {operation}: {err}"))
}

fn task_from_row(row: &sqlx::postgres::PgRow) -> Result<RepairTask, RepairError> {
    let task_id: Uuid = row
        .try_get("task_id")
        .map_err(|e| map_sqlx_error("read task_id", e))?;
    let aggregate_id: Uuid = row
        .try_get("aggregate_id")
        .map_err(|e| map_sqlx_error("read aggregate_id", e))?;
    let aggregate_type: String = row
        .try_get("aggregate_type")
        .map_err(|e| map_sqlx_error("read aggregate_type", e))?;
    let status: String = row
        .try_get("status")
        .map_err(|e| map_sqlx_error("read status", e))?;
    let status = match status.as_str() {
        "pending" => RepairStatus::Pending,
        "processing" => RepairStatus::Processing,
        "completed" => RepairStatus::Completed,
        "failed" => RepairStatus::Failed,
        other => {
            return Err(RepairError::StorageUnavailable(format!(
                "unknown repair status '{other}'"
            )));
        }
    };
    let retry_count: i32 = row
        .try_get("retry_count")
        .map_err(|e| map_sqlx_error("read retry_count", e))?;
    let last_retry_at: Option<DateTime<Utc>> = row
        .try_get("last_retry_at")
        .map_err(|e| map_sqlx_error("read last_retry_at", e))?;
    let created_at: DateTime<Utc> = row
        .try_get("created_at")
        .map_err(|e| map_sqlx_error("read created_at", e))?;

    Ok(RepairTask {
        task_id,
        aggregate_id: AggregateId::from_uuid(aggregate_id),
        aggregate_type: AggregateType::from(aggregate_type),
        task_type: RepairKind::ReadmodelSync,
        status,
        retry_count: retry_count.max(0) as u32,
        last_retry_at,
        created_at,
    })
}

#[async_trait]
impl RepairQueue for PostgresRepairQueue {
    #[instrument(skip(self, task), fields(aggregate_id = %task.aggregate_id), err)]
    async fn enqueue(&self, task: RepairTask) -> Result<Uuid, RepairError> {
        // Dedup against open tasks via the partial unique index on
        // (aggregate_id, task_type) WHERE status IN ('pending','processing').
        let row = sqlx::query(
            r#"
            INSERT INTO repair_tasks (
                task_id, aggregate_id, aggregate_type, task_type, status,
                retry_count, created_at
            )
            VALUES ($1, $2, $3, $4, 'pending', 0, NOW())
            ON CONFLICT (aggregate_id, task_type) WHERE status IN ('pending', 'processing')
            DO NOTHING
            RETURNING task_id
            "#,
        )
        .bind(task.task_id)
        .bind(task.aggregate_id.as_uuid())
        .bind(task.aggregate_type.as_str())
        .bind(task.task_type.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("enqueue", e))?;

        if let Some(inserted) = row {
            return inserted
                .try_get("task_id")
                .map_err(|e| map_sqlx_error("read task_id", e));
        }

        // Conflict: return the open task's id.
        let existing = sqlx::query(
            r#"
            SELECT task_id FROM repair_tasks
            WHERE aggregate_id = $1 AND task_type = $2 AND status IN ('pending', 'processing')
            LIMIT 1
            "#,
        )
        .bind(task.aggregate_id.as_uuid())
        .bind(task.task_type.as_str())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("enqueue lookup", e))?;

        existing
            .try_get("task_id")
            .map_err(|e| map_sqlx_error("read task_id", e))
    }

    #[instrument(skip(self), err)]
    async fn poll(&self, batch_size: usize) -> Result<Vec<RepairTask>, RepairError> {
        let visibility_secs = self.visibility_timeout.num_seconds().max(0);

        let rows = sqlx::query(
            r#"
            UPDATE repair_tasks
            SET status = 'processing',
                retry_count = retry_count + 1,
                last_retry_at = NOW()
            WHERE task_id IN (
                SELECT task_id
                FROM repair_tasks
                WHERE status = 'pending'
                   OR (status = 'processing'
                       AND last_retry_at < NOW() - make_interval(secs => $2))
                ORDER BY created_at ASC, task_id ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING task_id, aggregate_id, aggregate_type, task_type, status,
                      retry_count, last_retry_at, created_at
            "#,
        )
        .bind(batch_size as i64)
        .bind(visibility_secs as f64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("poll", e))?;

        let mut tasks: Vec<RepairTask> = rows.iter().map(task_from_row).collect::<Result<_, _>>()?;
        tasks.sort_by(|a, b| (a.created_at, a.task_id).cmp(&(b.created_at, b.task_id)));
        Ok(tasks)
    }

    #[instrument(skip(self), fields(task_id = %task_id), err)]
    async fn mark_completed(&self, task_id: Uuid) -> Result<(), RepairError> {
        self.set_status(task_id, RepairStatus::Completed).await
    }

    #[instrument(skip(self), fields(task_id = %task_id), err)]
    async fn mark_failed(&self, task_id: Uuid) -> Result<(), RepairError> {
        self.set_status(task_id, RepairStatus::Failed).await
    }

    #[instrument(skip(self), fields(task_id = %task_id), err)]
    async fn release(&self, task_id: Uuid) -> Result<(), RepairError> {
        self.set_status(task_id, RepairStatus::Pending).await
    }

    #[instrument(skip(self), err)]
    async fn requeue_failed(&self) -> Result<u64, RepairError> {
        let result = sqlx::query(
            "UPDATE repair_tasks SET status = 'pending', retry_count = 0 WHERE status = 'failed'",
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("requeue_failed", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<RepairStats, RepairError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*)::BIGINT AS count FROM repair_tasks GROUP BY status",
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = RepairStats::default();
        for row in rows {
            let status: String = row
                .try_get("status")
                .map_err(|e| map_sqlx_error("read status", e))?;
            let count: i64 = row
                .try_get("count")
                .map_err(|e| map_sqlx_error("read count", e))?;
            let count = count.max(0) as u64;
            match status.as_str() {
                "pending" => stats.pending = count,
                "processing" => stats.processing = count,
                "completed" => stats.completed = count,
                "failed" => stats.failed = count,
                _ => {}
            }
            stats.total += count;
        }
        Ok(stats)
    }
}

impl PostgresRepairQueue {
    async fn set_status(&self, task_id: Uuid, status: RepairStatus) -> Result<(), RepairError> {
        let result = sqlx::query("UPDATE repair_tasks SET status = $2 WHERE task_id = $1")
            .bind(task_id)
            .bind(status.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_status", e))?;

        if result.rows_affected() == 0 {
            return Err(RepairError::NotFound(task_id));
        }
        Ok(())
    }
}
