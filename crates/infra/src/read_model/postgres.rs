//! Postgres-backed read-model storage.
//!
//! One table per row type (`task_board`, `chat_list`), each keyed by
//! `aggregate_id` with the materialised row as JSONB plus extracted
//! `version` and `scope_id` columns, so the version guard and scope listing
//! stay inside SQL.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use flowra_core::AggregateId;

use super::{ReadModelError, ReadModelRow, ReadModelStore};

#[derive(Debug, Clone)]
pub struct PostgresReadModelStore<R> {
    pool: Arc<PgPool>,
    _row: PhantomData<fn() -> R>,
}

impl<R> PostgresReadModelStore<R> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            _row: PhantomData,
        }
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ReadModelError {
    ReadModelError::StorageUnavailable(format!("sqlx error in {operation}: {err}"))
}

fn decode_row<R: ReadModelRow>(raw: serde_json::Value) -> Result<R, ReadModelError> {
    serde_json::from_value(raw)
        .map_err(|e| ReadModelError::Serialization(format!("bad doc column: {e}")))
}

#[async_trait]
impl<R: ReadModelRow> ReadModelStore<R> for PostgresReadModelStore<R> {
    #[instrument(skip(self), fields(table = R::TABLE, aggregate_id = %id), err)]
    async fn get(&self, id: AggregateId) -> Result<Option<R>, ReadModelError> {
        let query = format!("SELECT doc FROM {} WHERE aggregate_id = $1", R::TABLE);
        let found = sqlx::query(&query)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        match found {
            Some(raw) => {
                let value: serde_json::Value = raw
                    .try_get("doc")
                    .map_err(|e| map_sqlx_error("read doc", e))?;
                Ok(Some(decode_row(value)?))
            }
            None => Ok(None),
        }
    }

    #[instrument(
        skip(self, row),
        fields(table = R::TABLE, aggregate_id = %row.row_id(), version = row.row_version()),
        err
    )]
    async fn upsert_if_newer(&self, row: R) -> Result<bool, ReadModelError> {
        let value = serde_json::to_value(&row)
            .map_err(|e| ReadModelError::Serialization(e.to_string()))?;
        let query = format!(
            r#"
            INSERT INTO {table} (aggregate_id, scope_id, version, doc, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (aggregate_id) DO UPDATE SET
                scope_id = EXCLUDED.scope_id,
                version = EXCLUDED.version,
                doc = EXCLUDED.doc,
                updated_at = NOW()
            WHERE {table}.version < EXCLUDED.version
            "#,
            table = R::TABLE
        );

        let result = sqlx::query(&query)
            .bind(row.row_id().as_uuid())
            .bind(row.scope_id().map(|s| *s.as_uuid()))
            .bind(row.row_version() as i64)
            .bind(&value)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("upsert_if_newer", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(
        skip(self, row),
        fields(table = R::TABLE, aggregate_id = %row.row_id(), version = row.row_version()),
        err
    )]
    async fn put(&self, row: R) -> Result<(), ReadModelError> {
        let value = serde_json::to_value(&row)
            .map_err(|e| ReadModelError::Serialization(e.to_string()))?;
        let query = format!(
            r#"
            INSERT INTO {table} (aggregate_id, scope_id, version, doc, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (aggregate_id) DO UPDATE SET
                scope_id = EXCLUDED.scope_id,
                version = EXCLUDED.version,
                doc = EXCLUDED.doc,
                updated_at = NOW()
            "#,
            table = R::TABLE
        );

        sqlx::query(&query)
            .bind(row.row_id().as_uuid())
            .bind(row.scope_id().map(|s| *s.as_uuid()))
            .bind(row.row_version() as i64)
            .bind(&value)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("put", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(table = R::TABLE, aggregate_id = %id), err)]
    async fn delete(&self, id: AggregateId) -> Result<(), ReadModelError> {
        let query = format!("DELETE FROM {} WHERE aggregate_id = $1", R::TABLE);
        sqlx::query(&query)
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(table = R::TABLE, scope = %scope), err)]
    async fn list_by_scope(&self, scope: AggregateId) -> Result<Vec<R>, ReadModelError> {
        let query = format!(
            "SELECT doc FROM {} WHERE scope_id = $1 ORDER BY aggregate_id",
            R::TABLE
        );
        let rows = sqlx::query(&query)
            .bind(scope.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_by_scope", e))?;

        rows.into_iter()
            .map(|raw| {
                let value: serde_json::Value = raw
                    .try_get("doc")
                    .map_err(|e| map_sqlx_error("read doc", e))?;
                decode_row(value)
            })
            .collect()
    }
}
