//! Denormalised read models and their storage abstraction.
//!
//! Rows are disposable; events are the source of truth. Every row carries
//! the `version` of the highest applied event, and writes go through a
//! conditional upsert guarded by `stored.version < row.version`, so
//! duplicate deliveries and out-of-order arrivals never regress state.

pub mod in_memory;
pub mod postgres;
pub mod rows;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use flowra_core::AggregateId;

pub use in_memory::InMemoryReadModelStore;
pub use postgres::PostgresReadModelStore;
pub use rows::{ChatListRow, TaskBoardRow};

#[derive(Debug, Error)]
pub enum ReadModelError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("row serialization failed: {0}")]
    Serialization(String),
}

/// A materialised row keyed by aggregate id.
pub trait ReadModelRow:
    Clone + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Backing table / collection name ("task_board", "chat_list").
    const TABLE: &'static str;

    fn row_id(&self) -> AggregateId;

    /// Version of the highest applied event.
    fn row_version(&self) -> u64;

    /// Listing scope: the chat for tasks, the workspace for chats.
    fn scope_id(&self) -> Option<AggregateId>;
}

/// Storage for one read-model collection.
#[async_trait]
pub trait ReadModelStore<R: ReadModelRow>: Send + Sync {
    async fn get(&self, id: AggregateId) -> Result<Option<R>, ReadModelError>;

    /// Write `row` iff the stored version is lower; returns whether the
    /// write was applied. Absent rows count as version 0.
    async fn upsert_if_newer(&self, row: R) -> Result<bool, ReadModelError>;

    /// Unconditional overwrite, used by rebuilds (idempotent by content).
    async fn put(&self, row: R) -> Result<(), ReadModelError>;

    async fn delete(&self, id: AggregateId) -> Result<(), ReadModelError>;

    /// All rows in a listing scope (board of a chat, chats of a workspace).
    async fn list_by_scope(&self, scope: AggregateId) -> Result<Vec<R>, ReadModelError>;
}

#[async_trait]
impl<R, S> ReadModelStore<R> for std::sync::Arc<S>
where
    R: ReadModelRow,
    S: ReadModelStore<R> + ?Sized,
{
    async fn get(&self, id: AggregateId) -> Result<Option<R>, ReadModelError> {
        (**self).get(id).await
    }

    async fn upsert_if_newer(&self, row: R) -> Result<bool, ReadModelError> {
        (**self).upsert_if_newer(row).await
    }

    async fn put(&self, row: R) -> Result<(), ReadModelError> {
        (**self).put(row).await
    }

    async fn delete(&self, id: AggregateId) -> Result<(), ReadModelError> {
        (**self).delete(id).await
    }

    async fn list_by_scope(&self, scope: AggregateId) -> Result<Vec<R>, ReadModelError> {
        (**self).list_by_scope(scope).await
    }
}
