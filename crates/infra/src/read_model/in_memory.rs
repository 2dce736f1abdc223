use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use flowra_core::AggregateId;

use super::{ReadModelError, ReadModelRow, ReadModelStore};

/// In-memory read-model collection for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryReadModelStore<R> {
    rows: RwLock<HashMap<AggregateId, R>>,
}

impl<R> InMemoryReadModelStore<R> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }

    fn lock_err() -> ReadModelError {
        ReadModelError::StorageUnavailable("row lock poisoned".to_string())
    }
}

#[async_trait]
impl<R: ReadModelRow> ReadModelStore<R> for InMemoryReadModelStore<R> {
    async fn get(&self, id: AggregateId) -> Result<Option<R>, ReadModelError> {
        let rows = self.rows.read().map_err(|_| Self::lock_err())?;
        Ok(rows.get(&id).cloned())
    }

    async fn upsert_if_newer(&self, row: R) -> Result<bool, ReadModelError> {
        let mut rows = self.rows.write().map_err(|_| Self::lock_err())?;
        let id = row.row_id();
        match rows.get(&id) {
            Some(stored) if stored.row_version() >= row.row_version() => Ok(false),
            _ => {
                rows.insert(id, row);
                Ok(true)
            }
        }
    }

    async fn put(&self, row: R) -> Result<(), ReadModelError> {
        let mut rows = self.rows.write().map_err(|_| Self::lock_err())?;
        rows.insert(row.row_id(), row);
        Ok(())
    }

    async fn delete(&self, id: AggregateId) -> Result<(), ReadModelError> {
        let mut rows = self.rows.write().map_err(|_| Self::lock_err())?;
        rows.remove(&id);
        Ok(())
    }

    async fn list_by_scope(&self, scope: AggregateId) -> Result<Vec<R>, ReadModelError> {
        let rows = self.rows.read().map_err(|_| Self::lock_err())?;
        Ok(rows
            .values()
            .filter(|r| r.scope_id() == Some(scope))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::TaskBoardRow;
    use flowra_core::{ChatId, TaskId};

    fn row(id: TaskId, chat: ChatId, version: u64, title: &str) -> TaskBoardRow {
        TaskBoardRow {
            id,
            chat_id: chat,
            title: title.to_string(),
            version,
            ..TaskBoardRow::default()
        }
    }

    #[tokio::test]
    async fn upsert_guard_refuses_stale_versions() {
        let store = InMemoryReadModelStore::new();
        let id = TaskId::new();
        let chat = ChatId::new();

        assert!(store.upsert_if_newer(row(id, chat, 2, "v2")).await.unwrap());
        // Duplicate delivery: same version, refused.
        assert!(!store.upsert_if_newer(row(id, chat, 2, "dup")).await.unwrap());
        // Out-of-order arrival: lower version, refused.
        assert!(!store.upsert_if_newer(row(id, chat, 1, "old")).await.unwrap());

        let stored = store.get(id.into()).await.unwrap().unwrap();
        assert_eq!(stored.title, "v2");
    }

    #[tokio::test]
    async fn list_by_scope_filters_on_chat() {
        let store = InMemoryReadModelStore::new();
        let chat_a = ChatId::new();
        let chat_b = ChatId::new();

        store.put(row(TaskId::new(), chat_a, 1, "a1")).await.unwrap();
        store.put(row(TaskId::new(), chat_a, 1, "a2")).await.unwrap();
        store.put(row(TaskId::new(), chat_b, 1, "b1")).await.unwrap();

        let board = store.list_by_scope(chat_a.into()).await.unwrap();
        assert_eq!(board.len(), 2);
    }
}
