use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use flowra_core::UserId;

use crate::notification::{Notification, NotificationKind};

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification not found: {0}")]
    NotFound(Uuid),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

/// Persistence boundary for notifications.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Insert unless `(event_id, user_id)` was seen before; returns whether
    /// the notification is new.
    async fn insert_if_new(&self, notification: &Notification) -> Result<bool, NotificationError>;

    /// Newest first.
    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<Notification>, NotificationError>;

    async fn mark_read(&self, notification_id: Uuid) -> Result<(), NotificationError>;

    async fn unread_count(&self, user_id: UserId) -> Result<u64, NotificationError>;
}

#[async_trait]
impl<R> NotificationRepository for Arc<R>
where
    R: NotificationRepository + ?Sized,
{
    async fn insert_if_new(&self, notification: &Notification) -> Result<bool, NotificationError> {
        (**self).insert_if_new(notification).await
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<Notification>, NotificationError> {
        (**self).list_for_user(user_id, limit).await
    }

    async fn mark_read(&self, notification_id: Uuid) -> Result<(), NotificationError> {
        (**self).mark_read(notification_id).await
    }

    async fn unread_count(&self, user_id: UserId) -> Result<u64, NotificationError> {
        (**self).unread_count(user_id).await
    }
}

/// In-memory repository for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryNotificationRepository {
    notifications: RwLock<Vec<Notification>>,
}

impl InMemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_err() -> NotificationError {
        NotificationError::StorageUnavailable("notification lock poisoned".to_string())
    }
}

#[async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn insert_if_new(&self, notification: &Notification) -> Result<bool, NotificationError> {
        let mut notifications = self.notifications.write().map_err(|_| Self::lock_err())?;
        let seen = notifications
            .iter()
            .any(|n| n.event_id == notification.event_id && n.user_id == notification.user_id);
        if seen {
            return Ok(false);
        }
        notifications.push(notification.clone());
        Ok(true)
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<Notification>, NotificationError> {
        let notifications = self.notifications.read().map_err(|_| Self::lock_err())?;
        let mut for_user: Vec<Notification> = notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        for_user.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        for_user.truncate(limit);
        Ok(for_user)
    }

    async fn mark_read(&self, notification_id: Uuid) -> Result<(), NotificationError> {
        let mut notifications = self.notifications.write().map_err(|_| Self::lock_err())?;
        let notification = notifications
            .iter_mut()
            .find(|n| n.notification_id == notification_id)
            .ok_or(NotificationError::NotFound(notification_id))?;
        notification.read = true;
        Ok(())
    }

    async fn unread_count(&self, user_id: UserId) -> Result<u64, NotificationError> {
        let notifications = self.notifications.read().map_err(|_| Self::lock_err())?;
        Ok(notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.read)
            .count() as u64)
    }
}

/// Postgres repository; `(event_id, user_id)` uniqueness enforced by the
/// schema makes redelivery idempotent at the database level.
#[derive(Debug, Clone)]
pub struct PostgresNotificationRepository {
    pool: Arc<PgPool>,
}

impl PostgresNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> NotificationError {
    NotificationError::StorageUnavailable(format!("sqlx error in {operation}: {err}"))
}

#[async_trait]
impl NotificationRepository for PostgresNotificationRepository {
    #[instrument(skip(self, notification), fields(user_id = %notification.user_id), err)]
    async fn insert_if_new(&self, notification: &Notification) -> Result<bool, NotificationError> {
        let result = sqlx::query(
            r#"
            INSERT INTO notifications (
                notification_id, user_id, event_id, kind, title, body, read, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (event_id, user_id) DO NOTHING
            "#,
        )
        .bind(notification.notification_id)
        .bind(notification.user_id.as_uuid())
        .bind(notification.event_id)
        .bind(notification.kind.as_str())
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(notification.read)
        .bind(notification.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_if_new", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<Notification>, NotificationError> {
        let rows = sqlx::query(
            r#"
            SELECT notification_id, user_id, event_id, kind, title, body, read, created_at
            FROM notifications
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_for_user", e))?;

        rows.iter()
            .map(|row| {
                let kind: String = row
                    .try_get("kind")
                    .map_err(|e| map_sqlx_error("read kind", e))?;
                let kind = match kind.as_str() {
                    "task_assigned" => NotificationKind::TaskAssigned,
                    "chat_participant_added" => NotificationKind::ChatParticipantAdded,
                    other => {
                        return Err(NotificationError::StorageUnavailable(format!(
                            "unknown notification kind '{other}'"
                        )));
                    }
                };
                Ok(Notification {
                    notification_id: row
                        .try_get("notification_id")
                        .map_err(|e| map_sqlx_error("read notification_id", e))?,
                    user_id: UserId::from_uuid(
                        row.try_get("user_id")
                            .map_err(|e| map_sqlx_error("read user_id", e))?,
                    ),
                    event_id: row
                        .try_get("event_id")
                        .map_err(|e| map_sqlx_error("read event_id", e))?,
                    kind,
                    title: row
                        .try_get("title")
                        .map_err(|e| map_sqlx_error("read title", e))?,
                    body: row
                        .try_get("body")
                        .map_err(|e| map_sqlx_error("read body", e))?,
                    read: row
                        .try_get("read")
                        .map_err(|e| map_sqlx_error("read read", e))?,
                    created_at: row
                        .try_get("created_at")
                        .map_err(|e| map_sqlx_error("read created_at", e))?,
                })
            })
            .collect()
    }

    #[instrument(skip(self), fields(notification_id = %notification_id), err)]
    async fn mark_read(&self, notification_id: Uuid) -> Result<(), NotificationError> {
        let result =
            sqlx::query("UPDATE notifications SET read = TRUE WHERE notification_id = $1")
                .bind(notification_id)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("mark_read", e))?;

        if result.rows_affected() == 0 {
            return Err(NotificationError::NotFound(notification_id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn unread_count(&self, user_id: UserId) -> Result<u64, NotificationError> {
        let row = sqlx::query(
            "SELECT COUNT(*)::BIGINT AS unread FROM notifications WHERE user_id = $1 AND read = FALSE",
        )
        .bind(user_id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("unread_count", e))?;

        let unread: i64 = row
            .try_get("unread")
            .map_err(|e| map_sqlx_error("read unread", e))?;
        Ok(unread.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_is_idempotent_per_event_and_user() {
        let repo = InMemoryNotificationRepository::new();
        let user = UserId::new();
        let event_id = Uuid::now_v7();

        let n = Notification::new(
            user,
            event_id,
            NotificationKind::TaskAssigned,
            "You were assigned a task",
            json!({}),
        );
        assert!(repo.insert_if_new(&n).await.unwrap());

        // Redelivery of the same source event: refused.
        let duplicate = Notification::new(
            user,
            event_id,
            NotificationKind::TaskAssigned,
            "You were assigned a task",
            json!({}),
        );
        assert!(!repo.insert_if_new(&duplicate).await.unwrap());

        // Same event for another user is a distinct notification.
        let other = Notification::new(
            UserId::new(),
            event_id,
            NotificationKind::TaskAssigned,
            "You were assigned a task",
            json!({}),
        );
        assert!(repo.insert_if_new(&other).await.unwrap());
    }

    #[tokio::test]
    async fn unread_count_tracks_mark_read() {
        let repo = InMemoryNotificationRepository::new();
        let user = UserId::new();

        let n = Notification::new(
            user,
            Uuid::now_v7(),
            NotificationKind::ChatParticipantAdded,
            "Added to a chat",
            json!({}),
        );
        repo.insert_if_new(&n).await.unwrap();
        assert_eq!(repo.unread_count(user).await.unwrap(), 1);

        repo.mark_read(n.notification_id).await.unwrap();
        assert_eq!(repo.unread_count(user).await.unwrap(), 0);
    }
}
