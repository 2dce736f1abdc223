//! Local user directory: the synced mirror of the IdP population.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::instrument;

use flowra_core::UserId;

/// A user in the local directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalUser {
    pub user_id: UserId,
    pub external_id: String,
    pub username: String,
    pub email: Option<String>,
    pub display_name: String,
    /// Users that disappear from the IdP are deactivated, never deleted.
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("user not found: {0}")]
    NotFound(String),

    #[error("duplicate external id: {0}")]
    DuplicateExternalId(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<LocalUser>, DirectoryError>;

    async fn insert(&self, user: &LocalUser) -> Result<(), DirectoryError>;

    async fn update(&self, user: &LocalUser) -> Result<(), DirectoryError>;

    /// External ids of every directory entry, active or not.
    async fn list_external_ids(&self) -> Result<Vec<String>, DirectoryError>;

    async fn deactivate(&self, external_id: &str) -> Result<(), DirectoryError>;
}

#[async_trait]
impl<D> UserDirectory for Arc<D>
where
    D: UserDirectory + ?Sized,
{
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<LocalUser>, DirectoryError> {
        (**self).find_by_external_id(external_id).await
    }

    async fn insert(&self, user: &LocalUser) -> Result<(), DirectoryError> {
        (**self).insert(user).await
    }

    async fn update(&self, user: &LocalUser) -> Result<(), DirectoryError> {
        (**self).update(user).await
    }

    async fn list_external_ids(&self) -> Result<Vec<String>, DirectoryError> {
        (**self).list_external_ids().await
    }

    async fn deactivate(&self, external_id: &str) -> Result<(), DirectoryError> {
        (**self).deactivate(external_id).await
    }
}

/// In-memory directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, LocalUser>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_err() -> DirectoryError {
        DirectoryError::StorageUnavailable("directory lock poisoned".to_string())
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<LocalUser>, DirectoryError> {
        let users = self.users.read().map_err(|_| Self::lock_err())?;
        Ok(users.get(external_id).cloned())
    }

    async fn insert(&self, user: &LocalUser) -> Result<(), DirectoryError> {
        let mut users = self.users.write().map_err(|_| Self::lock_err())?;
        if users.contains_key(&user.external_id) {
            return Err(DirectoryError::DuplicateExternalId(user.external_id.clone()));
        }
        users.insert(user.external_id.clone(), user.clone());
        Ok(())
    }

    async fn update(&self, user: &LocalUser) -> Result<(), DirectoryError> {
        let mut users = self.users.write().map_err(|_| Self::lock_err())?;
        if !users.contains_key(&user.external_id) {
            return Err(DirectoryError::NotFound(user.external_id.clone()));
        }
        users.insert(user.external_id.clone(), user.clone());
        Ok(())
    }

    async fn list_external_ids(&self) -> Result<Vec<String>, DirectoryError> {
        let users = self.users.read().map_err(|_| Self::lock_err())?;
        Ok(users.keys().cloned().collect())
    }

    async fn deactivate(&self, external_id: &str) -> Result<(), DirectoryError> {
        let mut users = self.users.write().map_err(|_| Self::lock_err())?;
        let user = users
            .get_mut(external_id)
            .ok_or_else(|| DirectoryError::NotFound(external_id.to_string()))?;
        user.active = false;
        user.updated_at = Utc::now();
        Ok(())
    }
}

/// Postgres directory backing.
#[derive(Debug, Clone)]
pub struct PostgresUserDirectory {
    pool: Arc<PgPool>,
}

impl PostgresUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DirectoryError {
    DirectoryError::StorageUnavailable(format!("sqlx error in {operation}: {err}"))
}

fn user_from_row(row: &sqlx::postgres::PgRow) -> Result<LocalUser, DirectoryError> {
    Ok(LocalUser {
        user_id: UserId::from_uuid(
            row.try_get("user_id")
                .map_err(|e| map_sqlx_error("read user_id", e))?,
        ),
        external_id: row
            .try_get("external_id")
            .map_err(|e| map_sqlx_error("read external_id", e))?,
        username: row
            .try_get("username")
            .map_err(|e| map_sqlx_error("read username", e))?,
        email: row
            .try_get("email")
            .map_err(|e| map_sqlx_error("read email", e))?,
        display_name: row
            .try_get("display_name")
            .map_err(|e| map_sqlx_error("read display_name", e))?,
        active: row
            .try_get("active")
            .map_err(|e| map_sqlx_error("read active", e))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| map_sqlx_error("read created_at", e))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| map_sqlx_error("read updated_at", e))?,
    })
}

#[async_trait]
impl UserDirectory for PostgresUserDirectory {
    #[instrument(skip(self), err)]
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<LocalUser>, DirectoryError> {
        let row = sqlx::query(
            r#"
            SELECT user_id, external_id, username, email, display_name, active,
                   created_at, updated_at
            FROM users
            WHERE external_id = $1
            "#,
        )
        .bind(external_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_external_id", e))?;

        row.as_ref().map(user_from_row).transpose()
    }

    #[instrument(skip(self, user), fields(external_id = %user.external_id), err)]
    async fn insert(&self, user: &LocalUser) -> Result<(), DirectoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (
                user_id, external_id, username, email, display_name, active,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (external_id) DO NOTHING
            "#,
        )
        .bind(user.user_id.as_uuid())
        .bind(&user.external_id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(user.active)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;

        if result.rows_affected() == 0 {
            return Err(DirectoryError::DuplicateExternalId(user.external_id.clone()));
        }
        Ok(())
    }

    #[instrument(skip(self, user), fields(external_id = %user.external_id), err)]
    async fn update(&self, user: &LocalUser) -> Result<(), DirectoryError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET username = $2, email = $3, display_name = $4, active = $5, updated_at = NOW()
            WHERE external_id = $1
            "#,
        )
        .bind(&user.external_id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(user.active)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        if result.rows_affected() == 0 {
            return Err(DirectoryError::NotFound(user.external_id.clone()));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_external_ids(&self) -> Result<Vec<String>, DirectoryError> {
        let rows = sqlx::query("SELECT external_id FROM users")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_external_ids", e))?;

        rows.iter()
            .map(|row| {
                row.try_get("external_id")
                    .map_err(|e| map_sqlx_error("read external_id", e))
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn deactivate(&self, external_id: &str) -> Result<(), DirectoryError> {
        let result = sqlx::query(
            "UPDATE users SET active = FALSE, updated_at = NOW() WHERE external_id = $1",
        )
        .bind(external_id)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("deactivate", e))?;

        if result.rows_affected() == 0 {
            return Err(DirectoryError::NotFound(external_id.to_string()));
        }
        Ok(())
    }
}
