//! Periodic reconciliation of the IdP population into the user directory.
//!
//! A cycle scans every IdP user page by page, creates or diff-updates the
//! local mirror, then deactivates every local user the scan did not see.
//! Per-user failures are logged and counted and the cycle continues; a
//! failing count or list aborts the cycle so a flaky IdP can never cause a
//! mass deactivation.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use flowra_core::UserId;
use flowra_infra::WorkerHandle;

use crate::directory::{DirectoryError, LocalUser, UserDirectory};
use crate::provider::{IdentityProvider, IdpError, IdpUser};

/// `first_name last_name` trimmed; empty falls back to the username.
pub fn display_name(first_name: Option<&str>, last_name: Option<&str>, username: &str) -> String {
    let combined = format!(
        "{} {}",
        first_name.unwrap_or_default(),
        last_name.unwrap_or_default()
    );
    let trimmed = combined.trim();
    if trimmed.is_empty() {
        username.to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// The cycle-level IdP calls failed; the cycle was aborted.
    #[error(transparent)]
    Idp(#[from] IdpError),

    /// The post-scan directory sweep failed.
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Outcome counters for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SyncReport {
    pub scanned: u64,
    pub created: u64,
    pub updated: u64,
    pub deactivated: u64,
    pub errors: u64,
}

#[derive(Debug, Clone)]
pub struct IdentitySyncConfig {
    pub interval: Duration,
    pub batch_size: u64,
}

impl Default for IdentitySyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            batch_size: 100,
        }
    }
}

pub struct IdentitySyncWorker<P, D> {
    provider: P,
    directory: D,
    config: IdentitySyncConfig,
}

impl<P, D> IdentitySyncWorker<P, D>
where
    P: IdentityProvider + Send + Sync + 'static,
    D: UserDirectory + Send + Sync + 'static,
{
    pub fn new(provider: P, directory: D, config: IdentitySyncConfig) -> Self {
        Self {
            provider,
            directory,
            config,
        }
    }

    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = WorkerHandle::channel();

        let join = tokio::spawn(async move {
            info!(
                interval_secs = self.config.interval.as_secs(),
                batch_size = self.config.batch_size,
                "identity sync worker started"
            );

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                match self.run_cycle().await {
                    Ok(report) => info!(
                        scanned = report.scanned,
                        created = report.created,
                        updated = report.updated,
                        deactivated = report.deactivated,
                        errors = report.errors,
                        "identity sync cycle finished"
                    ),
                    Err(err) => error!(error = %err, "identity sync cycle aborted"),
                }

                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(self.config.interval) => {}
                }
            }

            info!("identity sync worker stopped");
        });

        WorkerHandle::new(shutdown_tx, join)
    }

    /// One full reconciliation pass.
    #[instrument(skip(self), err)]
    pub async fn run_cycle(&self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        let mut seen: HashSet<String> = HashSet::new();

        let total = self.provider.count_users().await?;
        debug!(total, "idp population counted");

        let mut offset = 0u64;
        while offset < total {
            let page = self
                .provider
                .list_users(offset, self.config.batch_size)
                .await?;
            if page.is_empty() {
                break;
            }
            offset += page.len() as u64;

            for idp_user in page {
                report.scanned += 1;
                seen.insert(idp_user.external_id.clone());

                if let Err(err) = self.sync_one(&idp_user, &mut report).await {
                    report.errors += 1;
                    warn!(
                        external_id = %idp_user.external_id,
                        error = %err,
                        "user sync failed; continuing"
                    );
                }
            }
        }

        // Anyone local the scan did not see has left the IdP.
        for external_id in self.directory.list_external_ids().await? {
            if seen.contains(&external_id) {
                continue;
            }
            let already_inactive = self
                .directory
                .find_by_external_id(&external_id)
                .await
                .ok()
                .flatten()
                .is_some_and(|u| !u.active);
            if already_inactive {
                continue;
            }
            match self.directory.deactivate(&external_id).await {
                Ok(()) => {
                    report.deactivated += 1;
                    info!(external_id = %external_id, "user deactivated");
                }
                Err(err) => {
                    report.errors += 1;
                    warn!(external_id = %external_id, error = %err, "deactivation failed");
                }
            }
        }

        Ok(report)
    }

    /// On-demand reconciliation of one user (after login).
    #[instrument(skip(self), err)]
    pub async fn sync_single_user(&self, external_id: &str) -> Result<Option<LocalUser>, SyncError> {
        match self.provider.find_user(external_id).await? {
            Some(idp_user) => {
                let mut scratch = SyncReport::default();
                self.sync_one(&idp_user, &mut scratch).await?;
                Ok(self.directory.find_by_external_id(external_id).await?)
            }
            None => {
                if self.directory.find_by_external_id(external_id).await?.is_some() {
                    self.directory.deactivate(external_id).await?;
                }
                Ok(None)
            }
        }
    }

    async fn sync_one(
        &self,
        idp_user: &IdpUser,
        report: &mut SyncReport,
    ) -> Result<(), DirectoryError> {
        let desired_display_name = display_name(
            idp_user.first_name.as_deref(),
            idp_user.last_name.as_deref(),
            &idp_user.username,
        );

        match self.directory.find_by_external_id(&idp_user.external_id).await? {
            None => {
                let now = Utc::now();
                let user = LocalUser {
                    user_id: UserId::new(),
                    external_id: idp_user.external_id.clone(),
                    username: idp_user.username.clone(),
                    email: idp_user.email.clone(),
                    display_name: desired_display_name,
                    active: idp_user.enabled,
                    created_at: now,
                    updated_at: now,
                };
                self.directory.insert(&user).await?;
                report.created += 1;
                debug!(external_id = %user.external_id, "user created");
            }
            Some(existing) => {
                let mut updated = existing.clone();
                updated.username = idp_user.username.clone();
                updated.email = idp_user.email.clone();
                updated.display_name = desired_display_name;
                updated.active = idp_user.enabled;

                if updated.username != existing.username
                    || updated.email != existing.email
                    || updated.display_name != existing.display_name
                    || updated.active != existing.active
                {
                    updated.updated_at = Utc::now();
                    self.directory.update(&updated).await?;
                    report.updated += 1;
                    debug!(external_id = %existing.external_id, "user updated");
                }
            }
        }
        Ok(())
    }
}
