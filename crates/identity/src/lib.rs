//! Identity: external IdP reconciliation into the local user directory.

pub mod directory;
pub mod provider;
pub mod sync;

pub use directory::{
    DirectoryError, InMemoryUserDirectory, LocalUser, PostgresUserDirectory, UserDirectory,
};
pub use provider::{HttpIdentityProvider, IdentityProvider, IdpError, IdpUser};
pub use sync::{IdentitySyncConfig, IdentitySyncWorker, SyncError, SyncReport, display_name};
