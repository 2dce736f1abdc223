//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Typed command-validation failures.
///
/// These map to stable, caller-visible error codes; keep the set closed and
/// the variants specific.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid task id: {0}")]
    InvalidTaskId(String),

    #[error("invalid chat id: {0}")]
    InvalidChatId(String),

    #[error("invalid workspace id: {0}")]
    InvalidWorkspaceId(String),

    #[error("invalid user id: {0}")]
    InvalidUserId(String),

    #[error("title must not be empty")]
    EmptyTitle,

    #[error("title exceeds {max} characters (got {got})")]
    TitleTooLong { max: usize, got: usize },

    #[error("invalid priority: {0}")]
    InvalidPriority(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid entity type: {0}")]
    InvalidEntityType(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("invalid custom field: {0}")]
    InvalidCustomField(String),
}

/// Domain-level error.
///
/// Keep this focused on deterministic, business failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A command failed validation before reaching the aggregate.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A status transition the transition table refuses.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    /// The aggregate already exists (duplicate create).
    #[error("already exists")]
    AlreadyExists,

    /// The aggregate does not exist yet (command before create).
    #[error("not found")]
    NotFound,

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidStatusTransition {
            from: from.into(),
            to: to.into(),
        }
    }
}
