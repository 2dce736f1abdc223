use async_trait::async_trait;
use thiserror::Error;

use crate::envelope::EventEnvelope;

/// Why a handler invocation failed.
///
/// Both variants cause redelivery; `Fatal` stops retrying for the current
/// delivery attempt and relies on the next redelivery of the message.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler failed (retryable): {0}")]
    Retryable(String),

    #[error("handler failed: {0}")]
    Fatal(String),
}

impl HandlerError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// An event-bus subscriber body.
///
/// Handlers observe at-least-once delivery and MUST be idempotent on
/// `envelope.event_id()`. A handler that errors is re-invoked after a
/// backoff; one that exceeds its deadline is treated as failed.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable subscriber name (used in logs and worker task names).
    fn name(&self) -> &'static str;

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError>;
}
