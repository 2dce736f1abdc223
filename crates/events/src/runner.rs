//! Subscriber runner: drives an [`EventHandler`] from a bus subscription.
//!
//! The runner owns the redelivery policy of the handler contract: a failed
//! or timed-out invocation is retried after a backoff, bounded per delivery;
//! exhausted deliveries are logged and dropped (the message will come around
//! again only if the transport redelivers).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::bus::EventSubscription;
use crate::handler::EventHandler;

/// Redelivery and deadline policy for one subscriber.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Per-invocation deadline; a handler still running past it is failed.
    pub deadline: Duration,
    /// Invocations per delivery (first try + retries).
    pub max_attempts: u32,
    /// Base backoff between invocations; grows linearly per attempt.
    pub backoff: Duration,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(30),
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Handle to stop and join a running subscriber task.
#[derive(Debug)]
pub struct SubscriberHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl SubscriberHandle {
    /// Request graceful shutdown and wait for the task to stop.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

/// Spawn a subscriber task that feeds `handler` from `subscription`.
pub fn spawn_subscriber(
    handler: Arc<dyn EventHandler>,
    mut subscription: EventSubscription,
    config: SubscriberConfig,
) -> SubscriberHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let join = tokio::spawn(async move {
        let name = handler.name();
        debug!(subscriber = name, pattern = ?subscription.pattern(), "subscriber started");

        loop {
            let envelope = tokio::select! {
                _ = shutdown_rx.changed() => break,
                received = subscription.recv() => match received {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            deliver(&*handler, &envelope, &config).await;
        }

        debug!(subscriber = name, "subscriber stopped");
    });

    SubscriberHandle {
        shutdown: shutdown_tx,
        join: Some(join),
    }
}

async fn deliver(
    handler: &dyn EventHandler,
    envelope: &crate::envelope::EventEnvelope,
    config: &SubscriberConfig,
) {
    let name = handler.name();

    for attempt in 1..=config.max_attempts {
        match tokio::time::timeout(config.deadline, handler.handle(envelope)).await {
            Ok(Ok(())) => return,
            Ok(Err(err)) => {
                warn!(
                    subscriber = name,
                    event_id = %envelope.event_id(),
                    attempt,
                    error = %err,
                    "handler failed"
                );
                if !err.is_retryable() {
                    break;
                }
            }
            Err(_) => {
                warn!(
                    subscriber = name,
                    event_id = %envelope.event_id(),
                    attempt,
                    deadline_ms = config.deadline.as_millis() as u64,
                    "handler exceeded deadline"
                );
            }
        }

        if attempt < config.max_attempts {
            tokio::time::sleep(config.backoff * attempt).await;
        }
    }

    error!(
        subscriber = name,
        event_id = %envelope.event_id(),
        event_type = envelope.event_type(),
        "delivery attempts exhausted; dropping until redelivery"
    );
}
