//! Worker lifecycle plumbing shared by the outbox, repair, and sync loops.

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to control and join a background worker task.
///
/// Workers receive the paired receiver and are expected to finish their
/// in-flight batch, then stop polling, once it flips to `true`.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn new(shutdown: watch::Sender<bool>, join: JoinHandle<()>) -> Self {
        Self {
            shutdown,
            join: Some(join),
        }
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }

    /// Create the shutdown channel pair for a new worker.
    pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }
}
