//! The hub: a single control loop that owns the client registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use flowra_core::UserId;

use crate::client::{ClientHandle, ClientId, PushError};
use crate::message::{HubMessage, PushMessage, Recipients};

enum HubCommand {
    Register(ClientHandle),
    Unregister { user_id: UserId, client_id: ClientId },
    Broadcast(HubMessage),
    Shutdown,
}

/// Counters exposed for `/health/details` and metrics scraping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct HubMetricsSnapshot {
    pub clients: usize,
    pub delivered_frames: u64,
    pub dropped_frames: u64,
    pub dropped_clients: u64,
}

#[derive(Debug, Default)]
struct HubMetrics {
    clients: AtomicUsize,
    delivered_frames: AtomicU64,
    dropped_frames: AtomicU64,
    dropped_clients: AtomicU64,
}

/// Shared facade over the hub control loop.
///
/// Cloning is cheap; every clone feeds the same loop. The registry itself
/// is owned by the loop task and never locked.
#[derive(Debug, Clone)]
pub struct Hub {
    commands: mpsc::UnboundedSender<HubCommand>,
    running: Arc<AtomicBool>,
    metrics: Arc<HubMetrics>,
}

/// Join/stop handle for the control loop.
#[derive(Debug)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<HubCommand>,
    join: Option<JoinHandle<()>>,
}

impl HubHandle {
    /// Close the hub: commands already queued are processed first, then the
    /// loop drops every client handle, which closes all send channels and
    /// ends the write loops.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(HubCommand::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl Hub {
    /// Spawn the control loop.
    pub fn spawn() -> (Hub, HubHandle) {
        let (tx, mut rx) = mpsc::unbounded_channel::<HubCommand>();
        let running = Arc::new(AtomicBool::new(true));
        let metrics = Arc::new(HubMetrics::default());

        let loop_running = running.clone();
        let loop_metrics = metrics.clone();
        let join = tokio::spawn(async move {
            let mut registry: HashMap<UserId, HashMap<ClientId, ClientHandle>> = HashMap::new();
            info!("hub started");

            while let Some(command) = rx.recv().await {
                match command {
                    HubCommand::Register(handle) => {
                        debug!(user_id = %handle.user_id(), client_id = %handle.client_id(), "client registered");
                        registry
                            .entry(handle.user_id())
                            .or_default()
                            .insert(handle.client_id(), handle);
                        update_client_count(&loop_metrics, &registry);
                    }
                    HubCommand::Unregister { user_id, client_id } => {
                        remove_client(&mut registry, user_id, client_id);
                        update_client_count(&loop_metrics, &registry);
                    }
                    HubCommand::Broadcast(message) => {
                        dispatch(&mut registry, &loop_metrics, message);
                        update_client_count(&loop_metrics, &registry);
                    }
                    HubCommand::Shutdown => break,
                }
            }

            // Stopping: drop every handle so write loops terminate.
            registry.clear();
            loop_metrics.clients.store(0, Ordering::SeqCst);
            loop_running.store(false, Ordering::SeqCst);
            info!("hub stopped");
        });

        let hub = Hub {
            commands: tx.clone(),
            running,
            metrics,
        };
        let handle = HubHandle {
            commands: tx,
            join: Some(join),
        };
        (hub, handle)
    }

    /// Publish a new client; the hub owns the handle from here on.
    pub fn register(&self, handle: ClientHandle) {
        let _ = self.commands.send(HubCommand::Register(handle));
    }

    /// Announce a closed connection; triggers registry cleanup.
    pub fn unregister(&self, user_id: UserId, client_id: ClientId) {
        let _ = self
            .commands
            .send(HubCommand::Unregister { user_id, client_id });
    }

    /// Stage a message for distribution.
    pub fn broadcast(&self, message: HubMessage) {
        let _ = self.commands.send(HubCommand::Broadcast(message));
    }

    pub fn push_to_user(&self, user_id: UserId, message: PushMessage) {
        self.broadcast(HubMessage::to_user(user_id, message));
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn client_count(&self) -> usize {
        self.metrics.clients.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> HubMetricsSnapshot {
        HubMetricsSnapshot {
            clients: self.metrics.clients.load(Ordering::SeqCst),
            delivered_frames: self.metrics.delivered_frames.load(Ordering::SeqCst),
            dropped_frames: self.metrics.dropped_frames.load(Ordering::SeqCst),
            dropped_clients: self.metrics.dropped_clients.load(Ordering::SeqCst),
        }
    }
}

fn update_client_count(
    metrics: &HubMetrics,
    registry: &HashMap<UserId, HashMap<ClientId, ClientHandle>>,
) {
    let count = registry.values().map(|clients| clients.len()).sum();
    metrics.clients.store(count, Ordering::SeqCst);
}

fn remove_client(
    registry: &mut HashMap<UserId, HashMap<ClientId, ClientHandle>>,
    user_id: UserId,
    client_id: ClientId,
) {
    if let Some(clients) = registry.get_mut(&user_id) {
        clients.remove(&client_id);
        if clients.is_empty() {
            registry.remove(&user_id);
        }
    }
}

fn dispatch(
    registry: &mut HashMap<UserId, HashMap<ClientId, ClientHandle>>,
    metrics: &HubMetrics,
    message: HubMessage,
) {
    let HubMessage {
        recipients,
        message,
    } = message;

    let target_users: Vec<UserId> = match recipients {
        Recipients::User(user_id) => vec![user_id],
        Recipients::Users(user_ids) => user_ids,
        Recipients::All => registry.keys().copied().collect(),
    };

    for user_id in target_users {
        let Some(clients) = registry.get_mut(&user_id) else {
            continue;
        };

        let mut to_drop = Vec::new();
        for (client_id, handle) in clients.iter() {
            match handle.try_push(message.clone()) {
                Ok(()) => {
                    metrics.delivered_frames.fetch_add(1, Ordering::SeqCst);
                }
                Err(PushError::Full) => {
                    // Slow consumer: drop it rather than stall the loop.
                    warn!(user_id = %user_id, client_id = %client_id, "send queue full; dropping client");
                    metrics.dropped_frames.fetch_add(1, Ordering::SeqCst);
                    metrics.dropped_clients.fetch_add(1, Ordering::SeqCst);
                    to_drop.push(*client_id);
                }
                Err(PushError::Closed) => {
                    debug!(user_id = %user_id, client_id = %client_id, "client gone; cleaning up");
                    to_drop.push(*client_id);
                }
            }
        }

        for client_id in to_drop {
            clients.remove(&client_id);
        }
        if clients.is_empty() {
            registry.remove(&user_id);
        }
    }
}
