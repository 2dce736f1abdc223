//! Per-connection state shared between the hub and the connection loops.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use flowra_core::UserId;

use crate::message::PushMessage;

/// Connection tuning knobs. Defaults mirror the production profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Bounded outbound queue between the hub and the write loop.
    pub send_queue_size: usize,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    /// Interval between server pings; must stay under the read deadline.
    pub ping_interval: Duration,
    /// A connection with no inbound frame (including pongs) for this long
    /// is considered dead.
    pub read_deadline: Duration,
    /// One outbound frame must flush within this long.
    pub write_deadline: Duration,
    /// Inbound frames above this size close the connection.
    pub max_message_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            send_queue_size: 256,
            read_buffer_size: 1024,
            write_buffer_size: 1024,
            ping_interval: Duration::from_secs(54),
            read_deadline: Duration::from_secs(60),
            write_deadline: Duration::from_secs(10),
            max_message_size: 64 * 1024,
        }
    }
}

/// Identity of one connection (a user may hold several).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ClientId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Why a push into the client queue did not land.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PushError {
    /// Queue full: the client is too slow and must be dropped.
    Full,
    /// Write loop already gone.
    Closed,
}

/// Hub-side handle to one client: identity plus the send queue's sender.
///
/// Dropping the handle closes the queue, which terminates the write loop.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    client_id: ClientId,
    user_id: UserId,
    sender: mpsc::Sender<PushMessage>,
}

impl ClientHandle {
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Non-blocking push; the hub never awaits a slow client.
    pub fn try_push(&self, message: PushMessage) -> Result<(), PushError> {
        self.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }
}

/// Write-loop side of the send queue.
#[derive(Debug)]
pub struct ClientReceiver {
    receiver: mpsc::Receiver<PushMessage>,
}

impl ClientReceiver {
    /// Next staged frame; `None` once the hub dropped the client.
    pub async fn recv(&mut self) -> Option<PushMessage> {
        self.receiver.recv().await
    }
}

/// Create the two halves of one client connection.
pub fn client_pair(user_id: UserId, config: &ClientConfig) -> (ClientHandle, ClientReceiver) {
    let (sender, receiver) = mpsc::channel(config.send_queue_size.max(1));
    (
        ClientHandle {
            client_id: ClientId::new(),
            user_id,
            sender,
        },
        ClientReceiver { receiver },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_lands_in_the_receiver() {
        let (handle, mut receiver) = client_pair(UserId::new(), &ClientConfig::default());
        handle
            .try_push(PushMessage::new("ping", serde_json::json!({})))
            .unwrap();
        let frame = receiver.recv().await.unwrap();
        assert_eq!(frame.kind, "ping");
    }

    #[tokio::test]
    async fn full_queue_reports_backpressure() {
        let config = ClientConfig {
            send_queue_size: 2,
            ..ClientConfig::default()
        };
        let (handle, _receiver) = client_pair(UserId::new(), &config);

        handle.try_push(PushMessage::new("a", serde_json::json!({}))).unwrap();
        handle.try_push(PushMessage::new("b", serde_json::json!({}))).unwrap();
        assert_eq!(
            handle.try_push(PushMessage::new("c", serde_json::json!({}))),
            Err(PushError::Full)
        );
    }

    #[tokio::test]
    async fn dropped_handle_closes_the_receiver() {
        let (handle, mut receiver) = client_pair(UserId::new(), &ClientConfig::default());
        drop(handle);
        assert!(receiver.recv().await.is_none());
    }
}
