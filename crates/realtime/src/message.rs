use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use flowra_core::UserId;

/// A frame pushed to connected clients, serialized as JSON on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    /// Message discriminator for the client ("notification.created",
    /// "task.status_changed", ...).
    pub kind: String,
    pub payload: JsonValue,
}

impl PushMessage {
    pub fn new(kind: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Who a hub message is for.
#[derive(Debug, Clone, PartialEq)]
pub enum Recipients {
    User(UserId),
    Users(Vec<UserId>),
    All,
}

/// An inbound message for the hub to distribute.
#[derive(Debug, Clone, PartialEq)]
pub struct HubMessage {
    pub recipients: Recipients,
    pub message: PushMessage,
}

impl HubMessage {
    pub fn to_user(user_id: UserId, message: PushMessage) -> Self {
        Self {
            recipients: Recipients::User(user_id),
            message,
        }
    }

    pub fn to_users(user_ids: Vec<UserId>, message: PushMessage) -> Self {
        Self {
            recipients: Recipients::Users(user_ids),
            message,
        }
    }

    pub fn to_all(message: PushMessage) -> Self {
        Self {
            recipients: Recipients::All,
            message,
        }
    }
}
