use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use flowra_core::UserId;

/// What happened, from the recipient's point of view.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TaskAssigned,
    ChatParticipantAdded,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::TaskAssigned => "task_assigned",
            NotificationKind::ChatParticipantAdded => "chat_participant_added",
        }
    }
}

/// A persisted, user-targeted notification.
///
/// `(event_id, user_id)` is the idempotency key: bus redelivery of the
/// source event can never duplicate a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: Uuid,
    pub user_id: UserId,
    pub event_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub body: JsonValue,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        user_id: UserId,
        event_id: Uuid,
        kind: NotificationKind,
        title: impl Into<String>,
        body: JsonValue,
    ) -> Self {
        Self {
            notification_id: Uuid::now_v7(),
            user_id,
            event_id,
            kind,
            title: title.into(),
            body,
            read: false,
            created_at: Utc::now(),
        }
    }
}
