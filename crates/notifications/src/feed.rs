//! Push feed: bridges `notification.created` bus messages into the hub.

use async_trait::async_trait;
use tracing::debug;

use flowra_events::{EventEnvelope, EventHandler, HandlerError};
use flowra_realtime::{Hub, PushMessage};

use crate::notification::Notification;

/// Subscribes to `notification.created` and pushes each notification to its
/// recipient's connected clients.
pub struct HubFeed {
    hub: Hub,
}

impl HubFeed {
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl EventHandler for HubFeed {
    fn name(&self) -> &'static str {
        "hub-feed"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let notification: Notification = envelope
            .decode()
            .map_err(|e| HandlerError::fatal(format!("bad notification payload: {e}")))?;

        debug!(
            user_id = %notification.user_id,
            kind = notification.kind.as_str(),
            "pushing notification"
        );
        self.hub.push_to_user(
            notification.user_id,
            PushMessage::new("notification.created", envelope.payload().clone()),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::NotificationKind;
    use chrono::Utc;
    use flowra_core::{AggregateId, UserId};
    use flowra_events::{AggregateType, EventMetadata};
    use flowra_realtime::{ClientConfig, client_pair};
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn feed_routes_to_the_recipients_connection() {
        let (hub, hub_handle) = flowra_realtime::Hub::spawn();
        let user = UserId::new();
        let (client, mut receiver) = client_pair(user, &ClientConfig::default());
        hub.register(client);
        for _ in 0..100 {
            if hub.client_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let notification = Notification::new(
            user,
            Uuid::now_v7(),
            NotificationKind::TaskAssigned,
            "You were assigned a task",
            serde_json::json!({}),
        );
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            AggregateId::from_uuid(notification.notification_id),
            AggregateType::Other("notification".to_string()),
            "notification.created",
            1,
            Utc::now(),
            serde_json::to_value(&notification).unwrap(),
            EventMetadata::default(),
        );

        let feed = HubFeed::new(hub.clone());
        feed.handle(&envelope).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.kind, "notification.created");
        assert_eq!(frame.payload["title"], "You were assigned a task");

        hub_handle.shutdown().await;
    }
}
