//! Notification pipeline: domain events in, user notifications out.
//!
//! Runs as a bus subscriber. For each event it derives zero or more
//! recipient-targeted notifications, persists the new ones, and publishes a
//! `notification.created` envelope for the push feed. Idempotent on the
//! source `event_id`: redelivery re-derives the same notifications and the
//! repository refuses the duplicates.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use flowra_chats::ChatEvent;
use flowra_events::{
    AggregateType, EventBus, EventEnvelope, EventHandler, EventMetadata, HandlerError,
};
use flowra_tasks::TaskEvent;

use crate::notification::{Notification, NotificationKind};
use crate::repository::NotificationRepository;

pub struct NotificationPipeline<B> {
    repository: Arc<dyn NotificationRepository>,
    bus: B,
}

impl<B> NotificationPipeline<B>
where
    B: EventBus,
{
    pub fn new(repository: Arc<dyn NotificationRepository>, bus: B) -> Self {
        Self { repository, bus }
    }

    /// Derive recipient notifications from one domain event.
    fn derive(&self, envelope: &EventEnvelope) -> Vec<Notification> {
        match envelope.aggregate_type() {
            AggregateType::Task => self.derive_task(envelope),
            AggregateType::Chat => self.derive_chat(envelope),
            _ => Vec::new(),
        }
    }

    fn derive_task(&self, envelope: &EventEnvelope) -> Vec<Notification> {
        let Ok(event) = envelope.decode::<TaskEvent>() else {
            return Vec::new();
        };

        match event {
            TaskEvent::Created(e) => match e.assignee_id {
                // Self-assignment on create is not news.
                Some(assignee) if Some(assignee) != envelope.metadata().actor_id => {
                    vec![Notification::new(
                        assignee,
                        envelope.event_id(),
                        NotificationKind::TaskAssigned,
                        "You were assigned a task",
                        json!({ "task_id": e.task_id, "chat_id": e.chat_id, "title": e.title }),
                    )]
                }
                _ => Vec::new(),
            },
            TaskEvent::Assigned(e) => match e.assignee_id {
                Some(assignee) if Some(assignee) != envelope.metadata().actor_id => {
                    vec![Notification::new(
                        assignee,
                        envelope.event_id(),
                        NotificationKind::TaskAssigned,
                        "You were assigned a task",
                        json!({ "task_id": e.task_id }),
                    )]
                }
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    fn derive_chat(&self, envelope: &EventEnvelope) -> Vec<Notification> {
        let Ok(event) = envelope.decode::<ChatEvent>() else {
            return Vec::new();
        };

        match event {
            ChatEvent::ParticipantAdded(e)
                if Some(e.user_id) != envelope.metadata().actor_id =>
            {
                vec![Notification::new(
                    e.user_id,
                    envelope.event_id(),
                    NotificationKind::ChatParticipantAdded,
                    "You were added to a chat",
                    json!({ "chat_id": e.chat_id }),
                )]
            }
            _ => Vec::new(),
        }
    }

    async fn publish_created(&self, notification: &Notification) {
        let payload = match serde_json::to_value(notification) {
            Ok(p) => p,
            Err(err) => {
                warn!(error = %err, "notification serialization failed");
                return;
            }
        };
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            flowra_core::AggregateId::from_uuid(notification.notification_id),
            AggregateType::Other("notification".to_string()),
            "notification.created",
            1,
            Utc::now(),
            payload,
            EventMetadata::default(),
        );

        if let Err(err) = self.bus.publish("notification.created", envelope).await {
            // Push is best-effort; the notification is already durable and
            // shows up on the next fetch.
            warn!(error = %err, "notification.created publish failed");
        }
    }
}

#[async_trait]
impl<B> EventHandler for NotificationPipeline<B>
where
    B: EventBus,
{
    fn name(&self) -> &'static str {
        "notification-pipeline"
    }

    #[instrument(skip(self, envelope), fields(event_type = envelope.event_type()))]
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        for notification in self.derive(envelope) {
            let is_new = self
                .repository
                .insert_if_new(&notification)
                .await
                .map_err(|e| HandlerError::retryable(e.to_string()))?;

            if is_new {
                self.publish_created(&notification).await;
            } else {
                debug!(
                    event_id = %envelope.event_id(),
                    user_id = %notification.user_id,
                    "duplicate delivery absorbed"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryNotificationRepository;
    use flowra_core::{ChatId, TaskId, UserId};
    use flowra_events::InMemoryEventBus;
    use flowra_tasks::task::{TaskAssigned, TaskCreated};
    use flowra_tasks::{EntityType, Priority, TaskStatus};

    fn assigned_envelope(assignee: UserId, actor: Option<UserId>) -> EventEnvelope {
        let task_id = TaskId::new();
        let event = TaskEvent::Assigned(TaskAssigned {
            task_id,
            assignee_id: Some(assignee),
            previous_assignee_id: None,
            occurred_at: Utc::now(),
        });
        EventEnvelope::new(
            Uuid::now_v7(),
            task_id.into(),
            AggregateType::Task,
            "task.assigned",
            2,
            Utc::now(),
            serde_json::to_value(&event).unwrap(),
            EventMetadata {
                actor_id: actor,
                ..EventMetadata::default()
            },
        )
    }

    #[tokio::test]
    async fn assignment_notifies_the_assignee_once() {
        let repository = Arc::new(InMemoryNotificationRepository::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let mut feed = bus.subscribe("notification.created");
        let pipeline = NotificationPipeline::new(repository.clone(), bus.clone());

        let assignee = UserId::new();
        let envelope = assigned_envelope(assignee, Some(UserId::new()));

        pipeline.handle(&envelope).await.unwrap();
        // At-least-once redelivery.
        pipeline.handle(&envelope).await.unwrap();

        let stored = repository.list_for_user(assignee, 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].kind, NotificationKind::TaskAssigned);

        // Exactly one push message despite the redelivery.
        let pushed = feed.recv().await.unwrap();
        assert_eq!(pushed.event_type(), "notification.created");
        assert!(feed.try_recv().is_none());
    }

    #[tokio::test]
    async fn self_assignment_is_silent() {
        let repository = Arc::new(InMemoryNotificationRepository::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let pipeline = NotificationPipeline::new(repository.clone(), bus);

        let user = UserId::new();
        let envelope = assigned_envelope(user, Some(user));
        pipeline.handle(&envelope).await.unwrap();

        assert!(repository.list_for_user(user, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn created_with_assignee_notifies_the_assignee() {
        let repository = Arc::new(InMemoryNotificationRepository::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let pipeline = NotificationPipeline::new(repository.clone(), bus);

        let assignee = UserId::new();
        let task_id = TaskId::new();
        let event = TaskEvent::Created(TaskCreated {
            task_id,
            chat_id: ChatId::new(),
            title: "Review the design".to_string(),
            entity_type: EntityType::Task,
            status: TaskStatus::ToDo,
            priority: Priority::Medium,
            assignee_id: Some(assignee),
            due_date: None,
            created_by: UserId::new(),
            occurred_at: Utc::now(),
        });
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            task_id.into(),
            AggregateType::Task,
            "task.created",
            1,
            Utc::now(),
            serde_json::to_value(&event).unwrap(),
            EventMetadata::default(),
        );

        pipeline.handle(&envelope).await.unwrap();
        let stored = repository.list_for_user(assignee, 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].body["title"], "Review the design");
    }

    #[tokio::test]
    async fn status_changes_produce_no_notifications() {
        let repository = Arc::new(InMemoryNotificationRepository::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let pipeline = NotificationPipeline::new(repository.clone(), bus);

        let task_id = TaskId::new();
        let event = TaskEvent::StatusChanged(flowra_tasks::task::TaskStatusChanged {
            task_id,
            from: TaskStatus::ToDo,
            to: TaskStatus::Done,
            occurred_at: Utc::now(),
        });
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            task_id.into(),
            AggregateType::Task,
            "task.status_changed",
            2,
            Utc::now(),
            serde_json::to_value(&event).unwrap(),
            EventMetadata::default(),
        );

        pipeline.handle(&envelope).await.unwrap();
        assert_eq!(
            repository.unread_count(UserId::new()).await.unwrap(),
            0
        );
    }
}
