//! In-memory event bus for tests/dev and single-process deployments.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bus::{BusError, EventBus, EventSubscription, TopicPattern};
use crate::envelope::EventEnvelope;

struct Subscriber {
    pattern: TopicPattern,
    sender: mpsc::UnboundedSender<EventEnvelope>,
}

/// In-process pub/sub bus.
///
/// - Fan-out to every subscriber whose pattern matches the topic
/// - Unbounded per-subscriber queues (lag between publish and delivery is
///   acceptable; backpressure is the hub's concern, not the bus's)
/// - Dead subscribers are pruned while publishing
#[derive(Default)]
pub struct InMemoryEventBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl core::fmt::Debug for InMemoryEventBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryEventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, envelope: EventEnvelope) -> Result<(), BusError> {
        let mut subs = self
            .subscribers
            .lock()
            .map_err(|_| BusError::Publish("subscriber registry poisoned".to_string()))?;

        subs.retain(|sub| {
            if !sub.pattern.matches(topic) {
                return true;
            }
            sub.sender.send(envelope.clone()).is_ok()
        });

        Ok(())
    }

    fn subscribe(&self, pattern: &str) -> EventSubscription {
        let pattern = TopicPattern::parse(pattern);
        let (tx, rx) = mpsc::unbounded_channel();

        // If the lock is poisoned the subscription is returned anyway; it
        // simply never receives messages.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(Subscriber {
                pattern: pattern.clone(),
                sender: tx,
            });
        }

        EventSubscription::new(pattern, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{AggregateType, EventMetadata};
    use chrono::Utc;
    use flowra_core::AggregateId;
    use uuid::Uuid;

    fn envelope(event_type: &str) -> EventEnvelope {
        EventEnvelope::new(
            Uuid::now_v7(),
            AggregateId::new(),
            AggregateType::Task,
            event_type,
            1,
            Utc::now(),
            serde_json::json!({}),
            EventMetadata::default(),
        )
    }

    #[tokio::test]
    async fn delivers_to_matching_subscribers_only() {
        let bus = InMemoryEventBus::new();
        let mut tasks = bus.subscribe("task.*");
        let mut chats = bus.subscribe("chat.*");

        let env = envelope("task.created");
        bus.publish(&env.topic(), env.clone()).await.unwrap();

        assert_eq!(tasks.recv().await.unwrap(), env);
        assert!(chats.try_recv().is_none());
    }

    #[tokio::test]
    async fn prunes_dropped_subscribers() {
        let bus = InMemoryEventBus::new();
        let sub = bus.subscribe("*");
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);

        let env = envelope("task.created");
        bus.publish(&env.topic(), env).await.unwrap();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn preserves_publish_order_per_subscriber() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe("task.*");

        let first = envelope("task.created");
        let second = envelope("task.status_changed");
        bus.publish(&first.topic(), first.clone()).await.unwrap();
        bus.publish(&second.topic(), second.clone()).await.unwrap();

        assert_eq!(sub.recv().await.unwrap(), first);
        assert_eq!(sub.recv().await.unwrap(), second);
    }
}
