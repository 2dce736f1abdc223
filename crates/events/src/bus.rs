//! Event publishing/subscription abstraction (mechanics only).
//!
//! Delivery is at-least-once; subscribers must be idempotent. Ordering is
//! guaranteed per publisher per topic only.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::envelope::EventEnvelope;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus connection failed: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("message serialization failed: {0}")]
    Serialization(String),
}

/// Subscription pattern: exact topic, aggregate-type prefix, or everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicPattern {
    Exact(String),
    /// `"task.*"` — matches every topic under the prefix.
    Prefix(String),
    All,
}

impl TopicPattern {
    /// Parse `"task.created"`, `"task.*"`, or `"*"`.
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            TopicPattern::All
        } else if let Some(prefix) = pattern.strip_suffix(".*") {
            TopicPattern::Prefix(prefix.to_string())
        } else {
            TopicPattern::Exact(pattern.to_string())
        }
    }

    pub fn matches(&self, topic: &str) -> bool {
        match self {
            TopicPattern::Exact(t) => t == topic,
            TopicPattern::Prefix(p) => {
                topic.strip_prefix(p.as_str()).is_some_and(|rest| rest.starts_with('.'))
            }
            TopicPattern::All => true,
        }
    }
}

/// A live subscription: a stream of envelopes matching one pattern.
#[derive(Debug)]
pub struct EventSubscription {
    pattern: TopicPattern,
    receiver: mpsc::UnboundedReceiver<EventEnvelope>,
}

impl EventSubscription {
    pub fn new(pattern: TopicPattern, receiver: mpsc::UnboundedReceiver<EventEnvelope>) -> Self {
        Self { pattern, receiver }
    }

    pub fn pattern(&self) -> &TopicPattern {
        &self.pattern
    }

    /// Wait for the next matching envelope; `None` when the bus is closed.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        self.receiver.recv().await
    }

    /// Non-blocking receive for drain-style consumers.
    pub fn try_recv(&mut self) -> Option<EventEnvelope> {
        self.receiver.try_recv().ok()
    }
}

/// Domain-agnostic event bus.
///
/// A lightweight pub/sub contract; no assumptions about storage or
/// transport. Topic routing is derived from the envelope (`envelope.topic()`)
/// but passed explicitly so transports can override channel naming.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, envelope: EventEnvelope) -> Result<(), BusError>;

    fn subscribe(&self, pattern: &str) -> EventSubscription;
}

#[async_trait]
impl<B> EventBus for std::sync::Arc<B>
where
    B: EventBus + ?Sized,
{
    async fn publish(&self, topic: &str, envelope: EventEnvelope) -> Result<(), BusError> {
        (**self).publish(topic, envelope).await
    }

    fn subscribe(&self, pattern: &str) -> EventSubscription {
        (**self).subscribe(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_pattern_matches_only_itself() {
        let p = TopicPattern::parse("task.created");
        assert!(p.matches("task.created"));
        assert!(!p.matches("task.assigned"));
    }

    #[test]
    fn prefix_pattern_matches_namespace() {
        let p = TopicPattern::parse("task.*");
        assert!(p.matches("task.created"));
        assert!(p.matches("task.status_changed"));
        assert!(!p.matches("chat.created"));
        // A prefix match must stop at the dot boundary.
        assert!(!p.matches("taskforce.created"));
    }

    #[test]
    fn star_matches_everything() {
        let p = TopicPattern::parse("*");
        assert!(p.matches("task.created"));
        assert!(p.matches("notification.created"));
    }
}
