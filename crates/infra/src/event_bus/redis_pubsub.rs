//! Redis pub/sub-backed event bus (feature `redis`).
//!
//! Redis pub/sub is fire-and-forget: offline subscribers miss messages.
//! At-least-once delivery is still preserved end to end because the outbox
//! holds every event until a publish succeeds, and projectors recover from
//! gaps through the repair queue.

use async_trait::async_trait;
use redis::Commands;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use flowra_events::{BusError, EventBus, EventEnvelope, EventSubscription, TopicPattern};

/// Redis pub/sub bus for JSON event envelopes.
///
/// Topics map to channels as `{prefix}.{topic}`; subscriptions use
/// `PSUBSCRIBE {prefix}.*` and filter locally against the pattern, which
/// keeps the channel-name scheme in one place.
#[derive(Debug, Clone)]
pub struct RedisEventBus {
    client: redis::Client,
    prefix: String,
}

impl RedisEventBus {
    pub fn new(redis_url: impl AsRef<str>, prefix: impl Into<String>) -> Result<Self, BusError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| BusError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            prefix: prefix.into(),
        })
    }

    fn channel(&self, topic: &str) -> String {
        format!("{}.{}", self.prefix, topic)
    }

    /// Liveness probe for readiness checks.
    pub async fn ping(&self) -> Result<(), BusError> {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || -> Result<(), BusError> {
            let mut conn = client
                .get_connection()
                .map_err(|e| BusError::Connection(e.to_string()))?;
            redis::cmd("PING")
                .query::<String>(&mut conn)
                .map_err(|e| BusError::Connection(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| BusError::Connection(format!("ping task panicked: {e}")))?
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, topic: &str, envelope: EventEnvelope) -> Result<(), BusError> {
        let payload = serde_json::to_string(&envelope)
            .map_err(|e| BusError::Serialization(e.to_string()))?;
        let channel = self.channel(topic);
        let client = self.client.clone();

        // The redis crate's plain client is blocking; keep the runtime free.
        tokio::task::spawn_blocking(move || -> Result<(), BusError> {
            let mut conn = client
                .get_connection()
                .map_err(|e| BusError::Connection(e.to_string()))?;
            let _: i64 = conn
                .publish(&channel, payload)
                .map_err(|e| BusError::Publish(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| BusError::Publish(format!("publish task panicked: {e}")))?
    }

    fn subscribe(&self, pattern: &str) -> EventSubscription {
        let topic_pattern = TopicPattern::parse(pattern);
        let filter = topic_pattern.clone();
        let (tx, rx) = mpsc::unbounded_channel();

        let client = self.client.clone();
        let prefix = self.prefix.clone();

        // Blocking receive loop; ends when the subscription is dropped.
        tokio::task::spawn_blocking(move || {
            let mut conn = match client.get_connection() {
                Ok(c) => c,
                Err(err) => {
                    warn!(error = %err, "redis subscribe connection failed");
                    return;
                }
            };

            let mut pubsub = conn.as_pubsub();
            if let Err(err) = pubsub.psubscribe(format!("{prefix}.*")) {
                warn!(error = %err, "redis psubscribe failed");
                return;
            }

            loop {
                let msg = match pubsub.get_message() {
                    Ok(m) => m,
                    Err(err) => {
                        warn!(error = %err, "redis subscription ended");
                        return;
                    }
                };

                let channel = msg.get_channel_name().to_string();
                let topic = channel
                    .strip_prefix(prefix.as_str())
                    .and_then(|rest| rest.strip_prefix('.'))
                    .unwrap_or(&channel);
                if !filter.matches(topic) {
                    continue;
                }

                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                let envelope: EventEnvelope = match serde_json::from_str(&payload) {
                    Ok(e) => e,
                    Err(err) => {
                        debug!(error = %err, "skipping undecodable bus message");
                        continue;
                    }
                };

                if tx.send(envelope).is_err() {
                    return;
                }
            }
        });

        EventSubscription::new(topic_pattern, rx)
    }
}
