use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use flowra_core::{AggregateId, UserId};

/// Aggregate type discriminator carried on every envelope.
///
/// Open set: consumers built before a new aggregate type existed keep
/// working because unknown values decode into `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AggregateType {
    Task,
    Chat,
    Workspace,
    Other(String),
}

impl AggregateType {
    pub fn as_str(&self) -> &str {
        match self {
            AggregateType::Task => "task",
            AggregateType::Chat => "chat",
            AggregateType::Workspace => "workspace",
            AggregateType::Other(s) => s,
        }
    }
}

impl From<String> for AggregateType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "task" => AggregateType::Task,
            "chat" => AggregateType::Chat,
            "workspace" => AggregateType::Workspace,
            _ => AggregateType::Other(value),
        }
    }
}

impl From<AggregateType> for String {
    fn from(value: AggregateType) -> Self {
        value.as_str().to_string()
    }
}

impl core::fmt::Display for AggregateType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Correlation/causation/actor metadata attached to every event.
///
/// All fields are optional and default-decoded so envelopes written by older
/// producers stay readable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<UserId>,
}

impl EventMetadata {
    pub fn for_actor(actor_id: UserId) -> Self {
        Self {
            actor_id: Some(actor_id),
            ..Self::default()
        }
    }
}

/// Envelope for a committed event: the unit of persistence and transport.
///
/// `version` is the 1-based, strictly increasing position of the event in
/// its aggregate stream, assigned by the event store at append time.
/// Equality is by `event_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    event_id: Uuid,
    aggregate_id: AggregateId,
    aggregate_type: AggregateType,
    event_type: String,
    version: u64,
    occurred_at: DateTime<Utc>,
    payload: JsonValue,
    #[serde(default)]
    metadata: EventMetadata,
}

impl EventEnvelope {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: Uuid,
        aggregate_id: AggregateId,
        aggregate_type: AggregateType,
        event_type: impl Into<String>,
        version: u64,
        occurred_at: DateTime<Utc>,
        payload: JsonValue,
        metadata: EventMetadata,
    ) -> Self {
        Self {
            event_id,
            aggregate_id,
            aggregate_type,
            event_type: event_type.into(),
            version,
            occurred_at,
            payload,
            metadata,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &AggregateType {
        &self.aggregate_type
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn into_payload(self) -> JsonValue {
        self.payload
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    /// Bus topic for this event, derived from aggregate and event type.
    ///
    /// Event types are already namespaced ("task.status_changed"); a bare
    /// tag is prefixed with the aggregate type so routing stays uniform.
    pub fn topic(&self) -> String {
        let prefix = self.aggregate_type.as_str();
        if self.event_type.starts_with(prefix)
            && self.event_type[prefix.len()..].starts_with('.')
        {
            self.event_type.clone()
        } else {
            format!("{}.{}", prefix, self.event_type)
        }
    }

    /// Decode the payload into a typed domain event.
    pub fn decode<E: serde::de::DeserializeOwned>(&self) -> Result<E, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

impl PartialEq for EventEnvelope {
    fn eq(&self, other: &Self) -> bool {
        self.event_id == other.event_id
    }
}

impl Eq for EventEnvelope {}

impl core::hash::Hash for EventEnvelope {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.event_id.hash(state);
    }
}
