//! Event model and pub/sub contract shared by the write and read sides.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;
pub mod projection;
pub mod runner;

pub use bus::{BusError, EventBus, EventSubscription, TopicPattern};
pub use envelope::{AggregateType, EventEnvelope, EventMetadata};
pub use event::DomainEvent;
pub use handler::{EventHandler, HandlerError};
pub use in_memory_bus::InMemoryEventBus;
pub use projection::Projection;
pub use runner::{SubscriberConfig, SubscriberHandle, spawn_subscriber};
