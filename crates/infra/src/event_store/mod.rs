//! Append-only event store boundary.
//!
//! Defines the storage abstraction for per-aggregate event streams plus two
//! backends. Appends are transactional with the outbox staging for the same
//! events: the in-memory backend collocates both tables behind one lock, the
//! postgres backend spans both inside one transaction.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, UncommittedEvent};
