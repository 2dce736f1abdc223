//! Transactional outbox: durable handoff between the append transaction and
//! asynchronous bus delivery.
//!
//! An event appended by the store appears here exactly once (the backends
//! stage entries inside the append transaction). The worker drains entries
//! to the event bus at-least-once; the `pending -> processing` status
//! transition is the claim lock, and entries stuck in `processing` past the
//! visibility timeout are reclaimed by the next poll.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;
pub mod worker;

pub use in_memory::InMemoryOutbox;
pub use postgres::PostgresOutbox;
pub use r#trait::{Outbox, OutboxEntry, OutboxError, OutboxStatus};
pub use worker::{OutboxWorker, OutboxWorkerConfig};
