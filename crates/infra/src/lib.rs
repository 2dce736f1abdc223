//! Infrastructure: event store, outbox, bus transports, read models,
//! projectors, repair queue, and the command runtime that ties the write
//! path together.

pub mod event_bus;
pub mod event_store;
pub mod outbox;
pub mod projections;
pub mod read_model;
pub mod repair;
pub mod runtime;
pub mod workers;


pub use event_store::{
    EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore, UncommittedEvent,
};
pub use outbox::{
    InMemoryOutbox, Outbox, OutboxEntry, OutboxError, OutboxStatus, OutboxWorker,
    OutboxWorkerConfig, PostgresOutbox,
};
pub use projections::{
    ChatListProjector, ProjectionError, Projector, ProjectorHandler, TaskBoardProjector,
};
pub use read_model::{
    ChatListRow, InMemoryReadModelStore, PostgresReadModelStore, ReadModelError, ReadModelRow,
    ReadModelStore, TaskBoardRow,
};
pub use repair::{
    InMemoryRepairQueue, PostgresRepairQueue, RepairError, RepairQueue, RepairStats, RepairStatus,
    RepairTask, RepairWorker, RepairWorkerConfig,
};
pub use runtime::{CommandError, CommandResult, CommandRuntime};
pub use workers::WorkerHandle;
