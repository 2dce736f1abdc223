//! Command execution pipeline (application-level orchestration).
//!
//! Flow: Command → Validate → Load events → Rehydrate aggregate → Decide →
//! Append (optimistic, transactional with outbox staging).
//!
//! This module contains no storage logic itself; it composes the store
//! trait. Publication is not part of the pipeline: the outbox worker owns
//! delivery, so a crash after commit can never lose events.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use flowra_core::{
    Aggregate, AggregateId, CommandEffect, DomainError, ExpectedVersion, ValidatedCommand,
    ValidationError,
};
use flowra_events::{AggregateType, DomainEvent, EventEnvelope, EventMetadata};

use crate::event_store::{EventStore, EventStoreError, UncommittedEvent};

#[derive(Debug, Error)]
pub enum CommandError {
    /// The command was malformed; nothing was loaded or written.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The aggregate refused the command.
    #[error(transparent)]
    Domain(DomainError),

    /// Someone else appended first; the caller may retry at its discretion.
    #[error("concurrent update: {0}")]
    ConcurrentUpdate(String),

    /// Historical payloads failed to decode into the aggregate event type.
    #[error("event deserialization failed: {0}")]
    Deserialize(String),

    /// The loaded stream violates store invariants (corrupt backend).
    #[error("corrupt stream: {0}")]
    CorruptStream(String),

    /// Persisting to the event store failed.
    #[error(transparent)]
    Store(EventStoreError),
}

impl From<DomainError> for CommandError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(v) => CommandError::Validation(v),
            other => CommandError::Domain(other),
        }
    }
}

impl From<EventStoreError> for CommandError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::ConcurrencyConflict { expected, found } => {
                CommandError::ConcurrentUpdate(format!(
                    "expected version {expected:?}, found {found}"
                ))
            }
            other => CommandError::Store(other),
        }
    }
}

/// Outcome of a successfully executed command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub aggregate_id: AggregateId,
    pub new_version: u64,
    pub emitted_events: Vec<EventEnvelope>,
    pub success: bool,
    pub message: Option<String>,
}

/// Reusable command execution engine.
///
/// Aggregates must be deterministic and side-effect free; everything
/// observable happens through the appended events.
#[derive(Debug, Clone)]
pub struct CommandRuntime<S> {
    store: S,
}

impl<S> CommandRuntime<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S> CommandRuntime<S>
where
    S: EventStore,
{
    /// Run a command through the full pipeline.
    ///
    /// `make_aggregate` creates the empty instance to rehydrate. The append
    /// uses `expected_version = version before decide`, so a concurrent
    /// writer turns into [`CommandError::ConcurrentUpdate`] instead of a
    /// lost update.
    #[instrument(
        skip(self, command, metadata, make_aggregate),
        fields(aggregate_id = %aggregate_id, aggregate_type = %aggregate_type),
        err
    )]
    pub async fn execute<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: AggregateType,
        command: A::Command,
        metadata: EventMetadata,
        make_aggregate: impl FnOnce() -> A + Send,
    ) -> Result<CommandResult, CommandError>
    where
        A: Aggregate + Send,
        A::Command: ValidatedCommand,
        A::Event: DomainEvent + Serialize + DeserializeOwned,
    {
        // 1) Validate shape before any IO.
        command.validate()?;

        // 2) Load history.
        let history = self.store.load_events(aggregate_id).await?;
        validate_loaded_stream(aggregate_id, &history)?;

        // 3) Rehydrate.
        let mut aggregate = make_aggregate();
        for envelope in &history {
            let event: A::Event = envelope
                .decode()
                .map_err(|e| CommandError::Deserialize(format!(
                    "version {}: {e}",
                    envelope.version()
                )))?;
            aggregate.apply(&event);
        }
        let version_before = flowra_core::AggregateRoot::version(&aggregate);

        // 4) Decide.
        let effect = aggregate.handle(&command)?;
        let events = match effect {
            CommandEffect::Unchanged(what) => {
                return Ok(CommandResult {
                    aggregate_id,
                    new_version: version_before,
                    emitted_events: vec![],
                    success: true,
                    message: Some(format!("{what} unchanged (idempotent operation)")),
                });
            }
            CommandEffect::Events(events) => events,
        };

        // 5) Append with the pre-decide expectation.
        let expected = if version_before == 0 {
            ExpectedVersion::NoStream
        } else {
            ExpectedVersion::Exact(version_before)
        };
        let uncommitted = events
            .iter()
            .map(|event| {
                UncommittedEvent::from_typed(
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    event,
                    metadata.clone(),
                )
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(CommandError::Store)?;

        let committed = self
            .store
            .append_events(aggregate_id, uncommitted, expected)
            .await?;

        let new_version = committed.last().map(|e| e.version()).unwrap_or(version_before);
        Ok(CommandResult {
            aggregate_id,
            new_version,
            emitted_events: committed,
            success: true,
            message: None,
        })
    }
}

/// Defend against a buggy backend returning a foreign or non-contiguous
/// stream.
fn validate_loaded_stream(
    aggregate_id: AggregateId,
    stream: &[EventEnvelope],
) -> Result<(), CommandError> {
    let mut last = 0u64;
    for (idx, envelope) in stream.iter().enumerate() {
        if envelope.aggregate_id() != aggregate_id {
            return Err(CommandError::CorruptStream(format!(
                "loaded stream contains a foreign aggregate_id at index {idx}"
            )));
        }
        if envelope.version() != last + 1 {
            return Err(CommandError::CorruptStream(format!(
                "non-contiguous version at index {idx}: expected {}, found {}",
                last + 1,
                envelope.version()
            )));
        }
        last = envelope.version();
    }
    Ok(())
}
