//! Aggregate traits for event-sourced domain models.

use crate::error::DomainError;

/// Aggregate root marker + minimal interface.
///
/// Intentionally small so domain crates can decide how they model state
/// transitions without bringing in any infrastructure concerns.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// Corresponds to the number of events applied (the stream revision).
    fn version(&self) -> u64;
}

/// Outcome of deciding a command against current state.
///
/// `Unchanged` is the idempotent outcome: the proposed state equals the
/// current state, so no event is emitted and the version stays stable. The
/// carried label names what was left unchanged ("status", "title", ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandEffect<E> {
    Events(Vec<E>),
    Unchanged(&'static str),
}

impl<E> CommandEffect<E> {
    pub fn one(event: E) -> Self {
        Self::Events(vec![event])
    }

    pub fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged(_))
    }

    pub fn events(&self) -> &[E] {
        match self {
            Self::Events(events) => events,
            Self::Unchanged(_) => &[],
        }
    }

    pub fn into_events(self) -> Vec<E> {
        match self {
            Self::Events(events) => events,
            Self::Unchanged(_) => Vec::new(),
        }
    }
}

/// A command that can be checked for well-formedness before any I/O.
///
/// Validation is structural (ids, lengths, ranges); business rules that
/// depend on current state belong in [`Aggregate::handle`].
pub trait ValidatedCommand {
    fn validate(&self) -> Result<(), crate::error::ValidationError>;
}

/// Event-sourced aggregate: replayed from history, decides via `handle`.
///
/// - `apply` must be infallible and deterministic (history already happened).
/// - `handle` must not mutate state; it only decides which events follow.
pub trait Aggregate: AggregateRoot {
    type Command;
    type Event;

    /// Apply a single historical event, advancing the version by one.
    fn apply(&mut self, event: &Self::Event);

    /// Decide which events a command produces given current state.
    fn handle(&self, command: &Self::Command) -> Result<CommandEffect<Self::Event>, DomainError>;
}
