//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a workspace (the outermost collaboration boundary).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(Uuid);

/// Identifier of a chat within a workspace.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(Uuid);

/// Identifier of a task on a chat's board.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

/// Identifier of a user (actor identity).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

/// Identifier of an aggregate stream, independent of aggregate type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

macro_rules! uuid_id {
    ($ty:ident) => {
        impl $ty {
            /// Mint a fresh id. UUIDv7, so ids sort by creation time; tests
            /// that need determinism construct ids from fixed uuids instead.
            pub fn new() -> Self {
                $ty(Uuid::now_v7())
            }

            pub const fn from_uuid(value: Uuid) -> Self {
                $ty(value)
            }

            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $ty {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $ty {
            fn from(value: Uuid) -> Self {
                $ty(value)
            }
        }

        impl From<$ty> for Uuid {
            fn from(id: $ty) -> Self {
                id.0
            }
        }

        impl core::fmt::Display for $ty {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $ty {
            type Err = DomainError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                Uuid::from_str(raw).map($ty).map_err(|e| {
                    DomainError::invalid_id(format!(concat!(stringify!($ty), ": {}"), e))
                })
            }
        }
    };
}

uuid_id!(WorkspaceId);
uuid_id!(ChatId);
uuid_id!(TaskId);
uuid_id!(UserId);
uuid_id!(AggregateId);

impl From<TaskId> for AggregateId {
    fn from(value: TaskId) -> Self {
        Self(value.0)
    }
}

impl From<ChatId> for AggregateId {
    fn from(value: ChatId) -> Self {
        Self(value.0)
    }
}

impl From<WorkspaceId> for AggregateId {
    fn from(value: WorkspaceId) -> Self {
        Self(value.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "not-a-uuid".parse::<UserId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(_)));
    }

    #[test]
    fn aggregate_id_from_task_id_preserves_uuid() {
        let task = TaskId::new();
        let agg: AggregateId = task.into();
        assert_eq!(task.as_uuid(), agg.as_uuid());
    }
}
