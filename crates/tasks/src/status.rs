//! Task status, priority, and entity-type value objects.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use flowra_core::ValidationError;

/// Kanban column a task sits in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    ToDo,
    InProgress,
    InReview,
    Done,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Backlog => "backlog",
            TaskStatus::ToDo => "to_do",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::InReview => "in_review",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Whether `self -> to` is a permitted (non-identity) transition.
    ///
    /// Cancelled tasks can only be pulled back to the backlog; the backlog
    /// cannot jump straight into review. Identity transitions are not the
    /// table's concern: the aggregate treats them as idempotent no-ops
    /// before consulting it.
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        match (*self, to) {
            (from, to) if from == to => false,
            (Cancelled, Backlog) => true,
            (Cancelled, _) => false,
            (Backlog, InReview) => false,
            _ => true,
        }
    }
}

impl core::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backlog" => Ok(TaskStatus::Backlog),
            "to_do" | "todo" => Ok(TaskStatus::ToDo),
            "in_progress" => Ok(TaskStatus::InProgress),
            "in_review" => Ok(TaskStatus::InReview),
            "done" => Ok(TaskStatus::Done),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(ValidationError::InvalidStatus(other.to_string())),
        }
    }
}

/// Task priority. Defaults to `Medium` on creation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl core::fmt::Display for Priority {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(ValidationError::InvalidPriority(other.to_string())),
        }
    }
}

/// Kind of board item. Defaults to `Task` on creation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    #[default]
    Task,
    Bug,
    Epic,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Task => "task",
            EntityType::Bug => "bug",
            EntityType::Epic => "epic",
        }
    }
}

impl core::fmt::Display for EntityType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(EntityType::Task),
            "bug" => Ok(EntityType::Bug),
            "epic" => Ok(EntityType::Epic),
            other => Err(ValidationError::InvalidEntityType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TaskStatus::*;
    use super::*;

    const ALL: [TaskStatus; 6] = [Backlog, ToDo, InProgress, InReview, Done, Cancelled];

    #[test]
    fn transition_table_matches_the_board_rules() {
        // (from, to) pairs the table refuses; everything else (excluding
        // identity) is allowed.
        let refused = [
            (Backlog, InReview),
            (Cancelled, ToDo),
            (Cancelled, InProgress),
            (Cancelled, InReview),
            (Cancelled, Done),
        ];

        for from in ALL {
            for to in ALL {
                if from == to {
                    assert!(!from.can_transition_to(to), "{from} -> {to} is identity");
                    continue;
                }
                let expected = !refused.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{from} -> {to}: expected allowed={expected}"
                );
            }
        }
    }

    #[test]
    fn cancelled_only_returns_to_backlog() {
        assert!(Cancelled.can_transition_to(Backlog));
        for to in [ToDo, InProgress, InReview, Done] {
            assert!(!Cancelled.can_transition_to(to));
        }
    }

    #[test]
    fn done_reopens_anywhere() {
        for to in [Backlog, ToDo, InProgress, InReview, Cancelled] {
            assert!(Done.can_transition_to(to));
        }
    }

    #[test]
    fn status_parses_both_todo_spellings() {
        assert_eq!("to_do".parse::<TaskStatus>().unwrap(), ToDo);
        assert_eq!("todo".parse::<TaskStatus>().unwrap(), ToDo);
    }

    #[test]
    fn unknown_values_yield_typed_errors() {
        assert!(matches!(
            "urgent".parse::<Priority>(),
            Err(ValidationError::InvalidPriority(_))
        ));
        assert!(matches!(
            "story".parse::<EntityType>(),
            Err(ValidationError::InvalidEntityType(_))
        ));
        assert!(matches!(
            "paused".parse::<TaskStatus>(),
            Err(ValidationError::InvalidStatus(_))
        ));
    }

    #[test]
    fn serde_uses_snake_case_tags() {
        assert_eq!(serde_json::to_value(InProgress).unwrap(), serde_json::json!("in_progress"));
        assert_eq!(serde_json::to_value(Priority::Critical).unwrap(), serde_json::json!("critical"));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn any_status() -> impl Strategy<Value = TaskStatus> {
            proptest::sample::select(ALL.to_vec())
        }

        proptest! {
            // Liveness: the table must never strand a task.
            #[test]
            fn no_status_is_a_dead_end(from in any_status()) {
                prop_assert!(ALL.iter().any(|to| from.can_transition_to(*to)));
            }

            #[test]
            fn leaving_cancelled_only_reaches_backlog(to in any_status()) {
                if Cancelled.can_transition_to(to) {
                    prop_assert_eq!(to, Backlog);
                }
            }

            // Identity moves are the aggregate's idempotent no-op, never a
            // table entry.
            #[test]
            fn permitted_transitions_are_never_identity(
                from in any_status(),
                to in any_status(),
            ) {
                if from.can_transition_to(to) {
                    prop_assert_ne!(from, to);
                }
            }

            // Every status can reach every other through some chain of
            // permitted moves (Cancelled detours through Backlog).
            #[test]
            fn any_status_is_reachable_from_any_other(
                from in any_status(),
                to in any_status(),
            ) {
                let mut reachable = vec![from];
                loop {
                    let next: Vec<TaskStatus> = ALL
                        .iter()
                        .copied()
                        .filter(|candidate| {
                            !reachable.contains(candidate)
                                && reachable.iter().any(|seen| seen.can_transition_to(*candidate))
                        })
                        .collect();
                    if next.is_empty() {
                        break;
                    }
                    reachable.extend(next);
                }
                prop_assert!(reachable.contains(&to), "{} cannot reach {}", from, to);
            }
        }
    }
}
