//! Task aggregate: board items living inside a chat.

pub mod status;
pub mod task;

pub use status::{EntityType, Priority, TaskStatus};
pub use task::{
    AssignTask, ChangePriority, ChangeStatus, CreateTask, SetCustomField, SetDueDate, Task,
    TaskCommand, TaskEvent, UpdateTitle,
};

/// Upper bound on task and chat titles, in characters.
pub const MAX_TITLE_LEN: usize = 500;

/// Due dates earlier than this year are rejected as input mistakes.
pub const MIN_DUE_DATE_YEAR: i32 = 2020;
