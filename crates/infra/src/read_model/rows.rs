//! Row types for the task board and chat list, with their event folds.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use flowra_chats::ChatEvent;
use flowra_core::{AggregateId, ChatId, TaskId, UserId, WorkspaceId};
use flowra_events::{AggregateType, EventEnvelope, Projection};
use flowra_tasks::{EntityType, Priority, TaskEvent, TaskStatus};

use super::ReadModelRow;

/// One task on a board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskBoardRow {
    pub id: TaskId,
    pub chat_id: ChatId,
    pub title: String,
    pub entity_type: EntityType,
    pub status: TaskStatus,
    pub priority: Priority,
    pub assignee_id: Option<UserId>,
    pub due_date: Option<DateTime<Utc>>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub custom_fields: BTreeMap<String, JsonValue>,
    pub version: u64,
}

impl Default for TaskBoardRow {
    fn default() -> Self {
        Self {
            id: TaskId::from_uuid(Uuid::nil()),
            chat_id: ChatId::from_uuid(Uuid::nil()),
            title: String::new(),
            entity_type: EntityType::default(),
            status: TaskStatus::ToDo,
            priority: Priority::default(),
            assignee_id: None,
            due_date: None,
            created_by: UserId::from_uuid(Uuid::nil()),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            custom_fields: BTreeMap::new(),
            version: 0,
        }
    }
}

impl ReadModelRow for TaskBoardRow {
    const TABLE: &'static str = "task_board";

    fn row_id(&self) -> AggregateId {
        self.id.into()
    }

    fn row_version(&self) -> u64 {
        self.version
    }

    fn scope_id(&self) -> Option<AggregateId> {
        Some(self.chat_id.into())
    }
}

impl Projection for TaskBoardRow {
    fn apply(&mut self, envelope: &EventEnvelope) {
        if envelope.aggregate_type() != &AggregateType::Task {
            return;
        }

        // Unknown or undecodable payloads still advance the version: the
        // event was observed, it just carries nothing for this view.
        if let Ok(event) = envelope.decode::<TaskEvent>() {
            match event {
                TaskEvent::Created(e) => {
                    self.id = e.task_id;
                    self.chat_id = e.chat_id;
                    self.title = e.title;
                    self.entity_type = e.entity_type;
                    self.status = e.status;
                    self.priority = e.priority;
                    self.assignee_id = e.assignee_id;
                    self.due_date = e.due_date;
                    self.created_by = e.created_by;
                    self.created_at = e.occurred_at;
                }
                TaskEvent::StatusChanged(e) => self.status = e.to,
                TaskEvent::Assigned(e) => self.assignee_id = e.assignee_id,
                TaskEvent::PriorityChanged(e) => self.priority = e.to,
                TaskEvent::DueDateSet(e) => self.due_date = e.due_date,
                TaskEvent::TitleUpdated(e) => self.title = e.title,
                TaskEvent::CustomFieldSet(e) => {
                    self.custom_fields.insert(e.key, e.value);
                }
            }
        }

        self.version = envelope.version();
    }
}

/// One chat in a workspace listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatListRow {
    pub id: ChatId,
    pub workspace_id: WorkspaceId,
    pub title: String,
    pub participants: BTreeSet<UserId>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl Default for ChatListRow {
    fn default() -> Self {
        Self {
            id: ChatId::from_uuid(Uuid::nil()),
            workspace_id: WorkspaceId::from_uuid(Uuid::nil()),
            title: String::new(),
            participants: BTreeSet::new(),
            created_by: UserId::from_uuid(Uuid::nil()),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            version: 0,
        }
    }
}

impl ReadModelRow for ChatListRow {
    const TABLE: &'static str = "chat_list";

    fn row_id(&self) -> AggregateId {
        self.id.into()
    }

    fn row_version(&self) -> u64 {
        self.version
    }

    fn scope_id(&self) -> Option<AggregateId> {
        Some(self.workspace_id.into())
    }
}

impl Projection for ChatListRow {
    fn apply(&mut self, envelope: &EventEnvelope) {
        if envelope.aggregate_type() != &AggregateType::Chat {
            return;
        }

        if let Ok(event) = envelope.decode::<ChatEvent>() {
            match event {
                ChatEvent::Created(e) => {
                    self.id = e.chat_id;
                    self.workspace_id = e.workspace_id;
                    self.title = e.title;
                    self.created_by = e.created_by;
                    self.created_at = e.occurred_at;
                    self.participants.insert(e.created_by);
                }
                ChatEvent::Renamed(e) => self.title = e.title,
                ChatEvent::ParticipantAdded(e) => {
                    self.participants.insert(e.user_id);
                }
                ChatEvent::ParticipantRemoved(e) => {
                    self.participants.remove(&e.user_id);
                }
            }
        }

        self.version = envelope.version();
    }
}
