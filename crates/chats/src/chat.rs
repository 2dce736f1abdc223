use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use flowra_core::{
    Aggregate, AggregateRoot, ChatId, CommandEffect, DomainError, UserId, ValidatedCommand,
    ValidationError, WorkspaceId,
};
use flowra_events::DomainEvent;

/// Chat titles share the task-title bound.
const MAX_TITLE_LEN: usize = 500;

fn validate_title(title: &str) -> Result<(), ValidationError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    let len = trimmed.chars().count();
    if len > MAX_TITLE_LEN {
        return Err(ValidationError::TitleTooLong {
            max: MAX_TITLE_LEN,
            got: len,
        });
    }
    Ok(())
}

// ── Commands ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateChat {
    pub chat_id: ChatId,
    pub workspace_id: WorkspaceId,
    pub title: String,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameChat {
    pub chat_id: ChatId,
    pub title: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddParticipant {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveParticipant {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChatCommand {
    Create(CreateChat),
    Rename(RenameChat),
    AddParticipant(AddParticipant),
    RemoveParticipant(RemoveParticipant),
}

impl ValidatedCommand for ChatCommand {
    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            ChatCommand::Create(cmd) => validate_title(&cmd.title),
            ChatCommand::Rename(cmd) => validate_title(&cmd.title),
            ChatCommand::AddParticipant(_) | ChatCommand::RemoveParticipant(_) => Ok(()),
        }
    }
}

// ── Events ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCreated {
    pub chat_id: ChatId,
    pub workspace_id: WorkspaceId,
    pub title: String,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRenamed {
    pub chat_id: ChatId,
    pub title: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantAdded {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRemoved {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChatEvent {
    Created(ChatCreated),
    Renamed(ChatRenamed),
    ParticipantAdded(ParticipantAdded),
    ParticipantRemoved(ParticipantRemoved),
}

impl DomainEvent for ChatEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ChatEvent::Created(_) => "chat.created",
            ChatEvent::Renamed(_) => "chat.renamed",
            ChatEvent::ParticipantAdded(_) => "chat.participant_added",
            ChatEvent::ParticipantRemoved(_) => "chat.participant_removed",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ChatEvent::Created(e) => e.occurred_at,
            ChatEvent::Renamed(e) => e.occurred_at,
            ChatEvent::ParticipantAdded(e) => e.occurred_at,
            ChatEvent::ParticipantRemoved(e) => e.occurred_at,
        }
    }
}

// ── Aggregate ───────────────────────────────────────────────────────────────

/// Aggregate root: a chat within a workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct Chat {
    id: ChatId,
    workspace_id: Option<WorkspaceId>,
    title: String,
    participants: BTreeSet<UserId>,
    created_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Chat {
    /// Create an empty, not-yet-created instance for rehydration.
    pub fn empty(id: ChatId) -> Self {
        Self {
            id,
            workspace_id: None,
            title: String::new(),
            participants: BTreeSet::new(),
            created_by: None,
            created_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn workspace_id(&self) -> Option<WorkspaceId> {
        self.workspace_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn participants(&self) -> &BTreeSet<UserId> {
        &self.participants
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::NotFound);
        }
        Ok(())
    }
}

impl AggregateRoot for Chat {
    type Id = ChatId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for Chat {
    type Command = ChatCommand;
    type Event = ChatEvent;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ChatEvent::Created(e) => {
                self.id = e.chat_id;
                self.workspace_id = Some(e.workspace_id);
                self.title = e.title.clone();
                self.created_by = Some(e.created_by);
                self.created_at = Some(e.occurred_at);
                // The creator participates from the start.
                self.participants.insert(e.created_by);
                self.created = true;
            }
            ChatEvent::Renamed(e) => {
                self.title = e.title.clone();
            }
            ChatEvent::ParticipantAdded(e) => {
                self.participants.insert(e.user_id);
            }
            ChatEvent::ParticipantRemoved(e) => {
                self.participants.remove(&e.user_id);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<CommandEffect<Self::Event>, DomainError> {
        match command {
            ChatCommand::Create(cmd) => {
                if self.created {
                    return Err(DomainError::AlreadyExists);
                }
                Ok(CommandEffect::one(ChatEvent::Created(ChatCreated {
                    chat_id: cmd.chat_id,
                    workspace_id: cmd.workspace_id,
                    title: cmd.title.trim().to_string(),
                    created_by: cmd.created_by,
                    occurred_at: cmd.occurred_at,
                })))
            }
            ChatCommand::Rename(cmd) => {
                self.ensure_created()?;
                let trimmed = cmd.title.trim();
                if self.title == trimmed {
                    return Ok(CommandEffect::Unchanged("title"));
                }
                Ok(CommandEffect::one(ChatEvent::Renamed(ChatRenamed {
                    chat_id: cmd.chat_id,
                    title: trimmed.to_string(),
                    occurred_at: cmd.occurred_at,
                })))
            }
            ChatCommand::AddParticipant(cmd) => {
                self.ensure_created()?;
                if self.participants.contains(&cmd.user_id) {
                    return Ok(CommandEffect::Unchanged("participants"));
                }
                Ok(CommandEffect::one(ChatEvent::ParticipantAdded(ParticipantAdded {
                    chat_id: cmd.chat_id,
                    user_id: cmd.user_id,
                    occurred_at: cmd.occurred_at,
                })))
            }
            ChatCommand::RemoveParticipant(cmd) => {
                self.ensure_created()?;
                if !self.participants.contains(&cmd.user_id) {
                    return Ok(CommandEffect::Unchanged("participants"));
                }
                Ok(CommandEffect::one(ChatEvent::ParticipantRemoved(ParticipantRemoved {
                    chat_id: cmd.chat_id,
                    user_id: cmd.user_id,
                    occurred_at: cmd.occurred_at,
                })))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created_chat() -> Chat {
        let id = ChatId::new();
        let mut chat = Chat::empty(id);
        let effect = chat
            .handle(&ChatCommand::Create(CreateChat {
                chat_id: id,
                workspace_id: WorkspaceId::new(),
                title: "  Platform team  ".to_string(),
                created_by: UserId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        for event in effect.events() {
            chat.apply(event);
        }
        chat
    }

    #[test]
    fn create_trims_title_and_adds_creator_as_participant() {
        let chat = created_chat();
        assert_eq!(chat.title(), "Platform team");
        assert_eq!(chat.participants().len(), 1);
        assert!(chat.participants().contains(&chat.created_by().unwrap()));
        assert_eq!(chat.version(), 1);
    }

    #[test]
    fn adding_present_participant_is_idempotent() {
        let mut chat = created_chat();
        let user = UserId::new();

        let effect = chat
            .handle(&ChatCommand::AddParticipant(AddParticipant {
                chat_id: *chat.id(),
                user_id: user,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        for event in effect.events() {
            chat.apply(event);
        }
        assert_eq!(chat.version(), 2);

        let repeat = chat
            .handle(&ChatCommand::AddParticipant(AddParticipant {
                chat_id: *chat.id(),
                user_id: user,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert_eq!(repeat, CommandEffect::Unchanged("participants"));
    }

    #[test]
    fn removing_absent_participant_is_idempotent() {
        let chat = created_chat();
        let effect = chat
            .handle(&ChatCommand::RemoveParticipant(RemoveParticipant {
                chat_id: *chat.id(),
                user_id: UserId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert!(effect.is_unchanged());
    }

    #[test]
    fn rename_to_same_title_is_idempotent() {
        let chat = created_chat();
        let effect = chat
            .handle(&ChatCommand::Rename(RenameChat {
                chat_id: *chat.id(),
                title: " Platform team ".to_string(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert_eq!(effect, CommandEffect::Unchanged("title"));
    }

    #[test]
    fn rename_validates_title() {
        let cmd = ChatCommand::Rename(RenameChat {
            chat_id: ChatId::new(),
            title: "".to_string(),
            occurred_at: Utc::now(),
        });
        assert_eq!(cmd.validate().unwrap_err(), ValidationError::EmptyTitle);
    }

    #[test]
    fn replay_reproduces_participants() {
        let mut chat = created_chat();
        let mut history = Vec::new();
        let alice = UserId::new();
        let bob = UserId::new();

        for cmd in [
            ChatCommand::AddParticipant(AddParticipant {
                chat_id: *chat.id(),
                user_id: alice,
                occurred_at: Utc::now(),
            }),
            ChatCommand::AddParticipant(AddParticipant {
                chat_id: *chat.id(),
                user_id: bob,
                occurred_at: Utc::now(),
            }),
            ChatCommand::RemoveParticipant(RemoveParticipant {
                chat_id: *chat.id(),
                user_id: alice,
                occurred_at: Utc::now(),
            }),
        ] {
            let effect = chat.handle(&cmd).unwrap();
            for event in effect.events() {
                chat.apply(event);
                history.push(event.clone());
            }
        }

        assert!(chat.participants().contains(&bob));
        assert!(!chat.participants().contains(&alice));
        assert_eq!(chat.version(), 4);
    }
}
