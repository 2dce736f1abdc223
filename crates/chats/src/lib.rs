//! Chat aggregate: conversations inside a workspace.

pub mod chat;

pub use chat::{
    AddParticipant, Chat, ChatCommand, ChatEvent, CreateChat, RemoveParticipant, RenameChat,
};
