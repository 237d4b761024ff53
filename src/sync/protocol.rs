//! JSON WebSocket protocol for room collaboration.
//!
//! Every frame is a JSON object tagged by `type` (kebab-case message name)
//! with camelCase fields, e.g.
//! `{"type":"cursor-update","fileId":"f1","line":3,"column":7}`.
//! Binary frames carrying the same UTF-8 JSON are accepted too.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::chat::ChatMessage;
use super::{FileId, ProjectId, UserId};
use crate::room::CollaboratorState;

/// Maximum frame size (16MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Failed to encode message: {0}")]
    Encode(serde_json::Error),

    #[error("Message is not valid UTF-8")]
    InvalidUtf8,

    #[error("Message too large: {0} bytes (max: {1})")]
    MessageTooLarge(usize, usize),
}

/// End of a selection; the start is the cursor position itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub end_line: u32,
    pub end_column: u32,
}

/// Caret position attached to a file update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub line: u32,
    pub column: u32,
}

/// Extra client fields carried through a relay untouched
pub type Passthrough = serde_json::Map<String, serde_json::Value>;

/// File tree entry as created by a client. Only `id` is required; everything
/// else is relayed untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub id: FileId,
    #[serde(default)]
    pub name: String,
    /// "file" or "folder"
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(flatten)]
    pub extra: Passthrough,
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Join the room of a project
    JoinRoom { project_id: ProjectId },

    /// Full content of a file after a local edit
    FileUpdate {
        file_id: FileId,
        content: String,
        #[serde(default)]
        cursor: Option<CursorPosition>,
    },

    /// Local cursor moved
    CursorUpdate {
        file_id: FileId,
        line: u32,
        column: u32,
        #[serde(default)]
        selection: Option<Selection>,
    },

    FileCreated { file: FileDescriptor },

    FileDeleted {
        file_id: FileId,
        #[serde(flatten)]
        extra: Passthrough,
    },

    FileRenamed {
        file_id: FileId,
        new_name: String,
        #[serde(flatten)]
        extra: Passthrough,
    },

    /// Chat submission; mentions are always derived from `content`
    ChatMessage {
        content: String,
        #[serde(default)]
        mentions: Option<Vec<String>>,
    },

    TypingStart,

    TypingStop,

    /// Application-level keepalive
    Ping { timestamp: u64 },
}

impl ClientMessage {
    /// Wire name of the message, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::JoinRoom { .. } => "join-room",
            ClientMessage::FileUpdate { .. } => "file-update",
            ClientMessage::CursorUpdate { .. } => "cursor-update",
            ClientMessage::FileCreated { .. } => "file-created",
            ClientMessage::FileDeleted { .. } => "file-deleted",
            ClientMessage::FileRenamed { .. } => "file-renamed",
            ClientMessage::ChatMessage { .. } => "chat-message",
            ClientMessage::TypingStart => "typing-start",
            ClientMessage::TypingStop => "typing-stop",
            ClientMessage::Ping { .. } => "ping",
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Full collaborator list, sent to a joining connection only
    CollaboratorsUpdated { collaborators: Vec<CollaboratorState> },

    UserJoined { user_id: UserId, email: String },

    UserLeft { user_id: UserId, email: String },

    FileUpdated {
        file_id: FileId,
        content: String,
        user_id: UserId,
        timestamp: DateTime<Utc>,
    },

    CursorUpdated {
        user_id: UserId,
        file_id: FileId,
        line: u32,
        column: u32,
        selection: Option<Selection>,
    },

    FileCreated {
        file: FileDescriptor,
        actor_id: UserId,
        timestamp: DateTime<Utc>,
    },

    FileDeleted {
        file_id: FileId,
        actor_id: UserId,
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        extra: Passthrough,
    },

    FileRenamed {
        file_id: FileId,
        new_name: String,
        actor_id: UserId,
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        extra: Passthrough,
    },

    ChatMessage(ChatMessage),

    UserTyping { user_id: UserId, email: String },

    UserStoppedTyping { user_id: UserId, email: String },

    Pong { timestamp: u64, server_time: i64 },
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::CollaboratorsUpdated { .. } => "collaborators-updated",
            ServerMessage::UserJoined { .. } => "user-joined",
            ServerMessage::UserLeft { .. } => "user-left",
            ServerMessage::FileUpdated { .. } => "file-updated",
            ServerMessage::CursorUpdated { .. } => "cursor-updated",
            ServerMessage::FileCreated { .. } => "file-created",
            ServerMessage::FileDeleted { .. } => "file-deleted",
            ServerMessage::FileRenamed { .. } => "file-renamed",
            ServerMessage::ChatMessage(_) => "chat-message",
            ServerMessage::UserTyping { .. } => "user-typing",
            ServerMessage::UserStoppedTyping { .. } => "user-stopped-typing",
            ServerMessage::Pong { .. } => "pong",
        }
    }
}

/// Codec between WebSocket frames and protocol messages
pub struct WireProtocol;

impl WireProtocol {
    /// Decode a text frame
    pub fn decode_client(text: &str) -> Result<ClientMessage, ProtocolError> {
        if text.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(text.len(), MAX_MESSAGE_SIZE));
        }
        Ok(serde_json::from_str(text)?)
    }

    /// Decode a binary frame holding UTF-8 JSON
    pub fn decode_client_bytes(data: &[u8]) -> Result<ClientMessage, ProtocolError> {
        let text = std::str::from_utf8(data).map_err(|_| ProtocolError::InvalidUtf8)?;
        Self::decode_client(text)
    }

    /// Encode a server message as a text frame payload
    pub fn encode_server(msg: &ServerMessage) -> Result<String, ProtocolError> {
        let text = serde_json::to_string(msg).map_err(ProtocolError::Encode)?;
        if text.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(text.len(), MAX_MESSAGE_SIZE));
        }
        Ok(text)
    }
}

#[cfg(test)]
impl WireProtocol {
    pub fn decode_server(text: &str) -> Result<ServerMessage, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}
