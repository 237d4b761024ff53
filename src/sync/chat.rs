//! Chat relay.
//!
//! Chat messages are stamped, mention-parsed and fanned out to the whole
//! room, sender included, since the sender renders its own message from the
//! echo. Nothing is kept after the broadcast.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::protocol::ServerMessage;
use super::server::Connection;
use super::{CollabError, CollabResult, UserId};
use crate::room::Room;

/// A chat message as broadcast to the room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    pub sender_id: UserId,
    pub sender_email: String,
    pub timestamp: DateTime<Utc>,
    /// `@name` tokens in order of appearance
    pub mentions: Vec<String>,
}

impl ChatMessage {
    pub fn new(
        content: impl Into<String>,
        sender_id: impl Into<String>,
        sender_email: impl Into<String>,
    ) -> Self {
        let content = content.into();
        let mentions = parse_mentions(&content);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content,
            sender_id: sender_id.into(),
            sender_email: sender_email.into(),
            timestamp: Utc::now(),
            mentions,
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Extract `@name` tokens.
///
/// A mention is `@` followed by one or more `[A-Za-z0-9_]`, where the `@`
/// does not itself follow a word character (so e-mail addresses are not
/// mentions). Case is preserved; names are not checked against the room.
pub fn parse_mentions(content: &str) -> Vec<String> {
    let mut mentions = Vec::new();
    let mut prev: Option<char> = None;
    let mut chars = content.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if c == '@' && !prev.is_some_and(is_word_char) {
            let start = idx + 1;
            let mut end = start;
            while let Some(&(next_idx, next)) = chars.peek() {
                if !is_word_char(next) {
                    break;
                }
                end = next_idx + next.len_utf8();
                prev = Some(next);
                chars.next();
            }
            if end > start {
                mentions.push(content[start..end].to_string());
                continue;
            }
        }
        prev = Some(c);
    }

    mentions
}

/// Broadcast a chat message to every member of the sender's room, sender included
pub fn post_message(room: &Room, conn: &Connection, content: &str) -> CollabResult<ChatMessage> {
    let state = room.lock();
    if !state.is_member(&conn.id) {
        return Err(CollabError::NotJoined);
    }

    let message = ChatMessage::new(content, &conn.identity.user_id, &conn.identity.email);
    let reached = state.broadcast(&ServerMessage::ChatMessage(message.clone()), None);

    debug!(
        project_id = room.project_id(),
        user_id = %conn.identity.user_id,
        mentions = message.mentions.len(),
        reached,
        "Chat message"
    );

    Ok(message)
}
