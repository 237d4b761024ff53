//! Real-time relay layer for project rooms.
//!
//! This module implements everything that happens after a connection is
//! authenticated:
//! - JSON wire protocol for client and server messages
//! - Presence (join snapshot, joined/left diffs)
//! - Last-write-wins file content relay and file tree relays
//! - Cursor, chat and typing relays
//! - Per-connection dispatch and disconnect cleanup

pub mod chat;
pub mod content;
pub mod cursor;
pub mod presence;
pub mod protocol;
pub mod server;
pub mod typing;

pub use server::CollabServer;

use thiserror::Error;

/// Unique identifier for a project (and its room)
pub type ProjectId = String;

/// Unique identifier for an authenticated user
pub type UserId = String;

/// Unique identifier for a file within a project
pub type FileId = String;

/// Unique identifier for one transport connection
pub type ConnectionId = uuid::Uuid;

/// Result type for relay operations
pub type CollabResult<T> = Result<T, CollabError>;

/// Errors produced by relay operations. None of them reach the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollabError {
    /// The connection has not joined a room (or its room is gone)
    #[error("Connection has not joined a room")]
    NotJoined,

    /// The referenced room no longer exists
    #[error("Room not found: {0}")]
    UnknownRoom(ProjectId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collab_error_display() {
        assert_eq!(
            CollabError::NotJoined.to_string(),
            "Connection has not joined a room"
        );
        assert_eq!(
            CollabError::UnknownRoom("p-1".to_string()).to_string(),
            "Room not found: p-1"
        );
    }
}
