//! Cursor relay.
//!
//! Each user has at most one cursor per room; a new position replaces the
//! old one even when it is in a different file.

use chrono::Utc;
use tracing::trace;

use super::protocol::{Selection, ServerMessage};
use super::server::Connection;
use super::{CollabError, CollabResult};
use crate::room::{CursorState, Room};

/// Record the caller's cursor and relay it to the other members
pub fn update_cursor(
    room: &Room,
    conn: &Connection,
    file_id: &str,
    line: u32,
    column: u32,
    selection: Option<Selection>,
) -> CollabResult<()> {
    let user_id = &conn.identity.user_id;
    let mut state = room.lock();
    if !state.is_member(&conn.id) {
        return Err(CollabError::NotJoined);
    }

    state.cursors.insert(
        user_id.clone(),
        CursorState {
            user_id: user_id.clone(),
            file_id: file_id.to_string(),
            line,
            column,
            selection,
            timestamp: Utc::now(),
        },
    );

    let reached = state.broadcast(
        &ServerMessage::CursorUpdated {
            user_id: user_id.clone(),
            file_id: file_id.to_string(),
            line,
            column,
            selection,
        },
        Some(&conn.id),
    );

    trace!(project_id = room.project_id(), user_id = %user_id, file_id, line, column, reached, "Cursor moved");
    Ok(())
}
