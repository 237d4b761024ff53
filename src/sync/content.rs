//! File content and file tree relays.
//!
//! Content edits are last-write-wins: each `file-update` replaces the
//! cached snapshot outright, in the order the room lock is acquired, and the
//! new content goes to every other member. File tree operations keep no
//! state here at all; they are tagged with the actor and relayed verbatim.

use chrono::Utc;
use tracing::debug;

use super::protocol::{CursorPosition, FileDescriptor, Passthrough, ServerMessage};
use super::server::Connection;
use super::{CollabError, CollabResult};
use crate::room::{CursorState, FileState, Room, RoomState};

/// Keys the relay sets itself; a client copy would collide with them
const RELAY_KEYS: [&str; 2] = ["actorId", "timestamp"];

fn strip_relay_keys(mut extra: Passthrough) -> Passthrough {
    for key in RELAY_KEYS {
        extra.remove(key);
    }
    extra
}

fn ensure_member(state: &RoomState, conn: &Connection) -> CollabResult<()> {
    if state.is_member(&conn.id) {
        Ok(())
    } else {
        Err(CollabError::NotJoined)
    }
}

/// Overwrite the cached content of `file_id` and relay it to the other members
pub fn apply_edit(
    room: &Room,
    conn: &mut Connection,
    file_id: &str,
    content: String,
    cursor: Option<CursorPosition>,
) -> CollabResult<()> {
    let user_id = conn.identity.user_id.clone();
    let now = Utc::now();

    {
        let mut state = room.lock();
        ensure_member(&state, conn)?;

        state.files.insert(
            file_id.to_string(),
            FileState {
                id: file_id.to_string(),
                content: content.clone(),
                last_modified: now,
                modified_by: user_id.clone(),
            },
        );

        if let Some(collaborator) = state.collaborators.get_mut(&user_id) {
            collaborator.touch_file(file_id);
        }

        if let Some(position) = cursor {
            state.cursors.insert(
                user_id.clone(),
                CursorState {
                    user_id: user_id.clone(),
                    file_id: file_id.to_string(),
                    line: position.line,
                    column: position.column,
                    selection: None,
                    timestamp: now,
                },
            );
        }

        let reached = state.broadcast(
            &ServerMessage::FileUpdated {
                file_id: file_id.to_string(),
                content,
                user_id: user_id.clone(),
                timestamp: now,
            },
            Some(&conn.id),
        );

        debug!(
            project_id = room.project_id(),
            file_id,
            user_id = %user_id,
            reached,
            "Applied file edit"
        );
    }

    conn.touch_file(file_id);
    Ok(())
}

/// Relay a newly created file or folder
pub fn create_file(room: &Room, conn: &Connection, file: FileDescriptor) -> CollabResult<()> {
    let state = room.lock();
    ensure_member(&state, conn)?;

    debug!(project_id = room.project_id(), file_id = %file.id, "Relaying file creation");
    state.broadcast(
        &ServerMessage::FileCreated {
            file,
            actor_id: conn.identity.user_id.clone(),
            timestamp: Utc::now(),
        },
        Some(&conn.id),
    );
    Ok(())
}

/// Relay a file deletion along with any extra fields the client sent
pub fn delete_file(
    room: &Room,
    conn: &Connection,
    file_id: &str,
    extra: Passthrough,
) -> CollabResult<()> {
    let state = room.lock();
    ensure_member(&state, conn)?;

    debug!(project_id = room.project_id(), file_id, "Relaying file deletion");
    state.broadcast(
        &ServerMessage::FileDeleted {
            file_id: file_id.to_string(),
            actor_id: conn.identity.user_id.clone(),
            timestamp: Utc::now(),
            extra: strip_relay_keys(extra),
        },
        Some(&conn.id),
    );
    Ok(())
}

/// Relay a file rename
pub fn rename_file(
    room: &Room,
    conn: &Connection,
    file_id: &str,
    new_name: &str,
    extra: Passthrough,
) -> CollabResult<()> {
    let state = room.lock();
    ensure_member(&state, conn)?;

    debug!(project_id = room.project_id(), file_id, new_name, "Relaying file rename");
    state.broadcast(
        &ServerMessage::FileRenamed {
            file_id: file_id.to_string(),
            new_name: new_name.to_string(),
            actor_id: conn.identity.user_id.clone(),
            timestamp: Utc::now(),
            extra: strip_relay_keys(extra),
        },
        Some(&conn.id),
    );
    Ok(())
}
