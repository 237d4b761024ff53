//! Presence management for project rooms.
//!
//! This module handles the membership side of a room:
//! - Joining: register the connection's mailbox, announce the user to the
//!   others, and hand the joiner a full collaborator snapshot
//! - Leaving: drop the connection, announce the departure once the user's
//!   last connection is gone, and release the room when it empties
//!
//! A user with several connections in one room shares a single
//! collaborator record.

use std::sync::Arc;
use tracing::{debug, info};

use super::protocol::ServerMessage;
use super::server::Connection;
use crate::room::{CollaboratorState, Member, Room, RoomRegistry};

/// Join `project_id`, creating its room if needed.
///
/// A connection already in another room leaves it first. Re-joining the
/// current room only re-sends the snapshot.
pub fn join(registry: &RoomRegistry, conn: &mut Connection, project_id: &str) -> Arc<Room> {
    if let Some(current) = conn.room() {
        if current.project_id() == project_id {
            let state = current.lock();
            if state.is_member(&conn.id) && !state.is_closed() {
                state.send_to(
                    &conn.id,
                    ServerMessage::CollaboratorsUpdated {
                        collaborators: state.collaborator_snapshot(),
                    },
                );
                debug!(project_id, user_id = %conn.identity.user_id, "Re-sent collaborator snapshot");
                drop(state);
                return current;
            }
        }
        leave(registry, conn);
    }

    let user_id = conn.identity.user_id.clone();
    let email = conn.identity.email.clone();
    let connection_id = conn.id;
    let mailbox = conn.mailbox();

    let (room, newly_present) = registry.join_room(project_id, |state| {
        let newly_present = !state.collaborators.contains_key(&user_id);
        if newly_present {
            state.collaborators.insert(
                user_id.clone(),
                CollaboratorState::new(&user_id, &email, generate_color()),
            );
        }
        state.add_member(connection_id, Member::new(&user_id, mailbox.clone()));

        if newly_present {
            state.broadcast(
                &ServerMessage::UserJoined {
                    user_id: user_id.clone(),
                    email: email.clone(),
                },
                Some(&connection_id),
            );
        }

        state.send_to(
            &connection_id,
            ServerMessage::CollaboratorsUpdated {
                collaborators: state.collaborator_snapshot(),
            },
        );

        newly_present
    });

    conn.attach(room.clone());
    info!(
        project_id,
        user_id = %user_id,
        connection_id = %connection_id,
        newly_present,
        "Joined room"
    );

    room
}

/// Remove the connection from its room, if any.
///
/// Returns true when the user's collaborator record was removed. A
/// connection whose room was already torn down is a no-op.
pub fn leave(registry: &RoomRegistry, conn: &mut Connection) -> bool {
    let Some(room) = conn.detach() else {
        return false;
    };

    let user_id = &conn.identity.user_id;
    let departed = {
        let mut state = room.lock();
        if state.remove_member(&conn.id).is_none() {
            false
        } else if state.has_connection_for(user_id) {
            false
        } else {
            state.collaborators.remove(user_id);
            state.cursors.remove(user_id);
            state.broadcast(
                &ServerMessage::UserLeft {
                    user_id: user_id.clone(),
                    email: conn.identity.email.clone(),
                },
                None,
            );
            true
        }
    };

    let destroyed = registry.release_room(&room);
    info!(
        project_id = room.project_id(),
        user_id = %user_id,
        connection_id = %conn.id,
        departed,
        destroyed,
        "Left room"
    );

    departed
}

/// Pick a display color for a collaborator
pub fn generate_color() -> String {
    use rand::Rng;
    let colors = [
        "#3b82f6", // blue
        "#ef4444", // red
        "#22c55e", // green
        "#f59e0b", // amber
        "#8b5cf6", // violet
        "#ec4899", // pink
        "#06b6d4", // cyan
        "#f97316", // orange
        "#14b8a6", // teal
        "#a855f7", // purple
        "#84cc16", // lime
        "#6366f1", // indigo
    ];
    let idx = rand::thread_rng().gen_range(0..colors.len());
    colors[idx].to_string()
}
