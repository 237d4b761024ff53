//! Typing indicators. Pure relay; the server keeps no typing state.

use tracing::trace;

use super::protocol::ServerMessage;
use super::server::Connection;
use super::{CollabError, CollabResult};
use crate::room::Room;

fn relay(room: &Room, conn: &Connection, msg: ServerMessage) -> CollabResult<()> {
    let state = room.lock();
    if !state.is_member(&conn.id) {
        return Err(CollabError::NotJoined);
    }

    trace!(project_id = room.project_id(), user_id = %conn.identity.user_id, kind = msg.kind(), "Typing indicator");
    state.broadcast(&msg, Some(&conn.id));
    Ok(())
}

pub fn start_typing(room: &Room, conn: &Connection) -> CollabResult<()> {
    relay(
        room,
        conn,
        ServerMessage::UserTyping {
            user_id: conn.identity.user_id.clone(),
            email: conn.identity.email.clone(),
        },
    )
}

pub fn stop_typing(room: &Room, conn: &Connection) -> CollabResult<()> {
    relay(
        room,
        conn,
        ServerMessage::UserStoppedTyping {
            user_id: conn.identity.user_id.clone(),
            email: conn.identity.email.clone(),
        },
    )
}
