//! CollabServer: per-connection dispatch over the room registry.
//!
//! Each transport connection owns a `Connection` value holding its identity,
//! its outbound mailbox and the room it has joined. The server routes every
//! decoded client message to the matching relay and tears the connection
//! down on disconnect. Relay errors never reach the client; they are logged
//! and the message is dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use super::protocol::{ClientMessage, ServerMessage};
use super::{chat, content, cursor, presence, typing};
use super::{CollabError, CollabResult, ConnectionId, FileId};
use crate::auth::Identity;
use crate::room::{Mailbox, Room, RoomRegistry};

/// One authenticated transport connection
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub identity: Identity,
    mailbox: Mailbox,
    room: Option<Arc<Room>>,
    last_file: Option<FileId>,
}

impl Connection {
    pub fn new(identity: Identity, mailbox: Mailbox) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            mailbox,
            room: None,
            last_file: None,
        }
    }

    /// Room currently joined, if any
    pub fn room(&self) -> Option<Arc<Room>> {
        self.room.clone()
    }

    pub fn project_id(&self) -> Option<&str> {
        self.room.as_deref().map(Room::project_id)
    }

    /// File most recently edited through this connection
    pub fn last_file(&self) -> Option<&str> {
        self.last_file.as_deref()
    }

    pub(crate) fn touch_file(&mut self, file_id: &str) {
        self.last_file = Some(file_id.to_string());
    }

    /// Outbound mailbox, registered with the room on join
    pub fn mailbox(&self) -> Mailbox {
        self.mailbox.clone()
    }

    pub(crate) fn attach(&mut self, room: Arc<Room>) {
        self.room = Some(room);
    }

    pub(crate) fn detach(&mut self) -> Option<Arc<Room>> {
        self.last_file = None;
        self.room.take()
    }

    /// Send directly to this connection; false once the socket is gone or lagging
    pub fn send(&self, msg: ServerMessage) -> bool {
        self.mailbox.deliver(msg)
    }
}

/// The collaboration coordinator
#[derive(Debug)]
pub struct CollabServer {
    registry: RoomRegistry,
    connections: AtomicUsize,
    started_at: Instant,
}

impl Default for CollabServer {
    fn default() -> Self {
        Self::new()
    }
}

impl CollabServer {
    pub fn new() -> Self {
        Self {
            registry: RoomRegistry::new(),
            connections: AtomicUsize::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Register a freshly authenticated connection
    pub fn connect(&self, identity: Identity, mailbox: Mailbox) -> Connection {
        let conn = Connection::new(identity, mailbox);
        self.connections.fetch_add(1, Ordering::Relaxed);
        info!(
            connection_id = %conn.id,
            user_id = %conn.identity.user_id,
            "Connection registered"
        );
        conn
    }

    /// Route one client message. Failures are logged and the message dropped.
    pub fn handle_message(&self, conn: &mut Connection, msg: ClientMessage) {
        let kind = msg.kind();
        if let Err(e) = self.dispatch(conn, msg) {
            debug!(
                connection_id = %conn.id,
                user_id = %conn.identity.user_id,
                kind,
                error = %e,
                "Dropped message"
            );
        }
    }

    fn dispatch(&self, conn: &mut Connection, msg: ClientMessage) -> CollabResult<()> {
        match msg {
            ClientMessage::JoinRoom { project_id } => {
                presence::join(&self.registry, conn, &project_id);
                Ok(())
            }

            ClientMessage::Ping { timestamp } => {
                conn.send(ServerMessage::Pong {
                    timestamp,
                    server_time: chrono::Utc::now().timestamp_millis(),
                });
                Ok(())
            }

            ClientMessage::FileUpdate {
                file_id,
                content: text,
                cursor: position,
            } => {
                let room = current_room(conn)?;
                content::apply_edit(&room, conn, &file_id, text, position)
            }

            ClientMessage::CursorUpdate {
                file_id,
                line,
                column,
                selection,
            } => {
                let room = current_room(conn)?;
                cursor::update_cursor(&room, conn, &file_id, line, column, selection)
            }

            ClientMessage::FileCreated { file } => {
                let room = current_room(conn)?;
                content::create_file(&room, conn, file)
            }

            ClientMessage::FileDeleted { file_id, extra } => {
                let room = current_room(conn)?;
                content::delete_file(&room, conn, &file_id, extra)
            }

            ClientMessage::FileRenamed {
                file_id,
                new_name,
                extra,
            } => {
                let room = current_room(conn)?;
                content::rename_file(&room, conn, &file_id, &new_name, extra)
            }

            ClientMessage::ChatMessage { content: text, .. } => {
                let room = current_room(conn)?;
                chat::post_message(&room, conn, &text).map(|_| ())
            }

            ClientMessage::TypingStart => {
                let room = current_room(conn)?;
                typing::start_typing(&room, conn)
            }

            ClientMessage::TypingStop => {
                let room = current_room(conn)?;
                typing::stop_typing(&room, conn)
            }
        }
    }

    /// Leave the joined room, if any, and forget the connection
    pub fn disconnect(&self, conn: &mut Connection) {
        let project_id = conn.project_id().map(str::to_string);
        let last_file = conn.last_file().map(str::to_string);
        presence::leave(&self.registry, conn);
        self.connections.fetch_sub(1, Ordering::Relaxed);
        info!(
            connection_id = %conn.id,
            user_id = %conn.identity.user_id,
            project_id = ?project_id,
            last_file = ?last_file,
            "Connection closed"
        );
    }

    /// Get server statistics
    pub fn stats(&self) -> ServerStats {
        let rooms = self.registry.rooms();
        ServerStats {
            active_rooms: rooms.len(),
            active_connections: self.connections.load(Ordering::Relaxed),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }
}

fn current_room(conn: &Connection) -> CollabResult<Arc<Room>> {
    let room = conn.room().ok_or(CollabError::NotJoined)?;
    if room.lock().is_closed() {
        return Err(CollabError::UnknownRoom(room.project_id().to_string()));
    }
    Ok(room)
}

/// Server statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStats {
    pub active_rooms: usize,
    pub active_connections: usize,
    pub uptime_seconds: u64,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tokio::sync::mpsc;

    pub fn connection(user_id: &str) -> (Connection, mpsc::Receiver<ServerMessage>) {
        connection_for(user_id, &format!("{user_id}@example.com"))
    }

    pub fn connection_for(user_id: &str, email: &str) -> (Connection, mpsc::Receiver<ServerMessage>) {
        let (mailbox, rx, _) = Mailbox::channel();
        (Connection::new(Identity::new(user_id, email), mailbox), rx)
    }

    /// Everything queued so far
    pub fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }
}
