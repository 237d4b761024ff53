//! Room module for per-project collaboration state.
//!
//! This module handles:
//! - The three in-memory tables of a project room (collaborators, files, cursors)
//! - Bounded member mailboxes used for fan-out
//! - The process-wide registry that creates and destroys rooms
//!
//! Every mutation of a room and the broadcast it produces happen while the
//! room's mutex is held, so all peers observe the same committed order.
//! Nothing here is persisted.

mod registry;

pub use registry::RoomRegistry;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tracing::warn;

use crate::sync::protocol::{Selection, ServerMessage};
use crate::sync::{ConnectionId, FileId, ProjectId, UserId};

/// Presence record of a joined user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorState {
    pub id: UserId,
    pub email: String,
    /// Display color assigned on join
    pub color: String,
    pub joined_at: DateTime<Utc>,
    pub current_file: Option<FileId>,
    pub last_activity: DateTime<Utc>,
}

impl CollaboratorState {
    pub fn new(id: impl Into<String>, email: impl Into<String>, color: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            email: email.into(),
            color: color.into(),
            joined_at: now,
            current_file: None,
            last_activity: now,
        }
    }

    /// Record activity on a file
    pub fn touch_file(&mut self, file_id: &str) {
        self.current_file = Some(file_id.to_string());
        self.last_activity = Utc::now();
    }
}

/// Latest known content of a file (last write wins)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileState {
    pub id: FileId,
    pub content: String,
    pub last_modified: DateTime<Utc>,
    pub modified_by: UserId,
}

/// Latest cursor of a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorState {
    pub user_id: UserId,
    pub file_id: FileId,
    pub line: u32,
    pub column: u32,
    pub selection: Option<Selection>,
    pub timestamp: DateTime<Utc>,
}

/// Outbound messages a connection may have queued before it is dropped
pub const MAILBOX_CAPACITY: usize = 1024;

/// Sending half of a connection's outbound queue.
///
/// Delivery never waits. When the queue is full the message is dropped and
/// the stall signal fires; the socket writer listens for it and closes the
/// connection, which then leaves its room through the normal disconnect path.
#[derive(Debug, Clone)]
pub struct Mailbox {
    tx: mpsc::Sender<ServerMessage>,
    stalled: Arc<Notify>,
}

impl Mailbox {
    /// A mailbox with the default capacity, its receiver and its stall signal
    pub fn channel() -> (Self, mpsc::Receiver<ServerMessage>, Arc<Notify>) {
        Self::with_capacity(MAILBOX_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<ServerMessage>, Arc<Notify>) {
        let (tx, rx) = mpsc::channel(capacity);
        let stalled = Arc::new(Notify::new());
        let mailbox = Self {
            tx,
            stalled: stalled.clone(),
        };
        (mailbox, rx, stalled)
    }

    /// Enqueue without waiting. False if the receiver is gone or lagging.
    pub fn deliver(&self, msg: ServerMessage) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                warn!(kind = msg.kind(), "Outbound mailbox full, dropping connection");
                self.stalled.notify_one();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// A connection joined to a room, addressed through its outbound mailbox
#[derive(Debug, Clone)]
pub struct Member {
    pub user_id: UserId,
    mailbox: Mailbox,
}

impl Member {
    pub fn new(user_id: impl Into<String>, mailbox: Mailbox) -> Self {
        Self {
            user_id: user_id.into(),
            mailbox,
        }
    }

    fn deliver(&self, msg: ServerMessage) -> bool {
        self.mailbox.deliver(msg)
    }
}

/// Tables of a room, only reachable through the room lock
#[derive(Debug, Default)]
pub struct RoomState {
    pub collaborators: HashMap<UserId, CollaboratorState>,
    pub files: HashMap<FileId, FileState>,
    pub cursors: HashMap<UserId, CursorState>,
    members: HashMap<ConnectionId, Member>,
    /// Set once the room has been emptied and is leaving the registry
    closed: bool,
}

impl RoomState {
    /// Whether a connection is currently a member
    pub fn is_member(&self, connection_id: &ConnectionId) -> bool {
        self.members.contains_key(connection_id)
    }

    pub fn add_member(&mut self, connection_id: ConnectionId, member: Member) {
        self.members.insert(connection_id, member);
    }

    pub fn remove_member(&mut self, connection_id: &ConnectionId) -> Option<Member> {
        self.members.remove(connection_id)
    }

    /// Whether the user still has another connection in this room
    pub fn has_connection_for(&self, user_id: &str) -> bool {
        self.members.values().any(|m| m.user_id == user_id)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collaborators.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    /// Collaborator list ordered by join time
    pub fn collaborator_snapshot(&self) -> Vec<CollaboratorState> {
        let mut list: Vec<CollaboratorState> = self.collaborators.values().cloned().collect();
        list.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    /// Send to one member
    pub fn send_to(&self, connection_id: &ConnectionId, msg: ServerMessage) -> bool {
        self.members
            .get(connection_id)
            .map(|m| m.deliver(msg))
            .unwrap_or(false)
    }

    /// Fan out to every member except `exclude`; returns the number of mailboxes reached
    pub fn broadcast(&self, msg: &ServerMessage, exclude: Option<&ConnectionId>) -> usize {
        self.members
            .iter()
            .filter(|(id, _)| Some(*id) != exclude)
            .filter(|(_, member)| member.deliver(msg.clone()))
            .count()
    }
}

/// Shared coordination state of one project
#[derive(Debug)]
pub struct Room {
    project_id: ProjectId,
    state: Mutex<RoomState>,
    created_at: DateTime<Utc>,
}

impl Room {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            state: Mutex::new(RoomState::default()),
            created_at: Utc::now(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Acquire exclusive access to the tables
    pub fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock()
    }

    /// Live connections, counting every tab of a user
    pub fn connection_count(&self) -> usize {
        self.lock().member_count()
    }

    pub fn collaborator_count(&self) -> usize {
        self.lock().collaborators.len()
    }

    pub fn file_count(&self) -> usize {
        self.lock().files.len()
    }
}

#[cfg(test)]
impl Room {
    pub fn file(&self, file_id: &str) -> Option<FileState> {
        self.lock().files.get(file_id).cloned()
    }

    pub fn cursor(&self, user_id: &str) -> Option<CursorState> {
        self.lock().cursors.get(user_id).cloned()
    }

    pub fn collaborator(&self, user_id: &str) -> Option<CollaboratorState> {
        self.lock().collaborators.get(user_id).cloned()
    }
}
