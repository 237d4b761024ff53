//! Process-wide table of live rooms.
//!
//! A room is inserted lazily by the first join and removed as soon as its
//! collaborator table becomes empty. Both transitions are compare-and-swap
//! style: a join that races a release either lands in the live room or, if
//! it finds the room already closed, removes the stale entry and retries on
//! a fresh room. Lock order is always map shard, released, then room mutex.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::{Room, RoomState};
use crate::sync::ProjectId;

/// Registry mapping project ids to live rooms
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: DashMap<ProjectId, Arc<Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Look up (or create) the room for `project_id` and run `join` on its
    /// tables while holding the room lock.
    ///
    /// The closure never runs against a closed room, so whatever it inserts
    /// is visible to every later operation on the same project.
    pub fn join_room<F, R>(&self, project_id: &str, mut join: F) -> (Arc<Room>, R)
    where
        F: FnMut(&mut RoomState) -> R,
    {
        loop {
            let room = self
                .rooms
                .entry(project_id.to_string())
                .or_insert_with(|| {
                    info!(project_id, "Created room");
                    Arc::new(Room::new(project_id))
                })
                .clone();

            {
                let mut state = room.lock();
                if !state.is_closed() {
                    let result = join(&mut state);
                    return (room.clone(), result);
                }
            }

            debug!(project_id, "Join raced a closing room, retrying");
            self.evict(&room);
        }
    }

    /// Remove the room from the registry if its collaborator table is empty.
    ///
    /// Returns true when this call closed the room.
    pub fn release_room(&self, room: &Arc<Room>) -> bool {
        let closed = {
            let mut state = room.lock();
            if state.is_closed() {
                false
            } else if state.is_empty() {
                state.close();
                true
            } else {
                false
            }
        };

        if closed {
            self.evict(room);
            info!(project_id = room.project_id(), "Destroyed empty room");
        }

        closed
    }

    /// Drop the map entry only if it still points at this room instance
    fn evict(&self, room: &Arc<Room>) {
        self.rooms
            .remove_if(room.project_id(), |_, current| Arc::ptr_eq(current, room));
    }

    /// Snapshot of every live room
    pub fn rooms(&self) -> Vec<Arc<Room>> {
        let candidates: Vec<Arc<Room>> = self.rooms.iter().map(|r| r.value().clone()).collect();
        candidates
            .into_iter()
            .filter(|room| {
                let state = room.lock();
                !state.is_closed() && !state.is_empty()
            })
            .collect()
    }

}

#[cfg(test)]
impl RoomRegistry {
    /// Get a live room; closed or empty rooms are reported as absent
    pub fn get(&self, project_id: &str) -> Option<Arc<Room>> {
        let room = self.rooms.get(project_id).map(|r| r.clone())?;
        let live = {
            let state = room.lock();
            !state.is_closed() && !state.is_empty()
        };
        live.then_some(room)
    }

    pub fn contains(&self, project_id: &str) -> bool {
        self.get(project_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.rooms().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
