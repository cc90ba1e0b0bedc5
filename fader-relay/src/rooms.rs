//! Room directory: room key to member set plus cached last-known value.
//!
//! Rooms are created lazily on first join and deleted the moment the last
//! member leaves. Room existence is exactly "member set non-empty", so
//! the cached value lives and dies with the room: a re-created room
//! starts valueless.

use std::collections::{HashMap, HashSet};

use crate::registry::ConnId;

/// Room assigned when the client supplies none.
pub const DEFAULT_ROOM: &str = "default";

/// Keys are opaque byte strings up to this many characters; anything
/// longer is truncated on a char boundary.
pub const MAX_KEY_LEN: usize = 64;

#[derive(Debug, Default)]
struct Room {
    members: HashSet<ConnId>,
    cached: Option<f64>,
}

/// Directory of live rooms.
#[derive(Debug, Default)]
pub struct RoomDirectory {
    rooms: HashMap<String, Room>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member, creating the room if absent. Membership is a set;
    /// re-joining is idempotent.
    pub fn join(&mut self, room: &str, id: ConnId) {
        self.rooms.entry(room.to_owned()).or_default().members.insert(id);
    }

    /// Remove a member. Emptying a room deletes the entry, cached value
    /// included. No-op for unknown rooms or non-members.
    pub fn leave(&mut self, room: &str, id: ConnId) {
        if let Some(entry) = self.rooms.get_mut(room) {
            entry.members.remove(&id);
            if entry.members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }

    /// Members of a room minus one connection, the echo-suppressed
    /// recipient set for a broadcast.
    pub fn members_except(&self, room: &str, exclude: ConnId) -> Vec<ConnId> {
        match self.rooms.get(room) {
            Some(entry) => entry
                .members
                .iter()
                .copied()
                .filter(|id| *id != exclude)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Last value broadcast in this room, if any.
    pub fn cached(&self, room: &str) -> Option<f64> {
        self.rooms.get(room).and_then(|entry| entry.cached)
    }

    /// Update a room's cached value. No-op for a room with no members;
    /// a cache write must never mint a memberless room.
    pub fn set_cached(&mut self, room: &str, value: f64) {
        if let Some(entry) = self.rooms.get_mut(room) {
            entry.cached = Some(value);
        }
    }

    pub fn contains(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, |entry| entry.members.len())
    }

    /// Number of live rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

/// Normalize a client-supplied room key: trim surrounding whitespace,
/// substitute [`DEFAULT_ROOM`] when empty, truncate at [`MAX_KEY_LEN`]
/// characters. No further validation; keys are opaque.
pub fn normalize_key(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return DEFAULT_ROOM.to_owned();
    }
    trimmed.chars().take(MAX_KEY_LEN).collect()
}
