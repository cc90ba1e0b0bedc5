//! Connection registry: every live connection and the room it belongs to.
//!
//! The registry is a plain synchronous map; [`crate::relay::Relay`] holds
//! it together with the room directory under one lock so that room
//! reassignment is a single atomic swap as observed by broadcast.

use std::collections::HashMap;

use tokio::sync::mpsc;
use uuid::Uuid;

/// Unique identifier for a connection.
pub type ConnId = Uuid;

/// Frames pushed to a connection's writer half.
///
/// Delivery is always `try_send` against a bounded queue: a slow or
/// unresponsive peer fills its own queue and gets skipped, it never
/// stalls fan-out to the rest of the room.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A serialized JSON text frame.
    Text(String),
    /// Transport-level liveness probe (WebSocket ping).
    Probe,
    /// Orderly shutdown, pushed on eviction.
    Close,
}

/// Per-connection bookkeeping.
#[derive(Debug)]
pub struct ConnectionEntry {
    pub(crate) sender: mpsc::Sender<Outbound>,
    pub(crate) room: Option<String>,
    /// Cleared when a probe goes out, restored by the peer's pong.
    pub(crate) alive: bool,
}

/// Registry of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnId, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly admitted connection. The connection starts
    /// alive and roomless; the caller assigns a room in the same critical
    /// section.
    pub fn register(&mut self, sender: mpsc::Sender<Outbound>) -> ConnId {
        let id = Uuid::new_v4();
        self.connections.insert(
            id,
            ConnectionEntry {
                sender,
                room: None,
                alive: true,
            },
        );
        id
    }

    /// Remove a connection, returning its entry so the caller can cascade
    /// room cleanup. No-op (returns `None`) for unknown ids, so the
    /// disconnect and eviction paths can race without harm.
    pub fn unregister(&mut self, id: ConnId) -> Option<ConnectionEntry> {
        self.connections.remove(&id)
    }

    /// Record the connection's current room. No-op for unknown ids.
    pub fn set_room(&mut self, id: ConnId, room: Option<String>) {
        if let Some(entry) = self.connections.get_mut(&id) {
            entry.room = room;
        }
    }

    /// The room the connection currently belongs to.
    pub fn current_room(&self, id: ConnId) -> Option<String> {
        self.connections.get(&id).and_then(|e| e.room.clone())
    }

    /// Restore the liveness flag; called on pong. No-op for unknown ids.
    pub fn mark_alive(&mut self, id: ConnId) {
        if let Some(entry) = self.connections.get_mut(&id) {
            entry.alive = true;
        }
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Outbound handle for one connection.
    pub fn sender(&self, id: ConnId) -> Option<&mpsc::Sender<Outbound>> {
        self.connections.get(&id).map(|e| &e.sender)
    }

    /// One probe cycle: connections that never acknowledged the previous
    /// probe are returned for eviction, every other connection has its
    /// flag cleared and a fresh probe queued.
    pub fn sweep(&mut self) -> Vec<ConnId> {
        let mut stale = Vec::new();
        for (id, entry) in &mut self.connections {
            if entry.alive {
                entry.alive = false;
                let _ = entry.sender.try_send(Outbound::Probe);
            } else {
                stale.push(*id);
            }
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (mpsc::Sender<Outbound>, mpsc::Receiver<Outbound>) {
        mpsc::channel(8)
    }

    #[test]
    fn test_register_and_unregister() {
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();

        let id = registry.register(tx);
        assert!(registry.contains(id));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(id).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_unknown_is_noop() {
        let mut registry = ConnectionRegistry::new();
        assert!(registry.unregister(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_set_room_and_current_room() {
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let id = registry.register(tx);

        assert_eq!(registry.current_room(id), None);
        registry.set_room(id, Some("r1".into()));
        assert_eq!(registry.current_room(id), Some("r1".into()));
        registry.set_room(id, Some("r2".into()));
        assert_eq!(registry.current_room(id), Some("r2".into()));
    }

    #[test]
    fn test_operations_on_unknown_id_are_noops() {
        let mut registry = ConnectionRegistry::new();
        let ghost = Uuid::new_v4();
        registry.set_room(ghost, Some("r1".into()));
        registry.mark_alive(ghost);
        assert_eq!(registry.current_room(ghost), None);
        assert!(registry.sender(ghost).is_none());
    }

    #[test]
    fn test_sweep_probes_live_connections() {
        let mut registry = ConnectionRegistry::new();
        let (tx, mut rx) = channel();
        let id = registry.register(tx);

        // Fresh connection is alive: first sweep probes, nothing stale.
        let stale = registry.sweep();
        assert!(stale.is_empty());
        assert_eq!(rx.try_recv().unwrap(), Outbound::Probe);

        // No pong: second sweep reports it stale.
        let stale = registry.sweep();
        assert_eq!(stale, vec![id]);
    }

    #[test]
    fn test_mark_alive_survives_sweep() {
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let id = registry.register(tx);

        assert!(registry.sweep().is_empty());
        registry.mark_alive(id);
        assert!(registry.sweep().is_empty());
        registry.mark_alive(id);
        assert!(registry.sweep().is_empty());
    }

    #[test]
    fn test_sweep_probe_on_full_queue_does_not_panic() {
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        tx.try_send(Outbound::Text("backlog".into())).unwrap();
        registry.register(tx);

        // Queue is full: the probe is dropped, the sweep carries on.
        assert!(registry.sweep().is_empty());
    }
}
