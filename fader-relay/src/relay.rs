//! The broadcast engine: admission, room switching, de-duplication,
//! cache updates and echo-suppressed fan-out.
//!
//! [`Relay`] is the one shared service object handed to every connection
//! task and to the liveness supervisor. Registry and room directory live
//! together under a single `RwLock`, so a room switch is one atomic swap
//! as observed by broadcast and a join can never race a fan-out into an
//! inconsistent member set. Sends never await: all delivery is `try_send`
//! against each connection's bounded queue.

use std::time::Duration;

use log::{debug, trace, warn};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};

use crate::protocol::{Intent, ServerMessage};
use crate::registry::{ConnId, ConnectionRegistry, Outbound};
use crate::rooms::{self, RoomDirectory, DEFAULT_ROOM};

/// Updates closer than this to the room's cached value are suppressed
/// outright, keeping clients that converge on the same value from
/// feeding each other an echo storm.
pub const VALUE_EPSILON: f64 = 1e-4;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to.
    pub bind_addr: String,
    /// Liveness probe cycle; a dead peer is evicted within two cycles.
    pub probe_interval: Duration,
    /// Outbound queue capacity per connection.
    pub send_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            probe_interval: Duration::from_secs(30),
            send_capacity: 256,
        }
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub messages_handled: u64,
    pub frames_delivered: u64,
    pub suppressed_updates: u64,
    pub evictions: u64,
    pub active_rooms: usize,
}

struct RelayState {
    registry: ConnectionRegistry,
    rooms: RoomDirectory,
    stats: RelayStats,
}

impl RelayState {
    /// Queue a frame for one connection. Failures (unknown id, full or
    /// closed queue) are absorbed; a peer that cannot keep up loses its
    /// own frames, nobody else's.
    fn reply(&mut self, id: ConnId, msg: &ServerMessage) {
        let text = match msg.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!("failed to encode frame for {id}: {e}");
                return;
            }
        };
        self.push_text(id, text);
    }

    fn push_text(&mut self, id: ConnId, text: String) {
        let Some(sender) = self.registry.sender(id) else {
            return;
        };
        match sender.try_send(Outbound::Text(text)) {
            Ok(()) => self.stats.frames_delivered += 1,
            Err(e) => debug!("dropping frame for {id}: {e}"),
        }
    }

    /// Deliver a pre-serialized frame to every room member except the
    /// originator.
    fn fan_out(&mut self, room: &str, exclude: ConnId, text: String) -> usize {
        let peers = self.rooms.members_except(room, exclude);
        let count = peers.len();
        for peer in peers {
            self.push_text(peer, text.clone());
        }
        count
    }

    /// Room an update from `id` applies to: the explicit room if the
    /// frame named one, else the sender's current room, else the default.
    fn effective_room(&self, id: ConnId, explicit: Option<&str>) -> String {
        match explicit {
            Some(room) => rooms::normalize_key(room),
            None => self
                .registry
                .current_room(id)
                .unwrap_or_else(|| DEFAULT_ROOM.to_string()),
        }
    }

    /// Atomic room swap: leave the old room (garbage-collecting it if
    /// emptied), join the new one. Re-joining the current room is a
    /// no-op so an idempotent client retry cannot drop the room's cache
    /// through a transient empty member set.
    fn switch_room(&mut self, id: ConnId, room: &str) {
        if !self.registry.contains(id) {
            return;
        }
        if let Some(old) = self.registry.current_room(id) {
            if old == room {
                return;
            }
            self.rooms.leave(&old, id);
        }
        self.rooms.join(room, id);
        self.registry.set_room(id, Some(room.to_string()));
    }

    /// Remove a connection and cascade room cleanup. Idempotent: the
    /// disconnect and eviction paths may both land here.
    fn remove(&mut self, id: ConnId, evicted: bool) -> bool {
        let Some(entry) = self.registry.unregister(id) else {
            return false;
        };
        if let Some(room) = &entry.room {
            self.rooms.leave(room, id);
        }
        self.stats.active_connections = self.stats.active_connections.saturating_sub(1);
        if evicted {
            self.stats.evictions += 1;
            let _ = entry.sender.try_send(Outbound::Close);
        }
        true
    }
}

/// The shared relay core.
pub struct Relay {
    state: RwLock<RelayState>,
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

impl Relay {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RelayState {
                registry: ConnectionRegistry::new(),
                rooms: RoomDirectory::new(),
                stats: RelayStats::default(),
            }),
        }
    }

    /// Admit a connection into its requested room (normalized, defaulted
    /// when blank). Greets it with `hello` and, when the room already
    /// carries a value, an immediate `state` frame so late joiners need
    /// no earlier traffic. Returns the connection id and resolved room.
    pub async fn admit(&self, sender: mpsc::Sender<Outbound>, requested_room: &str) -> (ConnId, String) {
        let room = rooms::normalize_key(requested_room);
        let mut state = self.state.write().await;
        let id = state.registry.register(sender);
        state.rooms.join(&room, id);
        state.registry.set_room(id, Some(room.clone()));
        state.stats.total_connections += 1;
        state.stats.active_connections += 1;
        state.reply(id, &ServerMessage::Hello { room: room.clone() });
        if let Some(value) = state.rooms.cached(&room) {
            state.reply(
                id,
                &ServerMessage::State {
                    room: room.clone(),
                    value,
                    sender: None,
                },
            );
        }
        debug!("connection {id} admitted into room \"{room}\"");
        (id, room)
    }

    /// Process one classified inbound message.
    pub async fn handle(&self, id: ConnId, intent: Intent) {
        let mut state = self.state.write().await;
        state.stats.messages_handled += 1;
        match intent {
            Intent::Join { room } => {
                let room = rooms::normalize_key(&room);
                state.switch_room(id, &room);
                if let Some(value) = state.rooms.cached(&room) {
                    state.reply(
                        id,
                        &ServerMessage::State {
                            room: room.clone(),
                            value,
                            sender: None,
                        },
                    );
                }
                debug!("connection {id} switched to room \"{room}\"");
            }

            Intent::State { value, room, sender } => {
                let room = state.effective_room(id, room.as_deref());
                if let Some(cached) = state.rooms.cached(&room) {
                    if (cached - value).abs() < VALUE_EPSILON {
                        state.stats.suppressed_updates += 1;
                        trace!("suppressed duplicate {value} for room \"{room}\"");
                        return;
                    }
                }
                state.rooms.set_cached(&room, value);
                let frame = ServerMessage::State {
                    room: room.clone(),
                    value,
                    sender,
                };
                match frame.encode() {
                    Ok(text) => {
                        let peers = state.fan_out(&room, id, text);
                        trace!("room \"{room}\" now {value}, fanned out to {peers} peer(s)");
                    }
                    Err(e) => warn!("failed to encode state frame: {e}"),
                }
            }

            Intent::Ping => {
                // A peer composing valid frames is observably not dead.
                state.registry.mark_alive(id);
                let room = state.registry.current_room(id);
                state.reply(id, &ServerMessage::Pong { room });
            }

            Intent::Passthrough(mut payload) => {
                let explicit = payload.get("room").and_then(Value::as_str).map(str::to_owned);
                let room = state.effective_room(id, explicit.as_deref());
                if explicit.is_none() {
                    if let Some(obj) = payload.as_object_mut() {
                        obj.insert("room".to_string(), Value::String(room.clone()));
                    }
                }
                let peers = state.fan_out(&room, id, payload.to_string());
                trace!("passed through unrecognized frame to {peers} peer(s) in \"{room}\"");
            }
        }
    }

    /// Tear down a connection: registry removal cascading to room
    /// membership. Safe to call more than once; close-by-peer,
    /// close-by-error and eviction all funnel here.
    pub async fn disconnect(&self, id: ConnId) {
        let mut state = self.state.write().await;
        if state.remove(id, false) {
            debug!("connection {id} disconnected");
        }
    }

    /// Record a liveness acknowledgment from the peer.
    pub async fn mark_alive(&self, id: ConnId) {
        self.state.write().await.registry.mark_alive(id);
    }

    /// One liveness cycle: evict every connection that never acknowledged
    /// the previous probe, then probe the remainder. Returns the evicted
    /// ids.
    pub async fn sweep(&self) -> Vec<ConnId> {
        let mut state = self.state.write().await;
        let stale = state.registry.sweep();
        for id in &stale {
            state.remove(*id, true);
        }
        stale
    }

    /// The room a connection currently belongs to.
    pub async fn current_room(&self, id: ConnId) -> Option<String> {
        self.state.read().await.registry.current_room(id)
    }

    /// A room's cached value, if the room is live and has seen an update.
    pub async fn cached_value(&self, room: &str) -> Option<f64> {
        self.state.read().await.rooms.cached(room)
    }

    /// Snapshot of the relay counters.
    pub async fn stats(&self) -> RelayStats {
        let state = self.state.read().await;
        let mut stats = state.stats.clone();
        stats.active_rooms = state.rooms.len();
        stats
    }
}
