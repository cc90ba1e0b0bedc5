//! # fader-relay — room-scoped real-time value relay
//!
//! Relays a single normalized value (0.0–1.0) between many WebSocket
//! clients grouped into independent named rooms.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐      WebSocket      ┌──────────────┐
//! │ RelayClient │ ◄─────────────────► │ RelayServer  │
//! │ (per user)  │     JSON frames     │ (central)    │
//! └─────────────┘                     └──────┬───────┘
//!                                            │
//!                                     ┌──────┴───────┐
//!                                     │    Relay     │
//!                                     │ registry +   │
//!                                     │ rooms + dedup│
//!                                     └──────┬───────┘
//!                                            │ fan-out (N-1)
//!                                    ┌───────┼────────┐
//!                                    ▼       ▼        ▼
//!                                Client A  Client B  Client C
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire protocol, inbound classification, clamping
//! - [`registry`] — live connections and their current room
//! - [`rooms`] — room membership and per-room cached value
//! - [`relay`] — broadcast engine: de-dup, echo suppression, fan-out
//! - [`liveness`] — probe/evict supervisor
//! - [`server`] — WebSocket accept loop and per-connection tasks
//! - [`client`] — typed client for the relay protocol
//!
//! ## Guarantees
//!
//! - Broadcast values are always finite and clamped to [0.0, 1.0].
//! - The originator never receives its own update back (its optional
//!   `sender` tag is passed through for client-side filtering too).
//! - Updates within `1e-4` of a room's cached value are suppressed.
//! - A room exists exactly while it has members; its cached value dies
//!   with it.
//! - A peer that stops acknowledging probes is evicted within two probe
//!   intervals.

pub mod client;
pub mod liveness;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod rooms;
pub mod server;

// Re-exports for convenience
pub use client::{ConnectionState, RelayClient, RelayEvent};
pub use protocol::{Intent, RelayError, ServerMessage};
pub use registry::{ConnId, ConnectionRegistry, Outbound};
pub use relay::{Relay, RelayConfig, RelayStats, VALUE_EPSILON};
pub use rooms::{normalize_key, RoomDirectory, DEFAULT_ROOM, MAX_KEY_LEN};
pub use server::RelayServer;
