//! WebSocket relay server with room-scoped fan-out.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Room ("r1") ── cached value ── fan-out (N-1 peers)
//! Client B ──┘         │
//!                      Relay ── ConnectionRegistry + RoomDirectory
//!                      │
//!             LivenessSupervisor (independent timer)
//! ```
//!
//! One task per connection owns both halves of the socket and multiplexes
//! inbound frames against the connection's outbound queue. All shared
//! state lives in [`Relay`]; the accept loop and the connection tasks
//! never talk to each other directly.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use percent_encoding::percent_decode_str;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::{Bytes, Message};

use crate::liveness;
use crate::protocol::Intent;
use crate::registry::Outbound;
use crate::relay::{Relay, RelayConfig};

/// The relay server.
pub struct RelayServer {
    config: RelayConfig,
    relay: Arc<Relay>,
}

impl RelayServer {
    /// Create a new relay server with the given configuration.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            relay: Arc::new(Relay::new()),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Handle to the shared relay core.
    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    /// Accept connections until the process exits.
    ///
    /// Spawns the liveness supervisor and one task per connection. Call
    /// from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("relay listening on {}", self.config.bind_addr);

        tokio::spawn(liveness::run(self.relay.clone(), self.config.probe_interval));

        loop {
            let (stream, addr) = listener.accept().await?;
            debug!("new TCP connection from {addr}");

            let relay = self.relay.clone();
            let send_capacity = self.config.send_capacity;
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, relay, send_capacity).await {
                    warn!("connection error from {addr}: {e}");
                }
            });
        }
    }
}

/// Pull the requested room out of the handshake query string.
fn room_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "room").then(|| percent_decode_str(value).decode_utf8_lossy().into_owned())
    })
}

/// Drive a single connection from handshake to disconnect.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    relay: Arc<Relay>,
    send_capacity: usize,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut requested_room = String::new();
    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
            if let Some(room) = req.uri().query().and_then(room_from_query) {
                requested_room = room;
            }
            Ok(response)
        },
    )
    .await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (tx, mut rx) = mpsc::channel(send_capacity);
    let (id, room) = relay.admit(tx, &requested_room).await;
    info!("{addr} connected as {id} in room \"{room}\"");

    loop {
        tokio::select! {
            // Inbound frame from the peer.
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match Intent::parse(text.as_str()) {
                            Some(intent) => relay.handle(id, intent).await,
                            // Well-formedness is not liveness: drop the
                            // frame, keep the connection.
                            None => debug!("dropping malformed frame from {id}"),
                        }
                    }

                    Some(Ok(Message::Ping(payload))) => {
                        if ws_sender.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }

                    Some(Ok(Message::Pong(_))) => relay.mark_alive(id).await,

                    Some(Ok(Message::Close(_))) | None => break,

                    Some(Err(e)) => {
                        debug!("websocket error from {addr}: {e}");
                        break;
                    }

                    _ => {}
                }
            }

            // Outbound frame queued by the relay.
            out = rx.recv() => {
                match out {
                    Some(Outbound::Text(text)) => {
                        if ws_sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }

                    Some(Outbound::Probe) => {
                        if ws_sender.send(Message::Ping(Bytes::new())).await.is_err() {
                            break;
                        }
                    }

                    // Evicted, or the relay dropped this connection.
                    Some(Outbound::Close) | None => {
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }

    // Peer close, transport error and eviction all land here; disconnect
    // is idempotent.
    relay.disconnect(id).await;
    info!("{addr} ({id}) disconnected");
    Ok(())
}
