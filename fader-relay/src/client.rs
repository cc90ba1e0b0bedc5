//! WebSocket client for the relay protocol.
//!
//! Connects to one room, publishes values, and surfaces everything the
//! server says as typed [`RelayEvent`]s on a channel. Used by the
//! integration tests and by embedding applications; the browser UI talks
//! the same wire protocol directly.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{RelayError, ServerMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the relay client.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// Connection established.
    Connected,
    /// Connection lost.
    Disconnected,
    /// Server greeting with the resolved room.
    Hello { room: String },
    /// A room's current value.
    State {
        room: String,
        value: f64,
        sender: Option<String>,
    },
    /// Reply to an application-level ping.
    Pong { room: Option<String> },
    /// A frame this client version does not recognize.
    Passthrough(Value),
}

impl From<ServerMessage> for RelayEvent {
    fn from(msg: ServerMessage) -> Self {
        match msg {
            ServerMessage::Hello { room } => RelayEvent::Hello { room },
            ServerMessage::State { room, value, sender } => RelayEvent::State { room, value, sender },
            ServerMessage::Pong { room } => RelayEvent::Pong { room },
        }
    }
}

/// The relay client.
pub struct RelayClient {
    server_url: String,
    room: String,
    /// Optional tag echoed back in broadcasts of our own updates so the
    /// application can self-filter even across reconnects.
    sender_tag: Option<String>,
    state: Arc<RwLock<ConnectionState>>,
    outgoing_tx: Option<mpsc::Sender<String>>,
    event_tx: mpsc::Sender<RelayEvent>,
    event_rx: Option<mpsc::Receiver<RelayEvent>>,
}

impl RelayClient {
    /// Create a client for `room` on the given server, e.g.
    /// `ws://127.0.0.1:9090`.
    pub fn new(server_url: impl Into<String>, room: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            room: room.into(),
            sender_tag: None,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Attach a sender tag to outgoing updates.
    pub fn with_sender_tag(mut self, tag: impl Into<String>) -> Self {
        self.sender_tag = Some(tag.into());
        self
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<RelayEvent>> {
        self.event_rx.take()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// The room this client currently targets.
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Connect to the server.
    ///
    /// Spawns background tasks for reading and writing; events start
    /// flowing on the channel returned by [`take_event_rx`].
    ///
    /// [`take_event_rx`]: RelayClient::take_event_rx
    pub async fn connect(&mut self) -> Result<(), RelayError> {
        *self.state.write().await = ConnectionState::Connecting;

        let url = format!(
            "{}/?room={}",
            self.server_url.trim_end_matches('/'),
            utf8_percent_encode(&self.room, NON_ALPHANUMERIC),
        );
        let (ws_stream, _) = match tokio_tungstenite::connect_async(&url).await {
            Ok(ok) => ok,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(RelayError::Transport(e.to_string()));
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward the outgoing channel to the socket.
        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(RelayEvent::Connected).await;

        // Reader task: translate inbound frames into events.
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let event = match ServerMessage::decode(text.as_str()) {
                            Ok(message) => RelayEvent::from(message),
                            // Forward-compatible: unknown frames are
                            // surfaced raw instead of dropped.
                            Err(_) => match serde_json::from_str::<Value>(text.as_str()) {
                                Ok(value) => RelayEvent::Passthrough(value),
                                Err(_) => continue,
                            },
                        };
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(RelayEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Publish a new value for the current room.
    pub async fn send_value(&self, value: f64) -> Result<(), RelayError> {
        let mut frame = json!({ "type": "state", "room": self.room, "value": value });
        if let Some(tag) = &self.sender_tag {
            frame["sender"] = Value::String(tag.clone());
        }
        self.send_text(frame.to_string()).await
    }

    /// Switch to another room. The server replies with the room's cached
    /// value when it has one.
    pub async fn join(&mut self, room: impl Into<String>) -> Result<(), RelayError> {
        let room = room.into();
        self.send_text(json!({ "type": "join", "room": room }).to_string())
            .await?;
        self.room = room;
        Ok(())
    }

    /// Application-level liveness probe; the server answers `pong`.
    pub async fn send_ping(&self) -> Result<(), RelayError> {
        self.send_text(json!({ "type": "ping" }).to_string()).await
    }

    /// Ship an arbitrary JSON object. Unrecognized types are forwarded
    /// verbatim to the room by the server.
    pub async fn send_raw(&self, payload: Value) -> Result<(), RelayError> {
        self.send_text(payload.to_string()).await
    }

    async fn send_text(&self, text: String) -> Result<(), RelayError> {
        let tx = self.outgoing_tx.as_ref().ok_or(RelayError::NotConnected)?;
        tx.send(text).await.map_err(|_| RelayError::NotConnected)
    }
}
