//! JSON wire protocol: inbound frame classification and outbound messages.
//!
//! Every frame is a JSON object with a `type` discriminator. Inbound text
//! is parsed exactly once at the boundary into the closed [`Intent`] enum;
//! the rest of the crate never touches raw JSON for the recognized types.
//!
//! | type             | direction       | fields                  |
//! |------------------|-----------------|-------------------------|
//! | `join`           | client → server | `room`                  |
//! | `state`/`slider` | client → server | `value`, `room?`, `sender?` |
//! | `state`          | server → client | `room`, `value`, `sender?` |
//! | `ping`           | client → server | none                    |
//! | `pong`           | server → client | `room?`                 |
//! | `hello`          | server → client | `room`                  |
//!
//! Anything else that is still a well-formed object with an unrecognized
//! `type` string is kept verbatim as [`Intent::Passthrough`] so newer
//! clients can ship message types this server predates.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Classified inbound message.
///
/// Malformed input never reaches this type: [`Intent::parse`] returns
/// `None` and the frame is dropped without closing the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Switch the connection to another room. No broadcast.
    Join { room: String },
    /// A value update, already coerced and clamped to [0.0, 1.0].
    State {
        value: f64,
        room: Option<String>,
        sender: Option<String>,
    },
    /// Application-level liveness probe, answered to the sender only.
    Ping,
    /// Unrecognized `type`: forwarded verbatim to the sender's room.
    Passthrough(Value),
}

impl Intent {
    /// Parse one text frame.
    ///
    /// Returns `None` for anything that is not a JSON object carrying a
    /// string `type` field, or a `join` without a `room`. Callers drop
    /// those frames silently; well-formedness is not a liveness signal
    /// and never terminates the connection.
    pub fn parse(raw: &str) -> Option<Intent> {
        let value: Value = serde_json::from_str(raw).ok()?;
        let obj = value.as_object()?;
        let kind = obj.get("type")?.as_str()?;
        match kind {
            "join" => {
                let room = obj.get("room")?.as_str()?.to_owned();
                Some(Intent::Join { room })
            }
            // "slider" is the legacy alias kept for older clients.
            "state" | "slider" => Some(Intent::State {
                value: clamp_unit(coerce_value(obj.get("value"))),
                room: obj.get("room").and_then(Value::as_str).map(str::to_owned),
                sender: obj.get("sender").and_then(Value::as_str).map(str::to_owned),
            }),
            "ping" => Some(Intent::Ping),
            _ => Some(Intent::Passthrough(value)),
        }
    }
}

/// Coerce an arbitrary JSON value to a finite f64.
///
/// Numbers pass through, numeric strings are parsed, everything else
/// (missing, booleans, arrays, non-numeric strings) becomes 0. Favors
/// availability over strictness: a bad value dims the room to zero
/// instead of being rejected.
fn coerce_value(raw: Option<&Value>) -> f64 {
    let v = match raw {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if v.is_finite() { v } else { 0.0 }
}

/// Clamp into the normalized [0.0, 1.0] range.
pub fn clamp_unit(v: f64) -> f64 {
    v.max(0.0).min(1.0)
}

/// Server-originated frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Sent once on connect, informational.
    Hello { room: String },
    /// The room's current value; `sender` is passed through untouched so
    /// receivers can filter echoes of their own updates across reconnects.
    State {
        room: String,
        value: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
    },
    /// Reply to an application-level `ping`.
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        room: Option<String>,
    },
}

impl ServerMessage {
    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(|e| RelayError::Serialization(e.to_string()))
    }

    /// Deserialize a JSON text frame.
    pub fn decode(raw: &str) -> Result<Self, RelayError> {
        serde_json::from_str(raw).map_err(|e| RelayError::Serialization(e.to_string()))
    }
}

/// Relay errors.
///
/// The broadcast core absorbs all failure; this surface exists for the
/// transport boundary and the client API.
#[derive(Debug, Clone)]
pub enum RelayError {
    Serialization(String),
    Transport(String),
    NotConnected,
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "Serialization error: {e}"),
            Self::Transport(e) => write!(f, "Transport error: {e}"),
            Self::NotConnected => write!(f, "Not connected"),
        }
    }
}

impl std::error::Error for RelayError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_join() {
        let intent = Intent::parse(r#"{"type":"join","room":"r1"}"#).unwrap();
        assert_eq!(intent, Intent::Join { room: "r1".into() });
    }

    #[test]
    fn test_parse_join_without_room_dropped() {
        assert!(Intent::parse(r#"{"type":"join"}"#).is_none());
        assert!(Intent::parse(r#"{"type":"join","room":42}"#).is_none());
    }

    #[test]
    fn test_parse_state() {
        let intent = Intent::parse(r#"{"type":"state","value":0.42}"#).unwrap();
        assert_eq!(
            intent,
            Intent::State {
                value: 0.42,
                room: None,
                sender: None,
            }
        );
    }

    #[test]
    fn test_parse_slider_alias() {
        let a = Intent::parse(r#"{"type":"state","value":0.5,"room":"r"}"#).unwrap();
        let b = Intent::parse(r#"{"type":"slider","value":0.5,"room":"r"}"#).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_state_with_routing_metadata() {
        let intent =
            Intent::parse(r#"{"type":"state","value":0.1,"room":"r1","sender":"tab-7"}"#).unwrap();
        assert_eq!(
            intent,
            Intent::State {
                value: 0.1,
                room: Some("r1".into()),
                sender: Some("tab-7".into()),
            }
        );
    }

    #[test]
    fn test_parse_ping() {
        assert_eq!(Intent::parse(r#"{"type":"ping"}"#), Some(Intent::Ping));
    }

    #[test]
    fn test_parse_unknown_type_is_passthrough() {
        let intent = Intent::parse(r#"{"type":"fx","intensity":2}"#).unwrap();
        match intent {
            Intent::Passthrough(v) => {
                assert_eq!(v["type"], "fx");
                assert_eq!(v["intensity"], 2);
            }
            other => panic!("Expected Passthrough, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_malformed_dropped() {
        assert!(Intent::parse("not json").is_none());
        assert!(Intent::parse("[1,2,3]").is_none());
        assert!(Intent::parse("\"state\"").is_none());
        assert!(Intent::parse(r#"{"value":0.5}"#).is_none()); // no type
        assert!(Intent::parse(r#"{"type":7}"#).is_none()); // non-string type
    }

    #[test]
    fn test_value_clamped_to_unit_range() {
        let parse_value = |raw: &str| match Intent::parse(raw).unwrap() {
            Intent::State { value, .. } => value,
            other => panic!("Expected State, got {other:?}"),
        };
        assert_eq!(parse_value(r#"{"type":"state","value":1.7}"#), 1.0);
        assert_eq!(parse_value(r#"{"type":"state","value":-3}"#), 0.0);
        assert_eq!(parse_value(r#"{"type":"state","value":0.25}"#), 0.25);
    }

    #[test]
    fn test_value_coercion() {
        assert_eq!(coerce_value(Some(&json!(0.3))), 0.3);
        assert_eq!(coerce_value(Some(&json!("0.75"))), 0.75);
        assert_eq!(coerce_value(Some(&json!(" 0.5 "))), 0.5);
        assert_eq!(coerce_value(Some(&json!("abc"))), 0.0);
        assert_eq!(coerce_value(Some(&json!(true))), 0.0);
        assert_eq!(coerce_value(Some(&json!(null))), 0.0);
        assert_eq!(coerce_value(Some(&json!([0.5]))), 0.0);
        assert_eq!(coerce_value(None), 0.0);
    }

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(-0.1), 0.0);
        assert_eq!(clamp_unit(0.0), 0.0);
        assert_eq!(clamp_unit(0.999), 0.999);
        assert_eq!(clamp_unit(1.0), 1.0);
        assert_eq!(clamp_unit(42.0), 1.0);
    }

    #[test]
    fn test_server_message_wire_shape() {
        let hello = ServerMessage::Hello { room: "r1".into() };
        assert_eq!(hello.encode().unwrap(), r#"{"type":"hello","room":"r1"}"#);

        let state = ServerMessage::State {
            room: "r1".into(),
            value: 0.5,
            sender: None,
        };
        assert_eq!(
            state.encode().unwrap(),
            r#"{"type":"state","room":"r1","value":0.5}"#
        );

        let pong = ServerMessage::Pong { room: None };
        assert_eq!(pong.encode().unwrap(), r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_server_message_sender_passed_through() {
        let state = ServerMessage::State {
            room: "r1".into(),
            value: 0.5,
            sender: Some("tab-7".into()),
        };
        let encoded = state.encode().unwrap();
        assert!(encoded.contains(r#""sender":"tab-7""#));
        assert_eq!(ServerMessage::decode(&encoded).unwrap(), state);
    }

    #[test]
    fn test_server_message_roundtrip() {
        let messages = [
            ServerMessage::Hello { room: "a".into() },
            ServerMessage::State {
                room: "a".into(),
                value: 0.0,
                sender: None,
            },
            ServerMessage::Pong {
                room: Some("a".into()),
            },
            ServerMessage::Pong { room: None },
        ];
        for msg in messages {
            let decoded = ServerMessage::decode(&msg.encode().unwrap()).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn test_decode_invalid_text() {
        assert!(ServerMessage::decode("garbage").is_err());
        assert!(ServerMessage::decode(r#"{"type":"nope"}"#).is_err());
    }
}
