//! Engine.IO v4 / Socket.IO v5 text packet codec.
//!
//! Every WebSocket text frame carries one Engine.IO packet: a single type
//! digit followed by its data. Engine.IO `message` packets (`4`) in turn
//! carry a Socket.IO packet, again prefixed by a type digit. Only the
//! default namespace and text packets are used by the trivia server.
//!
//! ```text
//! 0{"sid":"…","pingInterval":25000,"pingTimeout":20000}   open
//! 2                                                       ping
//! 40{"sid":"…"}                                           namespace connect
//! 42["new_question",{…}]                                  event
//! 44{"message":"…"}                                       connect error
//! ```

use serde::Deserialize;

use crate::error::{Result, TriviaError};

/// Engine.IO pong, sent in reply to every ping.
pub const PONG: &str = "3";
/// Socket.IO connect request for the default namespace.
pub const CONNECT: &str = "40";
/// Socket.IO disconnect from the default namespace.
pub const DISCONNECT: &str = "41";

/// Parameters of the Engine.IO open handshake.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

/// A decoded text packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Open(OpenHandshake),
    Close,
    Ping,
    Pong,
    /// Namespace connect confirmation.
    Connect { sid: Option<String> },
    /// Server-side namespace disconnect.
    Disconnect,
    /// Named event; `data` is the raw JSON array.
    Event { ack_id: Option<u64>, data: String },
    Ack,
    ConnectError { message: String },
    Upgrade,
    Noop,
}

#[derive(Deserialize)]
struct ConnectPayload {
    sid: Option<String>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: String,
}

/// Decodes one WebSocket text frame.
///
/// # Errors
///
/// Returns [`TriviaError::Protocol`] for empty frames, unknown packet types,
/// and binary attachments, and [`TriviaError::Serialization`] when a
/// handshake payload is not valid JSON.
pub fn decode(text: &str) -> Result<Packet> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| TriviaError::Protocol("empty frame".into()))?;
    let rest = chars.as_str();

    match kind {
        '0' => Ok(Packet::Open(serde_json::from_str(rest)?)),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_socket(rest),
        '5' => Ok(Packet::Upgrade),
        '6' => Ok(Packet::Noop),
        other => Err(TriviaError::Protocol(format!(
            "unknown engine packet type {other:?}"
        ))),
    }
}

fn decode_socket(text: &str) -> Result<Packet> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| TriviaError::Protocol("empty socket packet".into()))?;
    let body = skip_namespace(chars.as_str());

    match kind {
        '0' => {
            let sid = if body.is_empty() {
                None
            } else {
                serde_json::from_str::<ConnectPayload>(body)?.sid
            };
            Ok(Packet::Connect { sid })
        }
        '1' => Ok(Packet::Disconnect),
        '2' => {
            let (ack_id, data) = split_ack_id(body);
            Ok(Packet::Event {
                ack_id,
                data: data.to_string(),
            })
        }
        '3' => Ok(Packet::Ack),
        '4' => {
            let message = if body.is_empty() {
                String::new()
            } else {
                serde_json::from_str::<ErrorPayload>(body)?.message
            };
            Ok(Packet::ConnectError { message })
        }
        '5' | '6' => Err(TriviaError::Protocol(
            "binary packets are not supported".into(),
        )),
        other => Err(TriviaError::Protocol(format!(
            "unknown socket packet type {other:?}"
        ))),
    }
}

/// Strips a leading `/namespace,` if present.
fn skip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        match body.split_once(',') {
            Some((_, rest)) => rest,
            None => "",
        }
    } else {
        body
    }
}

/// Splits leading ack id digits off an event body.
fn split_ack_id(body: &str) -> (Option<u64>, &str) {
    let digits = body.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return (None, body);
    }
    match (body.get(..digits), body.get(digits..)) {
        (Some(id), Some(rest)) => (id.parse().ok(), rest),
        _ => (None, body),
    }
}

/// Wraps a Socket.IO event array in an Engine.IO message frame.
pub fn encode_event(event_array: &str) -> String {
    format!("42{event_array}")
}

/// Builds the Engine.IO WebSocket endpoint for an HTTP(S) backend URL.
///
/// `http://host:5001` becomes `ws://host:5001/socket.io/?EIO=4&transport=websocket`.
/// URLs that already use `ws`/`wss` keep their scheme.
///
/// # Errors
///
/// Returns [`TriviaError::Protocol`] if the URL has no recognised scheme.
pub fn engine_io_url(backend_url: &str) -> Result<String> {
    let trimmed = backend_url.trim().trim_end_matches('/');
    let base = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
        trimmed.to_string()
    } else {
        return Err(TriviaError::Protocol(format!(
            "unsupported backend url: {backend_url}"
        )));
    };
    Ok(format!("{base}/socket.io/?EIO=4&transport=websocket"))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn decodes_open_handshake() {
        let packet =
            decode(r#"0{"sid":"Xy1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#)
                .unwrap();
        assert_eq!(
            packet,
            Packet::Open(OpenHandshake {
                sid: "Xy1".into(),
                ping_interval: 25000,
                ping_timeout: 20000,
            })
        );
    }

    #[test]
    fn decodes_control_packets() {
        assert_eq!(decode("1").unwrap(), Packet::Close);
        assert_eq!(decode("2").unwrap(), Packet::Ping);
        assert_eq!(decode("3").unwrap(), Packet::Pong);
        assert_eq!(decode("6").unwrap(), Packet::Noop);
        assert_eq!(decode("41").unwrap(), Packet::Disconnect);
    }

    #[test]
    fn decodes_namespace_connect() {
        assert_eq!(
            decode(r#"40{"sid":"ns-1"}"#).unwrap(),
            Packet::Connect {
                sid: Some("ns-1".into())
            }
        );
        assert_eq!(decode("40").unwrap(), Packet::Connect { sid: None });
    }

    #[test]
    fn decodes_event_with_namespace_and_ack_id() {
        let packet = decode(r#"42/admin,17["ping_me",{}]"#).unwrap();
        assert_eq!(
            packet,
            Packet::Event {
                ack_id: Some(17),
                data: r#"["ping_me",{}]"#.into(),
            }
        );
    }

    #[test]
    fn decodes_plain_event() {
        let packet = decode(r#"42["game_over",{"leaderboard":[]}]"#).unwrap();
        assert_eq!(
            packet,
            Packet::Event {
                ack_id: None,
                data: r#"["game_over",{"leaderboard":[]}]"#.into(),
            }
        );
    }

    #[test]
    fn decodes_connect_error() {
        assert_eq!(
            decode(r#"44{"message":"Not authorized"}"#).unwrap(),
            Packet::ConnectError {
                message: "Not authorized".into()
            }
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(decode(""), Err(TriviaError::Protocol(_))));
        assert!(matches!(decode("9"), Err(TriviaError::Protocol(_))));
        assert!(matches!(decode("4"), Err(TriviaError::Protocol(_))));
        assert!(matches!(decode("45-[]"), Err(TriviaError::Protocol(_))));
        assert!(matches!(decode("0{"), Err(TriviaError::Serialization(_))));
    }

    #[test]
    fn builds_engine_io_urls() {
        assert_eq!(
            engine_io_url("http://localhost:5001").unwrap(),
            "ws://localhost:5001/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            engine_io_url("https://trivia.example.com/").unwrap(),
            "wss://trivia.example.com/socket.io/?EIO=4&transport=websocket"
        );
        assert!(engine_io_url("ftp://nope").is_err());
    }

    #[test]
    fn encodes_events() {
        assert_eq!(encode_event(r#"["use_help"]"#), r#"42["use_help"]"#);
    }
}
