// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Wire Protocol
//!
//! JSON text frames exchanged over the relay WebSocket. Every frame is an
//! object tagged by its `type` field.

use serde::{Deserialize, Serialize};

/// A relayed chat message.
///
/// `content` is opaque to the relay (ciphertext for direct messages).
/// `signature` is passed through unverified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub from: String,
    /// Recipient address; empty means broadcast.
    pub to: String,
    pub content: String,
    /// Relay receive time (Unix milliseconds).
    pub timestamp: u64,
    pub signature: String,
}

impl ChatMessage {
    pub fn is_broadcast(&self) -> bool {
        self.to.is_empty()
    }

    /// True if `address` sent or received this message.
    pub fn involves(&self, address: &str) -> bool {
        self.from == address || self.to == address
    }
}

/// Roster entry in an `online_users` snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineUser {
    pub address: String,
    #[serde(rename = "expiresAt")]
    pub expires_at: Option<u64>,
}

/// Client → server frames.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ChatMessage {
        #[serde(default)]
        to: Option<String>,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        signature: Option<String>,
    },
    Ping,
    #[serde(other)]
    Unknown,
}

/// Server → client frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    OnlineUsers {
        users: Vec<OnlineUser>,
    },
    UserConnected {
        address: String,
        #[serde(rename = "expiresAt")]
        expires_at: Option<u64>,
    },
    UserDisconnected {
        address: String,
    },
    SessionExpired {
        address: String,
    },
    ChatMessage {
        message: ChatMessage,
    },
    MessageSent {
        message: ChatMessage,
    },
    Pong,
}

impl ServerEvent {
    /// Encodes the event as a JSON text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Why an inbound frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A decoded client frame together with its raw `type` tag (for logging
/// frames the relay does not understand).
#[derive(Debug)]
pub struct Decoded {
    pub message: ClientMessage,
    pub tag: Option<String>,
}

/// Decodes a client text frame.
pub fn decode_client_message(text: &str) -> Result<Decoded, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let tag = value
        .get("type")
        .and_then(|t| t.as_str())
        .map(str::to_string);
    let message = serde_json::from_value(value)?;
    Ok(Decoded { message, tag })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_chat_message() {
        let decoded = decode_client_message(
            r#"{"type":"chat_message","to":"0xB","content":"c","signature":"s"}"#,
        )
        .unwrap();

        assert_eq!(
            decoded.message,
            ClientMessage::ChatMessage {
                to: Some("0xB".to_string()),
                content: Some("c".to_string()),
                signature: Some("s".to_string()),
            }
        );
        assert_eq!(decoded.tag.as_deref(), Some("chat_message"));
    }

    #[test]
    fn test_decode_chat_message_missing_fields() {
        let decoded = decode_client_message(r#"{"type":"chat_message","to":null}"#).unwrap();
        assert_eq!(
            decoded.message,
            ClientMessage::ChatMessage {
                to: None,
                content: None,
                signature: None,
            }
        );
    }

    #[test]
    fn test_decode_ping() {
        let decoded = decode_client_message(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(decoded.message, ClientMessage::Ping);
    }

    #[test]
    fn test_decode_unknown_tag() {
        let decoded = decode_client_message(r#"{"type":"typing","to":"x"}"#).unwrap();
        assert_eq!(decoded.message, ClientMessage::Unknown);
        assert_eq!(decoded.tag.as_deref(), Some("typing"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_client_message("not json").is_err());
        assert!(decode_client_message(r#"{"to":"x"}"#).is_err());
    }

    #[test]
    fn test_online_users_wire_format() {
        let event = ServerEvent::OnlineUsers {
            users: vec![
                OnlineUser {
                    address: "x".to_string(),
                    expires_at: None,
                },
                OnlineUser {
                    address: "y".to_string(),
                    expires_at: Some(42),
                },
            ],
        };
        let value: serde_json::Value = serde_json::from_str(&event.encode().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "online_users",
                "users": [
                    {"address": "x", "expiresAt": null},
                    {"address": "y", "expiresAt": 42}
                ]
            })
        );
    }

    #[test]
    fn test_message_sent_wire_format() {
        let event = ServerEvent::MessageSent {
            message: ChatMessage {
                from: "x".to_string(),
                to: "y".to_string(),
                content: "hi".to_string(),
                timestamp: 7,
                signature: String::new(),
            },
        };
        let value: serde_json::Value = serde_json::from_str(&event.encode().unwrap()).unwrap();

        assert_eq!(value["type"], "message_sent");
        assert_eq!(value["message"]["from"], "x");
        assert_eq!(value["message"]["to"], "y");
        assert_eq!(value["message"]["timestamp"], 7);
    }

    #[test]
    fn test_pong_wire_format() {
        assert_eq!(ServerEvent::Pong.encode().unwrap(), r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_involves() {
        let msg = ChatMessage {
            from: "a".to_string(),
            to: "b".to_string(),
            content: String::new(),
            timestamp: 0,
            signature: String::new(),
        };
        assert!(msg.involves("a"));
        assert!(msg.involves("b"));
        assert!(!msg.involves("c"));
        assert!(!msg.is_broadcast());
    }
}
