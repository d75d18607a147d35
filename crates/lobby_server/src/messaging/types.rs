//! Message type definitions for client-server communication.
//!
//! This module defines the envelope exchanged with lobby clients. The
//! connection manager never looks inside an envelope; it only serializes the
//! whole value once per send.
//!
//! # Wire format
//!
//! ```json
//! {
//!   "type": "chat",
//!   "from": "conn_5f0c…",
//!   "room_id": "room1",
//!   "content": { "text": "ready?", "nickname": "ann" },
//!   "timestamp": 1700000000
//! }
//! ```
//!
//! `from` is omitted when there is no sender. Types without a body
//! (`join`, `leave`, `heartbeat`) carry `"content": null`. Unknown type tags
//! are kept as [`Payload::Other`] with their content as raw JSON bytes.

use crate::error::ManagerError;
use crate::utils::current_timestamp;
use serde::ser::{Error as _, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use tokio_tungstenite::tungstenite::Utf8Bytes;

/// Message type tags understood by lobby clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Join,
    Leave,
    Heartbeat,
    Chat,
    GameStart,
    GameAction,
    GameState,
    PlayerJoin,
    PlayerLeave,
    Notice,
    Error,
}

impl MessageType {
    pub const ALL: [MessageType; 11] = [
        MessageType::Join,
        MessageType::Leave,
        MessageType::Heartbeat,
        MessageType::Chat,
        MessageType::GameStart,
        MessageType::GameAction,
        MessageType::GameState,
        MessageType::PlayerJoin,
        MessageType::PlayerLeave,
        MessageType::Notice,
        MessageType::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Join => "join",
            MessageType::Leave => "leave",
            MessageType::Heartbeat => "heartbeat",
            MessageType::Chat => "chat",
            MessageType::GameStart => "game_start",
            MessageType::GameAction => "game_action",
            MessageType::GameState => "game_state",
            MessageType::PlayerJoin => "player_join",
            MessageType::PlayerLeave => "player_leave",
            MessageType::Notice => "notice",
            MessageType::Error => "error",
        }
    }

    /// Looks up a known tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == tag)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chat message body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatContent {
    pub text: String,
    pub nickname: String,
    /// Fields this server does not interpret, relayed as received
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An in-game action issued by a player.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameActionContent {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Game phase snapshot, used for both `game_start` and `game_state`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameStateContent {
    pub phase: String,
    pub round: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub players: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_data: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A player entering or leaving a room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerPresenceContent {
    pub player_id: String,
    pub nickname: String,
    pub message: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Severity of a notice. Levels other than the three known ones are kept
/// verbatim in [`NoticeLevel::Custom`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NoticeLevel {
    #[default]
    Info,
    Warning,
    Error,
    Custom(String),
}

impl NoticeLevel {
    pub fn as_str(&self) -> &str {
        match self {
            NoticeLevel::Info => "info",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
            NoticeLevel::Custom(level) => level,
        }
    }
}

impl From<String> for NoticeLevel {
    fn from(level: String) -> Self {
        match level.as_str() {
            "info" => NoticeLevel::Info,
            "warning" => NoticeLevel::Warning,
            "error" => NoticeLevel::Error,
            _ => NoticeLevel::Custom(level),
        }
    }
}

impl From<NoticeLevel> for String {
    fn from(level: NoticeLevel) -> Self {
        match level {
            NoticeLevel::Custom(level) => level,
            known => known.as_str().to_string(),
        }
    }
}

/// System notice shown to players.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoticeContent {
    pub title: String,
    pub message: String,
    pub level: NoticeLevel,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorContent {
    pub code: i32,
    pub message: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The typed body of an envelope, keyed by its type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// `join`, `leave` and `heartbeat` carry no typed body; whatever the
    /// client sent is kept as-is and `None` goes out as `null`.
    Join(Option<Value>),
    Leave(Option<Value>),
    Heartbeat(Option<Value>),
    Chat(ChatContent),
    GameStart(GameStateContent),
    GameAction(GameActionContent),
    GameState(GameStateContent),
    PlayerJoin(PlayerPresenceContent),
    PlayerLeave(PlayerPresenceContent),
    Notice(NoticeContent),
    Error(ErrorContent),
    /// Extension message with an unrecognized tag. `content` holds raw JSON
    /// and is validated when the envelope is serialized.
    Other { kind: String, content: Vec<u8> },
}

impl Payload {
    /// The wire type tag.
    pub fn kind(&self) -> &str {
        match self {
            Payload::Other { kind, .. } => kind,
            typed => typed.message_type().map_or("", |t| t.as_str()),
        }
    }

    /// The known message type, `None` for [`Payload::Other`].
    pub fn message_type(&self) -> Option<MessageType> {
        Some(match self {
            Payload::Join(_) => MessageType::Join,
            Payload::Leave(_) => MessageType::Leave,
            Payload::Heartbeat(_) => MessageType::Heartbeat,
            Payload::Chat(_) => MessageType::Chat,
            Payload::GameStart(_) => MessageType::GameStart,
            Payload::GameAction(_) => MessageType::GameAction,
            Payload::GameState(_) => MessageType::GameState,
            Payload::PlayerJoin(_) => MessageType::PlayerJoin,
            Payload::PlayerLeave(_) => MessageType::PlayerLeave,
            Payload::Notice(_) => MessageType::Notice,
            Payload::Error(_) => MessageType::Error,
            Payload::Other { .. } => return None,
        })
    }

    fn content_value(&self) -> Result<Value, String> {
        let value = match self {
            Payload::Join(c) | Payload::Leave(c) | Payload::Heartbeat(c) => {
                Ok(c.clone().unwrap_or(Value::Null))
            }
            Payload::Chat(c) => serde_json::to_value(c),
            Payload::GameStart(c) | Payload::GameState(c) => serde_json::to_value(c),
            Payload::GameAction(c) => serde_json::to_value(c),
            Payload::PlayerJoin(c) | Payload::PlayerLeave(c) => serde_json::to_value(c),
            Payload::Notice(c) => serde_json::to_value(c),
            Payload::Error(c) => serde_json::to_value(c),
            Payload::Other { kind, content } => {
                if kind.is_empty() {
                    return Err("extension message type must not be empty".to_string());
                }
                if MessageType::from_tag(kind).is_some() {
                    return Err(format!("extension message type '{kind}' is reserved"));
                }
                return serde_json::from_slice(content)
                    .map_err(|e| format!("extension content for '{kind}' is not valid JSON: {e}"));
            }
        };
        value.map_err(|e| e.to_string())
    }

    fn from_wire(kind: String, content: Value) -> Result<Self, serde_json::Error> {
        let Some(message_type) = MessageType::from_tag(&kind) else {
            return Ok(Payload::Other {
                kind,
                content: serde_json::to_vec(&content)?,
            });
        };
        Ok(match message_type {
            MessageType::Join => Payload::Join(untyped(content)),
            MessageType::Leave => Payload::Leave(untyped(content)),
            MessageType::Heartbeat => Payload::Heartbeat(untyped(content)),
            MessageType::Chat => Payload::Chat(serde_json::from_value(content)?),
            MessageType::GameStart => Payload::GameStart(serde_json::from_value(content)?),
            MessageType::GameAction => Payload::GameAction(serde_json::from_value(content)?),
            MessageType::GameState => Payload::GameState(serde_json::from_value(content)?),
            MessageType::PlayerJoin => Payload::PlayerJoin(serde_json::from_value(content)?),
            MessageType::PlayerLeave => Payload::PlayerLeave(serde_json::from_value(content)?),
            MessageType::Notice => Payload::Notice(serde_json::from_value(content)?),
            MessageType::Error => Payload::Error(serde_json::from_value(content)?),
        })
    }
}

fn untyped(content: Value) -> Option<Value> {
    match content {
        Value::Null => None,
        other => Some(other),
    }
}

/// A message addressed to a room, as delivered to clients.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "WireEnvelope")]
pub struct Envelope {
    /// Sender connection id, if any
    pub from: Option<String>,
    /// Room (group) the message belongs to
    pub room_id: String,
    pub payload: Payload,
    /// Unix timestamp in seconds
    pub timestamp: i64,
}

impl Envelope {
    /// Creates an envelope stamped with the current time.
    pub fn new(room_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            from: None,
            room_id: room_id.into(),
            payload,
            timestamp: current_timestamp(),
        }
    }

    pub fn with_sender(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn kind(&self) -> &str {
        self.payload.kind()
    }

    /// Serializes the envelope into a text frame payload.
    pub fn encode(&self) -> Result<Utf8Bytes, ManagerError> {
        Ok(Utf8Bytes::from(serde_json::to_string(self)?))
    }

    /// Parses an envelope from a text frame.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let content = self.payload.content_value().map_err(S::Error::custom)?;
        let mut state = serializer.serialize_struct("Envelope", 5)?;
        state.serialize_field("type", self.payload.kind())?;
        match &self.from {
            Some(from) => state.serialize_field("from", from)?,
            None => state.skip_field("from")?,
        }
        state.serialize_field("room_id", &self.room_id)?;
        state.serialize_field("content", &content)?;
        state.serialize_field("timestamp", &self.timestamp)?;
        state.end()
    }
}

#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    room_id: String,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    timestamp: i64,
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = serde_json::Error;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        Ok(Self {
            from: wire.from.filter(|from| !from.is_empty()),
            room_id: wire.room_id,
            payload: Payload::from_wire(wire.kind, wire.content)?,
            timestamp: wire.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chat(text: &str) -> Payload {
        Payload::Chat(ChatContent {
            text: text.into(),
            nickname: "ann".into(),
            ..Default::default()
        })
    }

    #[test]
    fn chat_envelope_wire_shape() {
        let envelope = Envelope::new("room1", chat("hello"))
            .with_sender("c1")
            .with_timestamp(1_700_000_000);
        let value: Value = serde_json::from_str(envelope.encode().unwrap().as_str()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "chat",
                "from": "c1",
                "room_id": "room1",
                "content": {"text": "hello", "nickname": "ann"},
                "timestamp": 1_700_000_000
            })
        );
    }

    #[test]
    fn missing_sender_is_omitted_and_unit_content_is_null() {
        let envelope = Envelope::new("room1", Payload::Heartbeat(None)).with_timestamp(5);
        let value: Value = serde_json::to_value(&envelope).unwrap();
        assert!(value.get("from").is_none());
        assert_eq!(value["type"], "heartbeat");
        assert_eq!(value["content"], Value::Null);
    }

    #[test]
    fn decode_typed_payloads() {
        let text = r#"{"type":"game_action","room_id":"r","content":{"action":"play_card","data":{"card":"7H"}},"timestamp":9}"#;
        let envelope = Envelope::decode(text).unwrap();
        let Payload::GameAction(action) = &envelope.payload else {
            panic!("expected game action, got {:?}", envelope.payload);
        };
        assert_eq!(action.action, "play_card");
        assert_eq!(action.target, None);
        assert_eq!(action.data.as_ref().unwrap()["card"], "7H");
        assert_eq!(envelope.from, None);
        assert_eq!(envelope.timestamp, 9);

        let notice = r#"{"type":"notice","room_id":"r","content":{"title":"t","message":"m","level":"warning"},"timestamp":1}"#;
        let envelope = Envelope::decode(notice).unwrap();
        assert_eq!(envelope.payload.message_type(), Some(MessageType::Notice));
    }

    #[test]
    fn decode_rejects_mistyped_content() {
        let text = r#"{"type":"chat","room_id":"r","content":{"text":1},"timestamp":1}"#;
        assert!(Envelope::decode(text).is_err());
        assert!(Envelope::decode("not json").is_err());
    }

    #[test]
    fn unknown_tag_roundtrips_as_opaque_extension() {
        let text = r#"{"type":"vote","from":"c9","room_id":"r","content":{"target":"c2"},"timestamp":3}"#;
        let envelope = Envelope::decode(text).unwrap();
        assert_eq!(envelope.kind(), "vote");
        assert!(matches!(envelope.payload, Payload::Other { .. }));

        let back: Value = serde_json::from_str(envelope.encode().unwrap().as_str()).unwrap();
        let original: Value = serde_json::from_str(text).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn invalid_extension_fails_serialization() {
        let bad_json = Envelope::new(
            "r",
            Payload::Other {
                kind: "vote".into(),
                content: b"{not json".to_vec(),
            },
        );
        assert!(matches!(
            bad_json.encode(),
            Err(ManagerError::Serialization(_))
        ));

        let reserved = Envelope::new(
            "r",
            Payload::Other {
                kind: "chat".into(),
                content: b"{}".to_vec(),
            },
        );
        assert!(matches!(
            reserved.encode(),
            Err(ManagerError::Serialization(_))
        ));

        let empty = Envelope::new(
            "r",
            Payload::Other {
                kind: String::new(),
                content: b"null".to_vec(),
            },
        );
        assert!(empty.encode().is_err());
    }

    fn relay_roundtrip(text: &str) {
        let envelope = Envelope::decode(text).unwrap();
        let back: Value = serde_json::from_str(envelope.encode().unwrap().as_str()).unwrap();
        let original: Value = serde_json::from_str(text).unwrap();
        assert_eq!(back, original, "content changed for {text}");
    }

    #[test]
    fn unit_payload_content_is_kept() {
        let text = r#"{"type":"join","room_id":"r","content":{"nickname":"ann"},"timestamp":2}"#;
        let envelope = Envelope::decode(text).unwrap();
        assert_eq!(
            envelope.payload,
            Payload::Join(Some(json!({"nickname": "ann"})))
        );
        relay_roundtrip(text);
        relay_roundtrip(r#"{"type":"heartbeat","room_id":"r","content":null,"timestamp":2}"#);
        relay_roundtrip(r#"{"type":"leave","room_id":"r","content":"bye","timestamp":2}"#);
    }

    #[test]
    fn unknown_fields_in_typed_content_survive_relay() {
        let text = r#"{"type":"chat","room_id":"r","content":{"text":"hi","nickname":"ann","color":"red"},"timestamp":4}"#;
        let envelope = Envelope::decode(text).unwrap();
        let Payload::Chat(chat) = &envelope.payload else {
            panic!("expected chat, got {:?}", envelope.payload);
        };
        assert_eq!(chat.extra["color"], "red");
        relay_roundtrip(text);

        relay_roundtrip(
            r#"{"type":"game_action","room_id":"r","content":{"action":"move","target":"c2","speed":3},"timestamp":4}"#,
        );
    }

    #[test]
    fn lenient_notice_level_and_negative_round() {
        let notice = r#"{"type":"notice","room_id":"r","content":{"title":"t","message":"m","level":"critical"},"timestamp":1}"#;
        let envelope = Envelope::decode(notice).unwrap();
        let Payload::Notice(content) = &envelope.payload else {
            panic!("expected notice, got {:?}", envelope.payload);
        };
        assert_eq!(content.level, NoticeLevel::Custom("critical".into()));
        relay_roundtrip(notice);

        let state = r#"{"type":"game_state","room_id":"r","content":{"phase":"setup","round":-1},"timestamp":1}"#;
        let envelope = Envelope::decode(state).unwrap();
        let Payload::GameState(content) = &envelope.payload else {
            panic!("expected game state, got {:?}", envelope.payload);
        };
        assert_eq!(content.round, -1);
        relay_roundtrip(state);
    }

    #[test]
    fn known_notice_levels_use_named_variants() {
        assert_eq!(NoticeLevel::from("warning".to_string()), NoticeLevel::Warning);
        assert_eq!(String::from(NoticeLevel::Error), "error");
        assert_eq!(serde_json::to_value(NoticeLevel::Info).unwrap(), json!("info"));
    }

    #[test]
    fn message_type_tags_are_stable() {
        for message_type in MessageType::ALL {
            assert_eq!(MessageType::from_tag(message_type.as_str()), Some(message_type));
            let json = serde_json::to_value(message_type).unwrap();
            assert_eq!(json, Value::from(message_type.as_str()));
        }
        assert_eq!(MessageType::from_tag("vote"), None);
    }
}
