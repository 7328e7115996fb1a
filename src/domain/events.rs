//! Wire protocol: commands a client sends and events the relay delivers.
//!
//! Both directions are JSON objects internally tagged on `"type"` with
//! kebab-case tags and camelCase fields, e.g.
//!
//! ```json
//! {"type": "send-message", "roomId": "general", "text": "hello"}
//! {"type": "online-count-changed", "count": 1}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::ids::{MessageId, RoomId};
use super::identity::Identity;

/// Commands a client can send over its connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Bind a display identity to the connection.
    Identify {
        /// Name shown to other members.
        display_name: String,
        /// Avatar reference.
        #[serde(default)]
        avatar_ref: String,
    },
    /// Join (or switch to) a room.
    JoinRoom {
        /// Target room.
        room_id: RoomId,
    },
    /// Leave a room.
    LeaveRoom {
        /// Room to leave.
        room_id: RoomId,
    },
    /// Send a chat message to a room.
    SendMessage {
        /// Target room; must be the sender's current room.
        room_id: RoomId,
        /// Message body.
        text: String,
    },
    /// The sender started typing in its current room.
    TypingStart,
    /// The sender stopped typing in its current room.
    TypingStop,
}

/// One entry of a room's "who's here" listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    /// Member identity.
    #[serde(flatten)]
    pub identity: Identity,
    /// When the member's connection joined the room.
    pub joined_at: DateTime<Utc>,
}

/// Events the relay delivers to connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Someone joined the room (delivered to every member, including them).
    Joined {
        /// Identity of the member who joined.
        identity: Identity,
        /// Room population after the join.
        online_count: usize,
    },
    /// Someone left the room (delivered to the remaining members).
    Left {
        /// Identity of the member who left.
        identity: Identity,
    },
    /// Room population changed after a departure.
    OnlineCountChanged {
        /// New room population.
        count: usize,
    },
    /// Private answer to a successful join.
    RoomJoined {
        /// Joined room.
        room_id: RoomId,
        /// Room display name from the directory service.
        room_name: String,
        /// Room description from the directory service.
        description: String,
        /// Current members in join order, including the joiner.
        members: Vec<MemberView>,
    },
    /// A chat message broadcast to a room.
    ChatMessage {
        /// Server-assigned message identifier.
        id: MessageId,
        /// Room the message belongs to.
        room_id: RoomId,
        /// Sender display name.
        sender_name: String,
        /// Sender avatar reference.
        sender_avatar: String,
        /// Trimmed message body.
        text: String,
        /// Server-assigned timestamp.
        timestamp: DateTime<Utc>,
    },
    /// Another member is typing.
    Typing {
        /// Display name of the typist.
        sender_name: String,
    },
    /// A typing indicator ended, explicitly or by expiry.
    StopTyping {},
    /// A command from this connection was rejected.
    Error {
        /// Numeric error code.
        code: u32,
        /// Human-readable reason.
        reason: String,
    },
}

impl ServerEvent {
    /// Returns the wire tag of this event.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Joined { .. } => "joined",
            Self::Left { .. } => "left",
            Self::OnlineCountChanged { .. } => "online-count-changed",
            Self::RoomJoined { .. } => "room-joined",
            Self::ChatMessage { .. } => "chat-message",
            Self::Typing { .. } => "typing",
            Self::StopTyping {} => "stop-typing",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_message_command() {
        let raw = r#"{"type":"send-message","roomId":"general","text":"hello"}"#;
        let Ok(cmd) = serde_json::from_str::<ClientCommand>(raw) else {
            panic!("command should parse");
        };
        assert_eq!(
            cmd,
            ClientCommand::SendMessage {
                room_id: RoomId::from("general"),
                text: "hello".to_string(),
            }
        );
    }

    #[test]
    fn parses_unit_typing_commands() {
        let Ok(start) = serde_json::from_str::<ClientCommand>(r#"{"type":"typing-start"}"#) else {
            panic!("typing-start should parse");
        };
        assert_eq!(start, ClientCommand::TypingStart);
        let Ok(stop) = serde_json::from_str::<ClientCommand>(r#"{"type":"typing-stop"}"#) else {
            panic!("typing-stop should parse");
        };
        assert_eq!(stop, ClientCommand::TypingStop);
    }

    #[test]
    fn identify_avatar_is_optional() {
        let raw = r#"{"type":"identify","displayName":"A"}"#;
        let Ok(ClientCommand::Identify { avatar_ref, .. }) = serde_json::from_str(raw) else {
            panic!("identify should parse");
        };
        assert!(avatar_ref.is_empty());
    }

    #[test]
    fn rejects_unknown_command() {
        let raw = r#"{"type":"self-destruct"}"#;
        assert!(serde_json::from_str::<ClientCommand>(raw).is_err());
    }

    #[test]
    fn online_count_event_wire_shape() {
        let event = ServerEvent::OnlineCountChanged { count: 1 };
        let value = serde_json::to_value(&event).unwrap_or_default();
        assert_eq!(
            value,
            serde_json::json!({"type": "online-count-changed", "count": 1})
        );
    }

    #[test]
    fn joined_event_uses_camel_case_fields() {
        let event = ServerEvent::Joined {
            identity: Identity::new("u1", "A", "avatar-1"),
            online_count: 2,
        };
        let value = serde_json::to_value(&event).unwrap_or_default();
        assert_eq!(value["type"], "joined");
        assert_eq!(value["onlineCount"], 2);
        assert_eq!(value["identity"]["displayName"], "A");
    }

    #[test]
    fn stop_typing_is_an_empty_object() {
        let value = serde_json::to_value(ServerEvent::StopTyping {}).unwrap_or_default();
        assert_eq!(value, serde_json::json!({"type": "stop-typing"}));
    }
}
