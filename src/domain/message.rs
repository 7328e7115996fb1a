//! Chat messages and inbound text validation.

use chrono::{DateTime, Utc};

use super::events::ServerEvent;
use super::identity::Identity;
use super::ids::{MessageId, RoomId};
use crate::error::RelayError;
use crate::persistence::models::MessageRecord;

/// Default maximum message length in UTF-16 code units.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 1000;

/// A confirmed chat message: validated text plus server-assigned id and
/// timestamp.
///
/// The broadcast copy ([`ChatMessage::to_event`]) and the durable copy
/// ([`ChatMessage::to_record`]) are derived from the same value, so both
/// carry the same id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Server-assigned identifier.
    pub id: MessageId,
    /// Room the message was sent to.
    pub room_id: RoomId,
    /// Sender identity.
    pub sender: Identity,
    /// Trimmed body.
    pub text: String,
    /// Server-assigned timestamp.
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Validates `raw_text` and stamps a new message.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ValidationFailed`] if the text is empty after
    /// trimming or longer than `max_len` UTF-16 code units.
    pub fn compose(
        room_id: RoomId,
        sender: Identity,
        raw_text: &str,
        max_len: usize,
    ) -> Result<Self, RelayError> {
        let text = validate_text(raw_text, max_len)?;
        Ok(Self {
            id: MessageId::new(),
            room_id,
            sender,
            text,
            timestamp: Utc::now(),
        })
    }

    /// Builds the outbound `chat-message` event.
    #[must_use]
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::ChatMessage {
            id: self.id,
            room_id: self.room_id.clone(),
            sender_name: self.sender.display_name.clone(),
            sender_avatar: self.sender.avatar_ref.clone(),
            text: self.text.clone(),
            timestamp: self.timestamp,
        }
    }

    /// Builds the record handed to the persistence collaborator.
    #[must_use]
    pub fn to_record(&self) -> MessageRecord {
        MessageRecord {
            id: self.id,
            room_id: self.room_id.clone(),
            sender_id: self.sender.user_id.clone(),
            sender_name: self.sender.display_name.clone(),
            sender_avatar: self.sender.avatar_ref.clone(),
            text: self.text.clone(),
            created_at: self.timestamp,
        }
    }
}

/// Trims `raw` and checks it is non-empty and at most `max_len` UTF-16
/// code units long.
///
/// # Errors
///
/// Returns [`RelayError::ValidationFailed`] describing the violated bound.
pub fn validate_text(raw: &str, max_len: usize) -> Result<String, RelayError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(RelayError::ValidationFailed(
            "message must not be empty".to_string(),
        ));
    }
    let units = text.encode_utf16().count();
    if units > max_len {
        return Err(RelayError::ValidationFailed(format!(
            "message is {units} units long; limit is {max_len}"
        )));
    }
    Ok(text.to_string())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity::new("u-a", "A", "avatar-a")
    }

    #[test]
    fn trims_surrounding_whitespace() {
        let Ok(text) = validate_text("  hello \n", 10) else {
            panic!("valid text rejected");
        };
        assert_eq!(text, "hello");
    }

    #[test]
    fn rejects_blank_text() {
        assert!(matches!(
            validate_text(" \t ", 10),
            Err(RelayError::ValidationFailed(_))
        ));
    }

    #[test]
    fn length_limit_is_inclusive() {
        let exact = "x".repeat(DEFAULT_MAX_MESSAGE_LENGTH);
        assert!(validate_text(&exact, DEFAULT_MAX_MESSAGE_LENGTH).is_ok());
        let over = "x".repeat(DEFAULT_MAX_MESSAGE_LENGTH + 1);
        assert!(validate_text(&over, DEFAULT_MAX_MESSAGE_LENGTH).is_err());
    }

    #[test]
    fn astral_characters_count_as_two_units() {
        // U+1F338 is one char but two UTF-16 code units.
        assert!(validate_text("\u{1F338}", 1).is_err());
        assert!(validate_text("\u{1F338}", 2).is_ok());
    }

    #[test]
    fn event_and_record_share_id_and_timestamp() {
        let Ok(msg) = ChatMessage::compose(RoomId::from("general"), alice(), " hi ", 100) else {
            panic!("compose failed");
        };
        let record = msg.to_record();
        let ServerEvent::ChatMessage { id, timestamp, text, .. } = msg.to_event() else {
            panic!("expected chat-message event");
        };
        assert_eq!(id, record.id);
        assert_eq!(timestamp, record.created_at);
        assert_eq!(text, "hi");
        assert_eq!(record.sender_id, "u-a");
    }
}
