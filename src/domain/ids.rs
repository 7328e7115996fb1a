//! Type-safe identifiers for connections, rooms, and messages.
//!
//! Connection and message identifiers wrap a [`uuid::Uuid`] (v4) so they
//! cannot be confused with each other. Room identifiers are opaque strings
//! owned by the external directory service.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::RelayError;

/// Longest accepted room identifier, in characters.
pub const MAX_ROOM_ID_LENGTH: usize = 64;

/// Identifier of one live duplex channel to a client.
///
/// Generated when the transport attaches and never reused. The Room
/// Directory only ever holds this value, never the connection itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    /// Creates a new random `ConnectionId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the inner [`uuid::Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a chat message, assigned by the relay before broadcast.
///
/// The same value is handed to the persistence collaborator so the live
/// copy and the stored copy of a message share one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct MessageId(uuid::Uuid);

impl MessageId {
    /// Creates a new random `MessageId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Creates a `MessageId` from an existing [`uuid::Uuid`].
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner [`uuid::Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a room (named broadcast domain).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Creates a `RoomId` from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Checks that the identifier can name a room: not blank, no
    /// surrounding whitespace, no control characters, and at most
    /// [`MAX_ROOM_ID_LENGTH`] characters.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ValidationFailed`] describing the first
    /// violated rule.
    pub fn validate(&self) -> Result<(), RelayError> {
        let id = self.0.as_str();
        if id.trim().is_empty() {
            return Err(RelayError::ValidationFailed(
                "room id must not be empty".to_string(),
            ));
        }
        if id.trim() != id {
            return Err(RelayError::ValidationFailed(
                "room id must not start or end with whitespace".to_string(),
            ));
        }
        if id.chars().count() > MAX_ROOM_ID_LENGTH {
            return Err(RelayError::ValidationFailed(format!(
                "room id exceeds {MAX_ROOM_ID_LENGTH} characters"
            )));
        }
        if id.chars().any(char::is_control) {
            return Err(RelayError::ValidationFailed(
                "room id must not contain control characters".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn new_generates_unique_connection_ids() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn room_id_serializes_as_plain_string() {
        let id = RoomId::from("general");
        let Ok(json) = serde_json::to_string(&id) else {
            panic!("serialization failed");
        };
        assert_eq!(json, "\"general\"");
    }

    #[test]
    fn room_id_validation() {
        assert!(RoomId::from("general").validate().is_ok());
        assert!(RoomId::new("é".repeat(MAX_ROOM_ID_LENGTH)).validate().is_ok());

        for bad in [
            String::new(),
            "   ".to_string(),
            " general".to_string(),
            "gen\neral".to_string(),
            "x".repeat(MAX_ROOM_ID_LENGTH + 1),
        ] {
            let Err(RelayError::ValidationFailed(_)) = RoomId::new(bad.clone()).validate() else {
                panic!("{bad:?} should be rejected");
            };
        }
    }

    #[test]
    fn message_id_display_is_uuid_format() {
        let id = MessageId::new();
        let s = format!("{id}");
        assert_eq!(s.len(), 36);
        assert!(s.contains('-'));
    }

    #[test]
    fn connection_id_works_as_map_key() {
        use std::collections::HashMap;
        let id = ConnectionId::new();
        let mut map = HashMap::new();
        map.insert(id, "conn");
        assert_eq!(map.get(&id), Some(&"conn"));
    }
}
