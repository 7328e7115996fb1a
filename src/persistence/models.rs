//! Records exchanged with the external directory and persistence services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::ids::{MessageId, RoomId};

/// A chat message as stored by the persistence service.
///
/// `id` and `created_at` are assigned by the relay before broadcast and
/// stored verbatim, so clients can match history against live messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Relay-assigned message identifier.
    pub id: MessageId,
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Sender user id.
    pub sender_id: String,
    /// Sender display name at send time.
    pub sender_name: String,
    /// Sender avatar reference at send time.
    pub sender_avatar: String,
    /// Message body.
    pub text: String,
    /// Relay-assigned timestamp.
    pub created_at: DateTime<Utc>,
}

/// Room metadata owned by the directory service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomMetadata {
    /// Room identifier.
    pub id: RoomId,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Number of messages persisted for the room.
    pub message_count: i64,
}
