//! Room read DTOs.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::domain::RoomId;
use crate::persistence::MessageRecord;

/// Query parameters for `GET /rooms/{room_id}/messages`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct HistoryParams {
    /// Maximum number of messages (1-100). Defaults to 50.
    #[serde(default)]
    pub limit: Option<u32>,
    /// Number of newest messages to skip. Defaults to 0.
    #[serde(default)]
    pub skip: u32,
}

/// Response body for `GET /rooms/{room_id}/messages`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageHistoryResponse {
    /// Room the messages belong to.
    pub room_id: RoomId,
    /// Number of messages returned.
    pub count: usize,
    /// Messages stored for the room across all pages.
    pub total_count: u64,
    /// Messages, oldest first.
    pub data: Vec<MessageRecord>,
}
