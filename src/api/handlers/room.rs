//! Room read handlers: live presence and message history.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{HistoryParams, MessageHistoryResponse};
use crate::app_state::AppState;
use crate::domain::RoomId;
use crate::error::{ErrorResponse, RelayError};
use crate::service::RoomPresence;

/// `GET /rooms/{room_id}/presence`: Who is in a room right now.
#[utoipa::path(
    get,
    path = "/api/v1/rooms/{room_id}/presence",
    tag = "Rooms",
    summary = "Room presence",
    description = "Returns the live member list and online count of a room. Rooms nobody has joined report zero members.",
    params(
        ("room_id" = String, Path, description = "Room identifier"),
    ),
    responses(
        (status = 200, description = "Current members", body = RoomPresence),
        (status = 400, description = "Malformed room id", body = ErrorResponse),
    )
)]
pub async fn room_presence(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<impl IntoResponse, RelayError> {
    let room_id = RoomId::new(room_id);
    room_id.validate()?;
    Ok(Json(state.relay.room_presence(&room_id).await))
}

/// `GET /rooms/{room_id}/messages`: Message history, newest page first.
///
/// # Errors
///
/// Returns [`RelayError::ValidationFailed`] for a malformed room id, or
/// [`RelayError::PersistenceFailed`] if the store cannot be read.
#[utoipa::path(
    get,
    path = "/api/v1/rooms/{room_id}/messages",
    tag = "Rooms",
    summary = "Message history",
    description = "Returns persisted messages of a room, oldest first. `skip` pages back past the newest messages.",
    params(
        ("room_id" = String, Path, description = "Room identifier"),
        HistoryParams,
    ),
    responses(
        (status = 200, description = "Recent messages", body = MessageHistoryResponse),
        (status = 400, description = "Malformed room id", body = ErrorResponse),
        (status = 500, description = "Message store unavailable", body = ErrorResponse),
    )
)]
pub async fn room_messages(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, RelayError> {
    let room_id = RoomId::new(room_id);
    let page = state
        .relay
        .recent_messages(&room_id, params.limit, params.skip)
        .await?;
    Ok(Json(MessageHistoryResponse {
        room_id,
        count: page.messages.len(),
        total_count: page.total_count,
        data: page.messages,
    }))
}

/// Room routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/rooms/{room_id}/presence", get(room_presence))
        .route("/rooms/{room_id}/messages", get(room_messages))
}
