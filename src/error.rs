//! Relay error types with wire and HTTP mappings.
//!
//! [`RelayError`] is the central error type. Over WebSocket an error
//! becomes an `error` event on the originating connection only; over REST
//! it maps to an HTTP status code and a structured JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::events::ServerEvent;
use crate::domain::ids::{ConnectionId, RoomId};

/// Structured JSON error response body.
///
/// All REST error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "room not found: general"
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
}

/// Relay error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category                 | HTTP Status               |
/// |-----------|--------------------------|---------------------------|
/// | 1000–1999 | Validation / protocol    | 400 Bad Request / 409     |
/// | 2000–2999 | State / not found        | 404 Not Found / 409       |
/// | 3000–3999 | Server                   | 500 Internal Server Error |
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The connection id is not in the registry.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// A connection with this id is already registered.
    #[error("connection already registered: {0}")]
    DuplicateConnection(ConnectionId),

    /// `identify` was sent twice on the same connection.
    #[error("connection {0} is already identified")]
    AlreadyIdentified(ConnectionId),

    /// The operation needs an identity and the connection has none.
    #[error("connection {0} must identify first")]
    NotIdentified(ConnectionId),

    /// The directory service confirmed the room does not exist.
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),

    /// The connection is not a member of the room it addressed.
    #[error("not a member of room {0}")]
    NotInRoom(RoomId),

    /// Inbound payload failed validation.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// Inbound frame could not be parsed as a command.
    #[error("malformed command: {0}")]
    MalformedCommand(String),

    /// The persistence collaborator failed.
    #[error("persistence error: {0}")]
    PersistenceFailed(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::ValidationFailed(_) => 1001,
            Self::MalformedCommand(_) => 1002,
            Self::AlreadyIdentified(_) => 1003,
            Self::NotIdentified(_) => 1004,
            Self::DuplicateConnection(_) => 1005,
            Self::RoomNotFound(_) => 2001,
            Self::UnknownConnection(_) => 2002,
            Self::NotInRoom(_) => 2003,
            Self::Internal(_) => 3000,
            Self::PersistenceFailed(_) => 3001,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationFailed(_) | Self::MalformedCommand(_) => StatusCode::BAD_REQUEST,
            Self::RoomNotFound(_) | Self::UnknownConnection(_) => StatusCode::NOT_FOUND,
            Self::AlreadyIdentified(_)
            | Self::NotIdentified(_)
            | Self::DuplicateConnection(_)
            | Self::NotInRoom(_) => StatusCode::CONFLICT,
            Self::PersistenceFailed(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Builds the `error` event delivered to the originating connection.
    #[must_use]
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::Error {
            code: self.error_code(),
            reason: self.to_string(),
        }
    }
}

impl From<sqlx::Error> for RelayError {
    fn from(err: sqlx::Error) -> Self {
        Self::PersistenceFailed(err.to_string())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_not_found_maps_to_404() {
        let err = RelayError::RoomNotFound(RoomId::from("general"));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.error_code(), 2001);
    }

    #[test]
    fn error_event_carries_code_and_reason() {
        let err = RelayError::ValidationFailed("message must not be empty".to_string());
        assert_eq!(
            err.to_event(),
            ServerEvent::Error {
                code: 1001,
                reason: "validation failed: message must not be empty".to_string(),
            }
        );
    }

    #[test]
    fn into_response_sets_status() {
        let response = RelayError::Internal("boom".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
