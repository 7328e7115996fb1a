//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Resource endpoints are mounted under `/api/v1`; `/health` sits at the
//! root. [`ApiDoc`] collects the OpenAPI description of every endpoint.

pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document for the REST surface.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "room-relay",
        description = "Read endpoints of the room relay. Live traffic uses the WebSocket at `/ws`."
    ),
    paths(
        handlers::system::health_handler,
        handlers::system::stats_handler,
        handlers::room::room_presence,
        handlers::room::room_messages,
    ),
    components(schemas(
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
        crate::domain::Identity,
        crate::domain::MemberView,
        crate::persistence::MessageRecord,
        crate::service::DeliveryStatsSnapshot,
    )),
    tags(
        (name = "Rooms", description = "Room presence and history"),
        (name = "System", description = "Health and statistics"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_every_endpoint() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/api/v1/stats",
            "/api/v1/rooms/{room_id}/presence",
            "/api/v1/rooms/{room_id}/messages",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
