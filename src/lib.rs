//! # room-relay
//!
//! Real-time, room-based messaging relay over WebSocket.
//!
//! Clients attach over `/ws`, identify themselves, join a room, and from
//! then on receive the room's chat messages, presence changes (`joined`,
//! `left`, `online-count-changed`) and typing indicators. Messages are
//! relayed to every member first and persisted afterwards, so a slow or
//! failing store never delays delivery.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket, HTTP)
//!     │
//!     ├── WS Handler (ws/)            REST Handlers (api/)
//!     │
//!     ├── RelayService (service/)
//!     │     ├── BroadcastEngine       per-room ordered fan-out
//!     │     ├── TypingTracker         indicator expiry
//!     │     └── PersistenceBridge     retried, off the delivery path
//!     │
//!     ├── RelayState (domain/)
//!     │     ├── ConnectionRegistry
//!     │     ├── RoomDirectory
//!     │     └── PresenceTracker
//!     │
//!     └── DirectoryService + MessageStore (persistence/)
//!           PostgreSQL or in-memory
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
pub mod ws;

use std::time::Duration;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// Builds the full HTTP application: REST routes, the `/ws` endpoint,
/// optional Swagger UI, and the tower middleware stack.
pub fn build_app(state: AppState, request_timeout: Duration) -> Router {
    let router = Router::new()
        .merge(api::build_router())
        .route("/ws", get(ws_handler));

    #[cfg(feature = "swagger-ui")]
    let router = {
        use utoipa::OpenApi;
        router.merge(
            utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", api::ApiDoc::openapi()),
        )
    };

    router
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
