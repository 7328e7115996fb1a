//! Axum WebSocket upgrade handler.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use utoipa::IntoParams;

use super::connection::run_connection;
use crate::app_state::AppState;

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ConnectParams {
    /// Authenticated user id forwarded by the front end. When absent the
    /// connection id is used.
    #[serde(default)]
    pub user_id: Option<String>,
}

/// `GET /ws`: Upgrade HTTP connection to WebSocket.
///
/// The connection is registered with the relay once the upgrade completes.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
) -> impl IntoResponse {
    let relay = state.relay.clone();
    let heartbeat = state.heartbeat_interval;

    ws.on_upgrade(move |socket| async move {
        match relay.connect(params.user_id).await {
            Ok(handle) => run_connection(socket, relay, handle, heartbeat).await,
            Err(e) => tracing::error!(error = %e, "connection registration failed"),
        }
    })
}
