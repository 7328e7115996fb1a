//! Shared application state injected into all Axum handlers.

use std::time::Duration;

use crate::service::RelayService;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Relay core shared by every connection and REST handler.
    pub relay: RelayService,
    /// Interval between server pings on each WebSocket.
    pub heartbeat_interval: Duration,
}
