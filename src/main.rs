//! room-relay server entry point.
//!
//! Starts the Axum HTTP server with the WebSocket relay and REST endpoints.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use room_relay::app_state::AppState;
use room_relay::build_app;
use room_relay::config::{LogFormat, RelayConfig};
use room_relay::persistence::{DirectoryService, InMemoryStore, MessageStore, PostgresStore};
use room_relay::service::{RelayService, spawn_retention_sweeper};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = RelayConfig::from_env().context("invalid LISTEN_ADDR")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    tracing::info!(addr = %config.listen_addr, "starting room-relay");

    // Build persistence layer
    let (directory, store) = build_stores(&config).await?;

    // Build service layer
    let relay = RelayService::new(directory, store, config.relay);

    if config.message_retention_hours > 0 {
        let _sweeper = spawn_retention_sweeper(
            relay.clone(),
            Duration::from_secs(config.message_retention_hours.saturating_mul(3600)),
            Duration::from_secs(config.retention_sweep_interval_secs),
        );
    }

    // Build application state
    let app_state = AppState {
        relay,
        heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs.max(1)),
    };

    // Build router
    let app = build_app(app_state, Duration::from_secs(config.request_timeout_secs));

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

/// Selects PostgreSQL or the in-memory store.
async fn build_stores(
    config: &RelayConfig,
) -> anyhow::Result<(Arc<dyn DirectoryService>, Arc<dyn MessageStore>)> {
    if !config.persistence_enabled {
        tracing::warn!("persistence disabled, history is kept in memory");
        let store = Arc::new(InMemoryStore::new(config.rooms_auto_create));
        return Ok((
            Arc::clone(&store) as Arc<dyn DirectoryService>,
            store as Arc<dyn MessageStore>,
        ));
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .min_connections(config.database_min_connections)
        .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
        .connect(&config.database_url)
        .await
        .context("failed to connect to PostgreSQL")?;

    let store = Arc::new(PostgresStore::new(pool, config.rooms_auto_create));
    store.migrate().await.context("database migration failed")?;
    tracing::info!("connected to PostgreSQL");

    Ok((
        Arc::clone(&store) as Arc<dyn DirectoryService>,
        store as Arc<dyn MessageStore>,
    ))
}

/// Resolves on Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
