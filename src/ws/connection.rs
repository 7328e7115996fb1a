//! WebSocket connection loop.
//!
//! One task per socket. The loop parses client frames into commands,
//! writes the connection's outbound queue to the socket, and pings on a
//! fixed interval. A client that misses two consecutive pongs is dropped.
//! However the loop ends, the connection is detached from the relay.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::time::MissedTickBehavior;

use crate::domain::{ClientCommand, ConnectionId};
use crate::error::RelayError;
use crate::service::{ConnectionHandle, RelayService};

/// Consecutive unanswered pings before the connection is dropped.
const MAX_MISSED_PONGS: u32 = 2;

/// Runs the read/write loop for a single WebSocket connection.
///
/// - Reads commands from the client and dispatches them to the relay.
/// - Forwards events queued for this connection to the client.
/// - Sends a ping every `heartbeat_interval`.
pub async fn run_connection(
    socket: WebSocket,
    relay: RelayService,
    handle: ConnectionHandle,
    heartbeat_interval: Duration,
) {
    let ConnectionHandle { id, mut events } = handle;
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + heartbeat_interval,
        heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut awaiting_pong = false;
    let mut missed_pongs = 0u32;

    loop {
        tokio::select! {
            // Incoming frame from client
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => handle_text(&relay, id, text.as_str()).await,
                    Some(Ok(Message::Binary(_))) => {
                        let err = RelayError::MalformedCommand("binary frames are not supported".to_string());
                        relay.reject(id, &err).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                        missed_pongs = 0;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(connection = %id, error = %e, "ws read failed");
                        break;
                    }
                }
            }
            // Event queued by the relay
            event = events.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(event.as_ref()) {
                    Ok(json) => {
                        if ws_tx.send(Message::text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(connection = %id, kind = event.kind(), error = %e, "event serialization failed");
                    }
                }
            }
            _ = heartbeat.tick() => {
                if awaiting_pong {
                    missed_pongs += 1;
                    if missed_pongs >= MAX_MISSED_PONGS {
                        tracing::warn!(connection = %id, missed_pongs, "heartbeat timeout, dropping connection");
                        break;
                    }
                }
                awaiting_pong = true;
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    relay.disconnect(id).await;
    tracing::debug!(connection = %id, "ws connection closed");
}

/// Parses one text frame and hands the command to the relay. Frames that
/// are not valid commands are answered with an `error` event.
async fn handle_text(relay: &RelayService, conn: ConnectionId, text: &str) {
    match serde_json::from_str::<ClientCommand>(text) {
        Ok(command) => relay.dispatch(conn, command).await,
        Err(e) => {
            relay
                .reject(conn, &RelayError::MalformedCommand(e.to_string()))
                .await;
        }
    }
}
