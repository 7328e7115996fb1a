//! WebSocket layer: upgrade handling and the per-connection loop.
//!
//! The endpoint at `/ws` carries the JSON protocol defined in
//! [`crate::domain::events`]: client commands in, relay events out.

pub mod connection;
pub mod handler;
