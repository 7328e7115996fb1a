//! Per-connection typing indicator timers.
//!
//! A connection has at most one armed timer. Restarting typing replaces
//! the timer; each arm gets a fresh generation so a timer that fires after
//! being replaced (or after an explicit stop) finds a stale generation and
//! does nothing.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tokio::task::AbortHandle;

use crate::domain::ids::{ConnectionId, RoomId};

#[derive(Debug)]
struct TypingEntry {
    room: RoomId,
    generation: u64,
    timer: AbortHandle,
}

#[derive(Debug, Default)]
struct TypingTable {
    next_generation: u64,
    active: HashMap<ConnectionId, TypingEntry>,
}

/// Tracks which connections are typing and owns their expiry timers.
#[derive(Debug, Default)]
pub struct TypingTracker {
    table: Mutex<TypingTable>,
}

impl TypingTracker {
    /// Creates a tracker with nobody typing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `conn` as typing in `room` and arms a new expiry timer.
    ///
    /// `arm` receives the generation the timer must pass back to
    /// [`expire`](Self::expire) and returns a handle used to cancel it.
    /// Any previous timer for `conn` is aborted. Returns `true` if `conn`
    /// was not already typing.
    pub async fn start<F>(&self, conn: ConnectionId, room: RoomId, arm: F) -> bool
    where
        F: FnOnce(u64) -> AbortHandle,
    {
        let mut table = self.table.lock().await;
        table.next_generation = table.next_generation.wrapping_add(1);
        let generation = table.next_generation;
        let timer = arm(generation);
        let previous = table.active.insert(
            conn,
            TypingEntry {
                room,
                generation,
                timer,
            },
        );
        match previous {
            Some(previous) => {
                previous.timer.abort();
                false
            }
            None => true,
        }
    }

    /// Clears the typing state of `conn` and cancels its timer. Returns
    /// the room it was typing in, or `None` if it was not typing.
    pub async fn stop(&self, conn: ConnectionId) -> Option<RoomId> {
        let entry = self.table.lock().await.active.remove(&conn)?;
        entry.timer.abort();
        Some(entry.room)
    }

    /// Clears the typing state of `conn` if its armed timer is still
    /// `generation`. Called by the timer itself when it fires.
    pub async fn expire(&self, conn: ConnectionId, generation: u64) -> Option<RoomId> {
        let mut table = self.table.lock().await;
        match table.active.get(&conn) {
            Some(entry) if entry.generation == generation => {
                table.active.remove(&conn).map(|entry| entry.room)
            }
            _ => None,
        }
    }

    /// Returns `true` if `conn` is currently typing.
    pub async fn is_typing(&self, conn: ConnectionId) -> bool {
        self.table.lock().await.active.contains_key(&conn)
    }
}
