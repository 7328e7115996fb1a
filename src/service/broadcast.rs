//! Room fan-out.
//!
//! [`BroadcastEngine`] delivers one event to every current member of a
//! room. Membership is resolved under the state read lock at call time, so
//! a fan-out never overlaps a join or leave. Submissions to the same room
//! take turns on a per-room sequencer, which keeps per-room delivery order
//! equal to submission order; different rooms fan out concurrently.
//!
//! Delivery to each member is a non-blocking enqueue on that member's
//! bounded outbound queue. A full or closed queue is counted and skipped.
//!
//! A broadcast sent on behalf of a member is dropped if that member has
//! left the room by the time its turn comes, so nothing a member sends can
//! reach the room after its `left` notice.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use utoipa::ToSchema;

use crate::domain::connection_registry::{ConnectionRegistry, Delivery};
use crate::domain::events::ServerEvent;
use crate::domain::ids::{ConnectionId, RoomId};
use crate::domain::relay_state::RelayState;

/// Outcome of one fan-out. A report with `delivered < attempted` is a
/// partial failure, which is recorded but never raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct DeliveryReport {
    /// Recipients the engine tried to reach.
    pub attempted: usize,
    /// Recipients whose queue accepted the event.
    pub delivered: usize,
}

impl DeliveryReport {
    /// Recipients that were skipped.
    #[must_use]
    pub const fn failed(&self) -> usize {
        self.attempted.saturating_sub(self.delivered)
    }

    /// Returns `true` if at least one recipient was skipped.
    #[must_use]
    pub const fn is_partial(&self) -> bool {
        self.delivered < self.attempted
    }
}

/// Who a room broadcast is sent on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Sent by the relay itself; every member receives it.
    Relay,
    /// Sent by a member of the room. The broadcast is dropped if `sender`
    /// is no longer a member. With `echo`, the sender receives a copy too.
    Member {
        /// Connection the event comes from.
        sender: ConnectionId,
        /// Whether the sender receives its own event.
        echo: bool,
    },
}

impl Origin {
    fn excluded(self) -> Option<ConnectionId> {
        match self {
            Self::Member { sender, echo: false } => Some(sender),
            Self::Relay | Self::Member { echo: true, .. } => None,
        }
    }
}

/// Cumulative delivery counters.
#[derive(Debug, Default)]
struct DeliveryStats {
    fan_outs: AtomicU64,
    attempted: AtomicU64,
    delivered: AtomicU64,
    backpressured: AtomicU64,
    closed: AtomicU64,
}

/// Point-in-time copy of the engine's delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct DeliveryStatsSnapshot {
    /// Fan-outs performed.
    pub fan_outs: u64,
    /// Individual deliveries attempted.
    pub attempted: u64,
    /// Individual deliveries accepted.
    pub delivered: u64,
    /// Deliveries dropped because a queue was full.
    pub backpressured: u64,
    /// Deliveries dropped because the connection was gone.
    pub closed: u64,
}

/// Per-room ordered, partial-failure-tolerant fan-out.
#[derive(Debug, Default)]
pub struct BroadcastEngine {
    sequencers: Mutex<HashMap<RoomId, Arc<Mutex<()>>>>,
    stats: DeliveryStats,
}

impl BroadcastEngine {
    /// Creates an engine with no rooms seen yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `event` to every current member of `room`, skipping the
    /// sender unless `origin` asks for an echo.
    ///
    /// Calls for the same room are serialized in call order; the event
    /// reaches members in the order broadcasts were submitted. Returns
    /// `None` without delivering anything if the sending member is no
    /// longer in `room`.
    pub async fn broadcast(
        &self,
        state: &RwLock<RelayState>,
        room: &RoomId,
        event: ServerEvent,
        origin: Origin,
    ) -> Option<DeliveryReport> {
        let sequencer = self.sequencer(room).await;
        let _turn = sequencer.lock().await;

        let state = state.read().await;
        let departed = match origin {
            Origin::Member { sender, .. } => {
                (!state.directory().is_member(room, &sender)).then_some(sender)
            }
            Origin::Relay => None,
        };
        if let Some(sender) = departed {
            tracing::debug!(%room, connection = %sender, kind = event.kind(), "sender left the room, broadcast dropped");
            return None;
        }
        let exclude = origin.excluded();
        let recipients = state
            .directory()
            .members(room)
            .iter()
            .copied()
            .filter(|member| Some(*member) != exclude);
        let report = self.fan_out(state.registry(), recipients, &Arc::new(event));
        drop(state);

        if report.is_partial() {
            tracing::debug!(
                %room,
                attempted = report.attempted,
                delivered = report.delivered,
                "partial room delivery"
            );
        }
        Some(report)
    }

    /// Delivers `event` to an explicit recipient list. The caller must
    /// hold the state lock that `registry` was borrowed from.
    pub fn fan_out(
        &self,
        registry: &ConnectionRegistry,
        recipients: impl IntoIterator<Item = ConnectionId>,
        event: &Arc<ServerEvent>,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut backpressured = 0u64;
        let mut closed = 0u64;

        for id in recipients {
            report.attempted += 1;
            let outcome = registry
                .get(&id)
                .map_or(Delivery::Closed, |conn| conn.outbound.deliver(event));
            match outcome {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Backpressured => {
                    backpressured += 1;
                    tracing::warn!(connection = %id, kind = event.kind(), "outbound queue full, event dropped");
                }
                Delivery::Closed => closed += 1,
            }
        }

        self.stats.fan_outs.fetch_add(1, Ordering::Relaxed);
        self.stats
            .attempted
            .fetch_add(report.attempted as u64, Ordering::Relaxed);
        self.stats
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.stats
            .backpressured
            .fetch_add(backpressured, Ordering::Relaxed);
        self.stats.closed.fetch_add(closed, Ordering::Relaxed);
        report
    }

    /// Returns the cumulative delivery counters.
    #[must_use]
    pub fn stats(&self) -> DeliveryStatsSnapshot {
        DeliveryStatsSnapshot {
            fan_outs: self.stats.fan_outs.load(Ordering::Relaxed),
            attempted: self.stats.attempted.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            backpressured: self.stats.backpressured.load(Ordering::Relaxed),
            closed: self.stats.closed.load(Ordering::Relaxed),
        }
    }

    async fn sequencer(&self, room: &RoomId) -> Arc<Mutex<()>> {
        let mut sequencers = self.sequencers.lock().await;
        Arc::clone(sequencers.entry(room.clone()).or_default())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::domain::connection_registry::Outbound;

    type Inbox = mpsc::Receiver<Arc<ServerEvent>>;

    async fn join(state: &RwLock<RelayState>, room: &RoomId, name: &str, capacity: usize) -> (ConnectionId, Inbox) {
        let id = ConnectionId::new();
        let (outbound, rx) = Outbound::channel(capacity);
        let mut guard = state.write().await;
        let _ = guard.register(id, name, outbound);
        let _ = guard.identify(id, name.to_string(), String::new());
        if guard.join(id, room).is_err() {
            panic!("join failed");
        }
        (id, rx)
    }

    fn typing(n: usize) -> ServerEvent {
        ServerEvent::Typing {
            sender_name: format!("m{n}"),
        }
    }

    fn drain(rx: &mut Inbox) -> Vec<Arc<ServerEvent>> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn delivers_in_submission_order_to_every_member() {
        let state = RwLock::new(RelayState::new());
        let engine = BroadcastEngine::new();
        let room = RoomId::from("general");
        let (_a, mut rx_a) = join(&state, &room, "A", 64).await;
        let (_b, mut rx_b) = join(&state, &room, "B", 64).await;

        for n in 0..10 {
            let report = engine.broadcast(&state, &room, typing(n), Origin::Relay).await;
            assert_eq!(report, Some(DeliveryReport { attempted: 2, delivered: 2 }));
        }

        for rx in [&mut rx_a, &mut rx_b] {
            let received = drain(rx);
            let expected: Vec<_> = (0..10).map(|n| Arc::new(typing(n))).collect();
            assert_eq!(received, expected);
        }
    }

    #[tokio::test]
    async fn exclude_skips_sender() {
        let state = RwLock::new(RelayState::new());
        let engine = BroadcastEngine::new();
        let room = RoomId::from("general");
        let (a, mut rx_a) = join(&state, &room, "A", 8).await;
        let (_b, mut rx_b) = join(&state, &room, "B", 8).await;

        let origin = Origin::Member { sender: a, echo: false };
        let Some(report) = engine.broadcast(&state, &room, typing(0), origin).await else {
            panic!("sender is still a member");
        };
        assert_eq!(report.attempted, 1);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[tokio::test]
    async fn echo_includes_sender() {
        let state = RwLock::new(RelayState::new());
        let engine = BroadcastEngine::new();
        let room = RoomId::from("general");
        let (a, mut rx_a) = join(&state, &room, "A", 8).await;
        let (_b, mut rx_b) = join(&state, &room, "B", 8).await;

        let origin = Origin::Member { sender: a, echo: true };
        let report = engine.broadcast(&state, &room, typing(0), origin).await;
        assert_eq!(report, Some(DeliveryReport { attempted: 2, delivered: 2 }));
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[tokio::test]
    async fn sender_that_left_reaches_nobody() {
        let state = RwLock::new(RelayState::new());
        let engine = BroadcastEngine::new();
        let room = RoomId::from("general");
        let (a, _rx_a) = join(&state, &room, "A", 8).await;
        let (_b, mut rx_b) = join(&state, &room, "B", 8).await;
        let Ok(Some(_)) = state.write().await.leave(a, &room) else {
            panic!("leave failed");
        };

        for echo in [false, true] {
            let origin = Origin::Member { sender: a, echo };
            assert_eq!(engine.broadcast(&state, &room, typing(0), origin).await, None);
        }
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(engine.stats().fan_outs, 0);
    }

    #[tokio::test]
    async fn dead_member_does_not_abort_fan_out() {
        let state = RwLock::new(RelayState::new());
        let engine = BroadcastEngine::new();
        let room = RoomId::from("general");
        let (_a, rx_a) = join(&state, &room, "A", 8).await;
        let (_b, mut rx_b) = join(&state, &room, "B", 8).await;
        drop(rx_a);

        let Some(report) = engine.broadcast(&state, &room, typing(0), Origin::Relay).await else {
            panic!("relay broadcasts always run");
        };
        assert_eq!(report, DeliveryReport { attempted: 2, delivered: 1 });
        assert!(report.is_partial());
        assert_eq!(drain(&mut rx_b).len(), 1);
        assert_eq!(engine.stats().closed, 1);
    }

    #[tokio::test]
    async fn slow_member_is_skipped_not_awaited() {
        let state = RwLock::new(RelayState::new());
        let engine = BroadcastEngine::new();
        let room = RoomId::from("general");
        let (slow, _rx_slow) = join(&state, &room, "slow", 1).await;
        let (_fast, mut rx_fast) = join(&state, &room, "fast", 8).await;
        // Fill the slow member's only slot.
        assert!(state.read().await.notify(slow, ServerEvent::StopTyping {}));

        let report = engine.broadcast(&state, &room, typing(0), Origin::Relay).await;
        assert_eq!(report.map(|r| r.delivered), Some(1));
        assert_eq!(drain(&mut rx_fast).len(), 1);
        assert_eq!(engine.stats().backpressured, 1);
    }

    #[tokio::test]
    async fn unknown_room_delivers_nothing() {
        let state = RwLock::new(RelayState::new());
        let engine = BroadcastEngine::new();
        let report = engine
            .broadcast(&state, &RoomId::from("empty"), typing(0), Origin::Relay)
            .await;
        assert_eq!(report, Some(DeliveryReport::default()));
    }
}
