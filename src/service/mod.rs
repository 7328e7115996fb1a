//! Service layer: orchestration of the relay core.
//!
//! [`RelayService`] is the entry point. It coordinates the shared relay
//! state, the [`BroadcastEngine`] for room fan-out, the [`TypingTracker`]
//! for indicator expiry, and the [`PersistenceBridge`] that hands
//! confirmed messages to the store off the delivery path. A retention
//! sweeper deletes expired history in the background.

pub mod broadcast;
pub mod persistence_bridge;
pub mod relay_service;
pub mod retention;
pub mod typing;

pub use broadcast::{BroadcastEngine, DeliveryReport, DeliveryStatsSnapshot, Origin};
pub use persistence_bridge::{PersistOutcome, PersistenceBridge};
pub use relay_service::{
    ConnectionHandle, DEFAULT_HISTORY_LIMIT, HistoryPage, MAX_HISTORY_LIMIT, RelayService,
    RelayStats, RoomPresence, SendReceipt,
};
pub use retention::spawn_retention_sweeper;
pub use typing::TypingTracker;
