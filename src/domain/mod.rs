//! Domain layer: identifiers, connection and room state, presence rules,
//! and the wire protocol.
//!
//! Everything here is synchronous and lock-free by itself. The service
//! layer wraps [`RelayState`] in a single lock so that registry and
//! directory mutations are observed atomically.

pub mod connection_registry;
pub mod events;
pub mod identity;
pub mod ids;
pub mod message;
pub mod presence;
pub mod relay_state;
pub mod room_directory;

pub use connection_registry::{ConnectionRegistry, ConnectionState, Delivery, Outbound};
pub use events::{ClientCommand, MemberView, ServerEvent};
pub use identity::Identity;
pub use ids::{ConnectionId, MAX_ROOM_ID_LENGTH, MessageId, RoomId};
pub use message::ChatMessage;
pub use presence::{Audience, PresenceEvent, PresenceNotice, PresenceTracker};
pub use relay_state::{JoinOutcome, RelayState};
pub use room_directory::RoomDirectory;
