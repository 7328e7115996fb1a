//! Live connection store.
//!
//! [`ConnectionRegistry`] exclusively owns every live connection's state:
//! its outbound transport handle, identity, and current room pointer. It
//! never emits events itself; callers use the before/after values its
//! mutators return to drive presence notifications.
//!
//! The registry is a plain data structure. Atomicity with respect to the
//! [`super::RoomDirectory`] comes from the single lock that guards both in
//! [`super::RelayState`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::events::ServerEvent;
use super::identity::Identity;
use super::ids::{ConnectionId, RoomId};
use crate::error::RelayError;

/// Outcome of handing one event to one connection's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Event queued for the connection's writer.
    Delivered,
    /// The connection's queue is full (slow client); event dropped.
    Backpressured,
    /// The connection's writer is gone; event dropped.
    Closed,
}

/// Sending half of a connection's bounded outbound queue.
///
/// Sends never wait: a full queue drops the event for this connection
/// only, so one slow client cannot stall a room's fan-out.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<Arc<ServerEvent>>,
}

impl Outbound {
    /// Creates an outbound queue holding at most `capacity` events
    /// (minimum 1). The receiver is drained by the connection's writer.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<ServerEvent>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queues `event` without waiting.
    pub fn deliver(&self, event: &Arc<ServerEvent>) -> Delivery {
        match self.tx.try_send(Arc::clone(event)) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Backpressured,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Returns `true` once the writer has dropped its receiver.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Per-connection state owned by the registry.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    /// Connection identifier.
    pub id: ConnectionId,
    /// User id supplied by the identity service at attach time.
    pub user_id: String,
    /// Identity bound by `identify`; `None` until then.
    pub identity: Option<Identity>,
    /// Current room, if any.
    pub room: Option<RoomId>,
    /// When the connection entered its current room.
    pub room_joined_at: Option<DateTime<Utc>>,
    /// When the transport attached.
    pub connected_at: DateTime<Utc>,
    /// Transport handle.
    pub outbound: Outbound,
}

impl ConnectionState {
    /// Liveness flag: `false` once the transport's writer is gone.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.outbound.is_closed()
    }
}

/// What remains of a connection after [`ConnectionRegistry::unregister`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detached {
    /// Identity the connection had, if it ever identified.
    pub identity: Option<Identity>,
    /// Room the connection was in, if any.
    pub room: Option<RoomId>,
}

/// Store of all live connections, keyed by [`ConnectionId`].
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ConnectionState>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new live connection with no identity and no room.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DuplicateConnection`] if `id` is already
    /// registered.
    pub fn register(
        &mut self,
        id: ConnectionId,
        user_id: impl Into<String>,
        outbound: Outbound,
    ) -> Result<&ConnectionState, RelayError> {
        if self.connections.contains_key(&id) {
            return Err(RelayError::DuplicateConnection(id));
        }
        let state = self.connections.entry(id).or_insert(ConnectionState {
            id,
            user_id: user_id.into(),
            identity: None,
            room: None,
            room_joined_at: None,
            connected_at: Utc::now(),
            outbound,
        });
        Ok(state)
    }

    /// Binds `identity` to the connection, once.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownConnection`] if `id` is not registered
    /// and [`RelayError::AlreadyIdentified`] on a second call.
    pub fn attach_identity(
        &mut self,
        id: ConnectionId,
        identity: Identity,
    ) -> Result<(), RelayError> {
        let state = self
            .connections
            .get_mut(&id)
            .ok_or(RelayError::UnknownConnection(id))?;
        if state.identity.is_some() {
            return Err(RelayError::AlreadyIdentified(id));
        }
        state.identity = Some(identity);
        Ok(())
    }

    /// Points the connection at `room` (or at no room) and returns the
    /// previous room so the caller can perform the matching leave.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownConnection`] if `id` is not registered.
    pub fn set_room(
        &mut self,
        id: ConnectionId,
        room: Option<RoomId>,
    ) -> Result<Option<RoomId>, RelayError> {
        let state = self
            .connections
            .get_mut(&id)
            .ok_or(RelayError::UnknownConnection(id))?;
        state.room_joined_at = room.as_ref().map(|_| Utc::now());
        Ok(std::mem::replace(&mut state.room, room))
    }

    /// Removes the connection entirely, returning its last identity and
    /// room. Returns `None` if it was already gone; detach races are not
    /// errors.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<Detached> {
        self.connections.remove(&id).map(|state| Detached {
            identity: state.identity,
            room: state.room,
        })
    }

    /// Looks up a connection.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownConnection`] if `id` is not registered.
    pub fn lookup(&self, id: ConnectionId) -> Result<&ConnectionState, RelayError> {
        self.connections
            .get(&id)
            .ok_or(RelayError::UnknownConnection(id))
    }

    /// Returns the connection's state, if registered.
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<&ConnectionState> {
        self.connections.get(id)
    }

    /// Number of connections whose current room is `room`.
    #[must_use]
    pub fn count_in_room(&self, room: &RoomId) -> usize {
        self.connections
            .values()
            .filter(|state| state.room.as_ref() == Some(room))
            .count()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn registry_with(id: ConnectionId) -> (ConnectionRegistry, mpsc::Receiver<Arc<ServerEvent>>) {
        let mut registry = ConnectionRegistry::new();
        let (outbound, rx) = Outbound::channel(4);
        if registry.register(id, "user", outbound).is_err() {
            panic!("fresh id rejected");
        }
        (registry, rx)
    }

    #[test]
    fn register_rejects_duplicate_id() {
        let id = ConnectionId::new();
        let (mut registry, _rx) = registry_with(id);
        let (outbound, _rx2) = Outbound::channel(4);
        let result = registry.register(id, "user", outbound);
        assert!(matches!(result, Err(RelayError::DuplicateConnection(d)) if d == id));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn identity_binds_once() {
        let id = ConnectionId::new();
        let (mut registry, _rx) = registry_with(id);
        let identity = Identity::new("user", "A", "a.png");
        assert!(registry.attach_identity(id, identity.clone()).is_ok());
        let again = registry.attach_identity(id, Identity::new("user", "B", "b.png"));
        assert!(matches!(again, Err(RelayError::AlreadyIdentified(_))));

        let Ok(state) = registry.lookup(id) else {
            panic!("connection missing");
        };
        assert_eq!(state.identity.as_ref(), Some(&identity));
    }

    #[test]
    fn identify_unknown_connection_fails() {
        let mut registry = ConnectionRegistry::new();
        let result = registry.attach_identity(ConnectionId::new(), Identity::new("u", "A", ""));
        assert!(matches!(result, Err(RelayError::UnknownConnection(_))));
    }

    #[test]
    fn set_room_returns_previous_room() {
        let id = ConnectionId::new();
        let (mut registry, _rx) = registry_with(id);
        let first = registry.set_room(id, Some(RoomId::from("general")));
        assert!(matches!(first, Ok(None)));
        let second = registry.set_room(id, Some(RoomId::from("random")));
        assert!(matches!(second, Ok(Some(ref r)) if r.as_str() == "general"));
        assert_eq!(registry.count_in_room(&RoomId::from("random")), 1);
        assert_eq!(registry.count_in_room(&RoomId::from("general")), 0);
    }

    #[test]
    fn unregister_is_idempotent() {
        let id = ConnectionId::new();
        let (mut registry, _rx) = registry_with(id);
        let _ = registry.set_room(id, Some(RoomId::from("general")));

        let Some(detached) = registry.unregister(id) else {
            panic!("first unregister should return state");
        };
        assert_eq!(detached.room, Some(RoomId::from("general")));
        assert!(registry.unregister(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn liveness_follows_receiver() {
        let id = ConnectionId::new();
        let (registry, rx) = registry_with(id);
        let Some(state) = registry.get(&id) else {
            panic!("connection missing");
        };
        assert!(state.is_live());
        drop(rx);
        assert!(!state.is_live());
    }

    #[test]
    fn full_queue_reports_backpressure() {
        let (outbound, _rx) = Outbound::channel(1);
        let event = Arc::new(ServerEvent::StopTyping {});
        assert_eq!(outbound.deliver(&event), Delivery::Delivered);
        assert_eq!(outbound.deliver(&event), Delivery::Backpressured);
    }
}
