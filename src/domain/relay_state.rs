//! Registry and directory mutated as one unit.
//!
//! [`RelayState`] owns the [`ConnectionRegistry`] and the [`RoomDirectory`]
//! and exposes only operations that update both together. Guarded by a
//! single lock in the service, every operation here is observed as one
//! atomic transition: a connection is never in the directory for a room
//! the registry does not report, and a room switch never shows a
//! double membership.

use std::sync::Arc;

use super::connection_registry::{ConnectionRegistry, Delivery, Detached, Outbound};
use super::events::{MemberView, ServerEvent};
use super::identity::Identity;
use super::ids::{ConnectionId, RoomId};
use super::presence::{PresenceNotice, PresenceTracker};
use super::room_directory::RoomDirectory;
use crate::error::RelayError;

/// Result of a committed join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// Room members in join order, joiner included.
    pub members: Vec<MemberView>,
    /// Presence notices to deliver: departure notices for the previous
    /// room (on a switch) followed by the join notice.
    pub notices: Vec<PresenceNotice>,
    /// Room the connection switched away from, if any.
    pub previous_room: Option<RoomId>,
    /// `true` if the connection was already in the room.
    pub rejoined: bool,
}

/// The relay's shared mutable state.
#[derive(Debug, Default)]
pub struct RelayState {
    registry: ConnectionRegistry,
    directory: RoomDirectory,
}

impl RelayState {
    /// Creates empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access to the registry.
    #[must_use]
    pub const fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Read access to the directory.
    #[must_use]
    pub const fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    /// Registers a freshly attached connection.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DuplicateConnection`] if `id` is taken.
    pub fn register(
        &mut self,
        id: ConnectionId,
        user_id: impl Into<String>,
        outbound: Outbound,
    ) -> Result<(), RelayError> {
        self.registry.register(id, user_id, outbound).map(|_| ())
    }

    /// Binds a display identity to the connection's authenticated user.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownConnection`] or
    /// [`RelayError::AlreadyIdentified`].
    pub fn identify(
        &mut self,
        id: ConnectionId,
        display_name: String,
        avatar_ref: String,
    ) -> Result<Identity, RelayError> {
        let user_id = self.registry.lookup(id)?.user_id.clone();
        let identity = Identity {
            user_id,
            display_name,
            avatar_ref,
        };
        self.registry.attach_identity(id, identity.clone())?;
        Ok(identity)
    }

    /// Moves `conn` into `room`, leaving its previous room first.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownConnection`] if `conn` is not
    /// registered and [`RelayError::NotIdentified`] if it has no identity.
    pub fn join(&mut self, conn: ConnectionId, room: &RoomId) -> Result<JoinOutcome, RelayError> {
        let state = self.registry.lookup(conn)?;
        let identity = state
            .identity
            .clone()
            .ok_or(RelayError::NotIdentified(conn))?;

        if state.room.as_ref() == Some(room) {
            return Ok(JoinOutcome {
                members: self.member_snapshot(room),
                notices: Vec::new(),
                previous_room: None,
                rejoined: true,
            });
        }

        let previous_room = self.registry.set_room(conn, Some(room.clone()))?;
        let mut notices = Vec::new();
        if let Some(previous) = &previous_room {
            self.directory.leave(previous, conn);
            notices.extend(PresenceTracker::on_departure(
                previous,
                &identity,
                self.directory.members(previous),
            ));
        }
        let members = self.directory.join(room, conn);
        notices.extend(PresenceTracker::on_join(room, &identity, &members));

        Ok(JoinOutcome {
            members: self.member_snapshot(room),
            notices,
            previous_room,
            rejoined: false,
        })
    }

    /// Removes `conn` from `room` and returns the notices to deliver.
    /// Returns `None` if `conn` is not in `room`; nothing is touched then.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownConnection`] if `conn` is not
    /// registered.
    pub fn leave(
        &mut self,
        conn: ConnectionId,
        room: &RoomId,
    ) -> Result<Option<Vec<PresenceNotice>>, RelayError> {
        let state = self.registry.lookup(conn)?;
        if state.room.as_ref() != Some(room) {
            return Ok(None);
        }
        let identity = state.identity.clone();
        self.registry.set_room(conn, None)?;
        self.directory.leave(room, conn);
        let notices = identity
            .map(|identity| {
                PresenceTracker::on_departure(room, &identity, self.directory.members(room))
            })
            .unwrap_or_default();
        Ok(Some(notices))
    }

    /// Tears the connection down: unregisters it and releases its room
    /// membership in the same step. Returns `None` if it was already gone.
    pub fn detach(&mut self, conn: ConnectionId) -> Option<(Detached, Vec<PresenceNotice>)> {
        let detached = self.registry.unregister(conn)?;
        let mut notices = Vec::new();
        if let Some(room) = &detached.room {
            self.directory.leave(room, conn);
            if let Some(identity) = &detached.identity {
                notices = PresenceTracker::on_departure(room, identity, self.directory.members(room));
            }
        }
        Some((detached, notices))
    }

    /// Identity and join time of each member of `room`, in join order.
    #[must_use]
    pub fn member_snapshot(&self, room: &RoomId) -> Vec<MemberView> {
        self.directory
            .members(room)
            .iter()
            .filter_map(|id| self.registry.get(id))
            .filter_map(|state| {
                let identity = state.identity.clone()?;
                Some(MemberView {
                    identity,
                    joined_at: state.room_joined_at.unwrap_or(state.connected_at),
                })
            })
            .collect()
    }

    /// Queues `event` on a single connection, e.g. a private reply.
    /// Returns `false` if the connection is gone or its queue is full.
    pub fn notify(&self, conn: ConnectionId, event: ServerEvent) -> bool {
        self.registry.get(&conn).is_some_and(|state| {
            state.outbound.deliver(&Arc::new(event)) == Delivery::Delivered
        })
    }

    /// Checks the cross-component invariants: every directory member is
    /// registered with a matching room pointer, no connection is in two
    /// rooms, and every room's count equals the number of connections the
    /// registry places there.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        for (room, members) in self.directory.iter() {
            if members.len() != self.registry.count_in_room(room) {
                return false;
            }
            for member in members {
                if !seen.insert(*member) {
                    return false;
                }
                let in_registry = self
                    .registry
                    .get(member)
                    .is_some_and(|state| state.room.as_ref() == Some(room));
                if !in_registry {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::domain::presence::{Audience, PresenceEvent};

    struct Member {
        id: ConnectionId,
        _rx: mpsc::Receiver<Arc<ServerEvent>>,
    }

    fn attach(state: &mut RelayState, name: &str) -> Member {
        let id = ConnectionId::new();
        let (outbound, rx) = Outbound::channel(16);
        if state.register(id, format!("user-{name}"), outbound).is_err() {
            panic!("register failed");
        }
        if state
            .identify(id, name.to_string(), format!("{name}.png"))
            .is_err()
        {
            panic!("identify failed");
        }
        Member { id, _rx: rx }
    }

    #[test]
    fn join_requires_identity() {
        let mut state = RelayState::new();
        let id = ConnectionId::new();
        let (outbound, _rx) = Outbound::channel(4);
        let _ = state.register(id, "anon", outbound);
        let result = state.join(id, &RoomId::from("general"));
        assert!(matches!(result, Err(RelayError::NotIdentified(_))));
        assert_eq!(state.directory().count(&RoomId::from("general")), 0);
    }

    #[test]
    fn join_returns_snapshot_in_join_order() {
        let mut state = RelayState::new();
        let room = RoomId::from("general");
        let a = attach(&mut state, "A");
        let b = attach(&mut state, "B");
        let _ = state.join(a.id, &room);
        let Ok(outcome) = state.join(b.id, &room) else {
            panic!("join failed");
        };
        let names: Vec<_> = outcome
            .members
            .iter()
            .map(|m| m.identity.display_name.as_str())
            .collect();
        assert_eq!(names, ["A", "B"]);
        assert!(!outcome.rejoined);
        assert!(state.is_consistent());
    }

    #[test]
    fn switching_rooms_is_one_transition() {
        let mut state = RelayState::new();
        let general = RoomId::from("general");
        let random = RoomId::from("random");
        let a = attach(&mut state, "A");
        let b = attach(&mut state, "B");
        let _ = state.join(a.id, &general);
        let _ = state.join(b.id, &general);

        let Ok(outcome) = state.join(a.id, &random) else {
            panic!("switch failed");
        };
        assert_eq!(outcome.previous_room, Some(general.clone()));
        assert_eq!(state.directory().members(&general), &[b.id]);
        assert_eq!(state.directory().members(&random), &[a.id]);
        assert!(state.is_consistent());

        let kinds: Vec<_> = outcome
            .notices
            .iter()
            .map(|n| n.event.to_server_event().kind())
            .collect();
        assert_eq!(kinds, ["left", "online-count-changed", "joined"]);
        let Some(first) = outcome.notices.first() else {
            panic!("missing notices");
        };
        assert_eq!(first.audience, Audience::Connections(vec![b.id]));
    }

    #[test]
    fn rejoin_same_room_emits_nothing() {
        let mut state = RelayState::new();
        let room = RoomId::from("general");
        let a = attach(&mut state, "A");
        let _ = state.join(a.id, &room);
        let Ok(outcome) = state.join(a.id, &room) else {
            panic!("rejoin failed");
        };
        assert!(outcome.rejoined);
        assert!(outcome.notices.is_empty());
        assert_eq!(outcome.members.len(), 1);
    }

    #[test]
    fn leave_other_room_is_noop() {
        let mut state = RelayState::new();
        let a = attach(&mut state, "A");
        let _ = state.join(a.id, &RoomId::from("general"));
        let Ok(outcome) = state.leave(a.id, &RoomId::from("random")) else {
            panic!("leave failed");
        };
        assert!(outcome.is_none());
        assert_eq!(state.directory().count(&RoomId::from("general")), 1);

        let Ok(Some(notices)) = state.leave(a.id, &RoomId::from("general")) else {
            panic!("leave of current room failed");
        };
        assert!(notices.is_empty());
        assert_eq!(state.directory().count(&RoomId::from("general")), 0);
        assert!(state.is_consistent());
    }

    #[test]
    fn detach_releases_membership_and_notifies_remaining() {
        let mut state = RelayState::new();
        let room = RoomId::from("general");
        let a = attach(&mut state, "A");
        let b = attach(&mut state, "B");
        let _ = state.join(a.id, &room);
        let _ = state.join(b.id, &room);

        let Some((detached, notices)) = state.detach(a.id) else {
            panic!("detach failed");
        };
        assert_eq!(detached.room, Some(room.clone()));
        assert_eq!(state.directory().members(&room), &[b.id]);
        assert!(state.is_consistent());
        let Some(count) = notices.get(1) else {
            panic!("missing count notice");
        };
        assert_eq!(
            count.event,
            PresenceEvent::OnlineCountChanged { room, count: 1 }
        );
        assert!(state.detach(a.id).is_none());
    }

    #[test]
    fn notify_reaches_single_connection() {
        let mut state = RelayState::new();
        let id = ConnectionId::new();
        let (outbound, mut rx) = Outbound::channel(4);
        let _ = state.register(id, "u", outbound);
        assert!(state.notify(id, ServerEvent::StopTyping {}));
        let Ok(event) = rx.try_recv() else {
            panic!("event not queued");
        };
        assert_eq!(event.kind(), "stop-typing");
        assert!(!state.notify(ConnectionId::new(), ServerEvent::StopTyping {}));
    }
}
