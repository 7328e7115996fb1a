//! Room membership index.
//!
//! [`RoomDirectory`] maps each room to its member connections in join
//! order. It holds connection identifiers only; connection state lives in
//! the [`super::ConnectionRegistry`].

use std::collections::HashMap;

use super::ids::{ConnectionId, RoomId};

/// Membership sets for every room the relay has seen.
///
/// Rooms are created implicitly on first join and are never removed when
/// they empty out, so a late leave for an empty room still finds its
/// entry. Deleting rooms is the external directory service's business.
#[derive(Debug, Default)]
pub struct RoomDirectory {
    rooms: HashMap<RoomId, Vec<ConnectionId>>,
}

impl RoomDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `conn` to `room` (no-op if already a member) and returns the
    /// members in join order.
    pub fn join(&mut self, room: &RoomId, conn: ConnectionId) -> Vec<ConnectionId> {
        let members = self.rooms.entry(room.clone()).or_default();
        if !members.contains(&conn) {
            members.push(conn);
        }
        members.clone()
    }

    /// Removes `conn` from `room`. Returns `true` if it was a member.
    pub fn leave(&mut self, room: &RoomId, conn: ConnectionId) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        let before = members.len();
        members.retain(|member| *member != conn);
        members.len() != before
    }

    /// Members of `room` in join order; empty for unknown rooms.
    #[must_use]
    pub fn members(&self, room: &RoomId) -> &[ConnectionId] {
        self.rooms.get(room).map_or(&[], Vec::as_slice)
    }

    /// Number of members in `room`.
    #[must_use]
    pub fn count(&self, room: &RoomId) -> usize {
        self.members(room).len()
    }

    /// Returns `true` if the directory has an entry for `room`.
    #[must_use]
    pub fn contains_room(&self, room: &RoomId) -> bool {
        self.rooms.contains_key(room)
    }

    /// Returns `true` if `conn` is a member of `room`.
    #[must_use]
    pub fn is_member(&self, room: &RoomId, conn: &ConnectionId) -> bool {
        self.members(room).contains(conn)
    }

    /// Iterates over every known room and its members.
    pub fn iter(&self) -> impl Iterator<Item = (&RoomId, &[ConnectionId])> {
        self.rooms
            .iter()
            .map(|(room, members)| (room, members.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_creates_room_and_preserves_order() {
        let mut directory = RoomDirectory::new();
        let room = RoomId::from("general");
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        assert!(!directory.contains_room(&room));
        assert_eq!(directory.join(&room, a), vec![a]);
        assert_eq!(directory.join(&room, b), vec![a, b]);
        assert_eq!(directory.members(&room), &[a, b]);
    }

    #[test]
    fn join_twice_is_noop() {
        let mut directory = RoomDirectory::new();
        let room = RoomId::from("general");
        let a = ConnectionId::new();
        let _ = directory.join(&room, a);
        let snapshot = directory.join(&room, a);
        assert_eq!(snapshot, vec![a]);
        assert_eq!(directory.count(&room), 1);
    }

    #[test]
    fn leave_is_idempotent_and_keeps_empty_room() {
        let mut directory = RoomDirectory::new();
        let room = RoomId::from("general");
        let a = ConnectionId::new();
        let _ = directory.join(&room, a);

        assert!(directory.leave(&room, a));
        assert!(!directory.leave(&room, a));
        assert_eq!(directory.count(&room), 0);
        assert!(directory.contains_room(&room));
    }

    #[test]
    fn leave_unknown_room_is_noop() {
        let mut directory = RoomDirectory::new();
        assert!(!directory.leave(&RoomId::from("nowhere"), ConnectionId::new()));
        assert!(directory.members(&RoomId::from("nowhere")).is_empty());
    }

    #[test]
    fn leave_keeps_order_of_remaining_members() {
        let mut directory = RoomDirectory::new();
        let room = RoomId::from("general");
        let (a, b, c) = (ConnectionId::new(), ConnectionId::new(), ConnectionId::new());
        let _ = directory.join(&room, a);
        let _ = directory.join(&room, b);
        let _ = directory.join(&room, c);
        let _ = directory.leave(&room, b);
        assert_eq!(directory.members(&room), &[a, c]);
    }
}
