//! Presence derivation.
//!
//! [`PresenceTracker`] turns a committed registry/directory transition
//! into the [`PresenceEvent`]s to emit and the audience for each. It holds
//! no state and performs no delivery; the service hands its output to the
//! broadcast engine.

use super::events::ServerEvent;
use super::identity::Identity;
use super::ids::{ConnectionId, RoomId};

/// An ephemeral presence fact. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// `identity` joined `room`, which now has `online_count` members.
    Joined {
        /// Room joined.
        room: RoomId,
        /// Who joined.
        identity: Identity,
        /// Population after the join.
        online_count: usize,
    },
    /// `identity` left `room`.
    Left {
        /// Room left.
        room: RoomId,
        /// Who left.
        identity: Identity,
    },
    /// `identity` started typing in `room`.
    TypingStarted {
        /// Room the typist is in.
        room: RoomId,
        /// Who is typing.
        identity: Identity,
    },
    /// `identity` stopped typing in `room`.
    TypingStopped {
        /// Room the typist is in.
        room: RoomId,
        /// Who stopped typing.
        identity: Identity,
    },
    /// `room` population changed to `count`.
    OnlineCountChanged {
        /// Room whose population changed.
        room: RoomId,
        /// New population.
        count: usize,
    },
}

impl PresenceEvent {
    /// Room this event concerns.
    #[must_use]
    pub const fn room(&self) -> &RoomId {
        match self {
            Self::Joined { room, .. }
            | Self::Left { room, .. }
            | Self::TypingStarted { room, .. }
            | Self::TypingStopped { room, .. }
            | Self::OnlineCountChanged { room, .. } => room,
        }
    }

    /// Wire representation delivered to clients.
    #[must_use]
    pub fn to_server_event(&self) -> ServerEvent {
        match self {
            Self::Joined {
                identity,
                online_count,
                ..
            } => ServerEvent::Joined {
                identity: identity.clone(),
                online_count: *online_count,
            },
            Self::Left { identity, .. } => ServerEvent::Left {
                identity: identity.clone(),
            },
            Self::TypingStarted { identity, .. } => ServerEvent::Typing {
                sender_name: identity.display_name.clone(),
            },
            Self::TypingStopped { .. } => ServerEvent::StopTyping {},
            Self::OnlineCountChanged { count, .. } => ServerEvent::OnlineCountChanged {
                count: *count,
            },
        }
    }
}

/// Who receives a presence event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Exactly these connections, resolved when the mutation committed.
    Connections(Vec<ConnectionId>),
    /// Every current member of the room except `except`, resolved at
    /// delivery time.
    RoomExcept {
        /// Room whose members receive the event.
        room: RoomId,
        /// Connection excluded from delivery (the originator).
        except: ConnectionId,
    },
}

/// A presence event paired with its audience.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceNotice {
    /// Event to emit.
    pub event: PresenceEvent,
    /// Recipients.
    pub audience: Audience,
}

/// Stateless presence derivation rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct PresenceTracker;

impl PresenceTracker {
    /// Notices for a committed join. `members` is the room's membership
    /// after the join and includes the joiner, who therefore also sees its
    /// own `joined`.
    #[must_use]
    pub fn on_join(room: &RoomId, subject: &Identity, members: &[ConnectionId]) -> Vec<PresenceNotice> {
        vec![PresenceNotice {
            event: PresenceEvent::Joined {
                room: room.clone(),
                identity: subject.clone(),
                online_count: members.len(),
            },
            audience: Audience::Connections(members.to_vec()),
        }]
    }

    /// Notices for a committed leave or disconnect: `left` followed by
    /// `online-count-changed`, both to the remaining members only. The
    /// count is taken from `remaining`, i.e. after the mutation.
    #[must_use]
    pub fn on_departure(
        room: &RoomId,
        subject: &Identity,
        remaining: &[ConnectionId],
    ) -> Vec<PresenceNotice> {
        if remaining.is_empty() {
            return Vec::new();
        }
        vec![
            PresenceNotice {
                event: PresenceEvent::Left {
                    room: room.clone(),
                    identity: subject.clone(),
                },
                audience: Audience::Connections(remaining.to_vec()),
            },
            PresenceNotice {
                event: PresenceEvent::OnlineCountChanged {
                    room: room.clone(),
                    count: remaining.len(),
                },
                audience: Audience::Connections(remaining.to_vec()),
            },
        ]
    }

    /// Relay notice for a typing start or stop from `sender`.
    #[must_use]
    pub fn on_typing(
        room: &RoomId,
        subject: &Identity,
        sender: ConnectionId,
        started: bool,
    ) -> PresenceNotice {
        let event = if started {
            PresenceEvent::TypingStarted {
                room: room.clone(),
                identity: subject.clone(),
            }
        } else {
            PresenceEvent::TypingStopped {
                room: room.clone(),
                identity: subject.clone(),
            }
        };
        PresenceNotice {
            event,
            audience: Audience::RoomExcept {
                room: room.clone(),
                except: sender,
            },
        }
    }
}
