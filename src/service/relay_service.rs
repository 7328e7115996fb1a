//! Relay service: the single entry point for everything a connection does.
//!
//! [`RelayService`] owns the shared [`RelayState`] lock and coordinates the
//! broadcast engine, typing timers, and persistence bridge. Every inbound
//! command maps to one method here; the WebSocket layer only parses frames
//! and forwards them.
//!
//! # Locking
//!
//! Membership changes (identify, join, leave, disconnect) take the state
//! write lock and deliver their presence events before releasing it, so
//! presence is never interleaved with another membership change. Chat and
//! typing fan-out go through [`BroadcastEngine::broadcast`], which takes the
//! per-room sequencer and then the state read lock. Collaborator calls
//! (room metadata, persistence) are made with no lock held.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use utoipa::ToSchema;

use super::broadcast::{BroadcastEngine, DeliveryReport, DeliveryStatsSnapshot, Origin};
use super::persistence_bridge::PersistenceBridge;
use super::typing::TypingTracker;
use crate::config::RelaySettings;
use crate::domain::{
    Audience, ChatMessage, ClientCommand, ConnectionId, Identity, MemberView, MessageId, Outbound,
    PresenceNotice, PresenceTracker, RelayState, RoomId, ServerEvent,
};
use crate::error::RelayError;
use crate::persistence::{DirectoryService, MessageRecord, MessageStore};

/// History entries returned when the caller does not ask for a limit.
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Upper bound on history entries per request.
pub const MAX_HISTORY_LIMIT: u32 = 100;

/// A freshly attached connection: its id and the receiving end of its
/// outbound queue.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Registry id of the connection.
    pub id: ConnectionId,
    /// Events queued for delivery to the client.
    pub events: mpsc::Receiver<Arc<ServerEvent>>,
}

/// Returned by [`RelayService::send_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReceipt {
    /// Id assigned to the message.
    pub id: MessageId,
    /// Fan-out result.
    pub report: DeliveryReport,
}

/// Who is in a room right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomPresence {
    /// Room identifier.
    pub room_id: RoomId,
    /// Number of connections in the room.
    pub online_count: usize,
    /// Identified members in join order.
    pub members: Vec<MemberView>,
}

/// One page of a room's stored history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    /// Messages on this page, oldest first.
    pub messages: Vec<MessageRecord>,
    /// Messages stored for the room across all pages.
    pub total_count: u64,
}

/// Relay-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelayStats {
    /// Attached connections.
    pub connections: usize,
    /// Rooms with at least one member.
    pub active_rooms: usize,
    /// Cumulative delivery counters.
    pub delivery: DeliveryStatsSnapshot,
}

/// Orchestration layer for connection lifecycle, rooms, presence and chat.
///
/// Cheap to clone; clones share the same state.
#[derive(Debug, Clone)]
pub struct RelayService {
    state: Arc<RwLock<RelayState>>,
    engine: Arc<BroadcastEngine>,
    typing: Arc<TypingTracker>,
    bridge: PersistenceBridge,
    directory: Arc<dyn DirectoryService>,
    store: Arc<dyn MessageStore>,
    settings: RelaySettings,
}

impl RelayService {
    /// Creates a relay with no connections.
    #[must_use]
    pub fn new(
        directory: Arc<dyn DirectoryService>,
        store: Arc<dyn MessageStore>,
        settings: RelaySettings,
    ) -> Self {
        let bridge = PersistenceBridge::new(Arc::clone(&store), Arc::clone(&directory), &settings);
        Self {
            state: Arc::new(RwLock::new(RelayState::new())),
            engine: Arc::new(BroadcastEngine::new()),
            typing: Arc::new(TypingTracker::new()),
            bridge,
            directory,
            store,
            settings,
        }
    }

    /// Attaches a new connection for `user_id`. Without a user id the
    /// connection id doubles as one.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DuplicateConnection`] if the generated id is
    /// already registered.
    pub async fn connect(&self, user_id: Option<String>) -> Result<ConnectionHandle, RelayError> {
        let id = ConnectionId::new();
        let (outbound, events) = Outbound::channel(self.settings.outbound_queue_capacity);
        let user_id = user_id
            .filter(|user| !user.trim().is_empty())
            .unwrap_or_else(|| id.to_string());

        self.state.write().await.register(id, user_id.clone(), outbound)?;
        tracing::info!(connection = %id, %user_id, "connection attached");
        Ok(ConnectionHandle { id, events })
    }

    /// Binds a display identity to `conn`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ValidationFailed`] for a blank display name,
    /// [`RelayError::UnknownConnection`], or
    /// [`RelayError::AlreadyIdentified`].
    pub async fn identify(
        &self,
        conn: ConnectionId,
        display_name: &str,
        avatar_ref: &str,
    ) -> Result<Identity, RelayError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(RelayError::ValidationFailed(
                "display name must not be empty".to_string(),
            ));
        }

        let identity = self.state.write().await.identify(
            conn,
            display_name.to_string(),
            avatar_ref.trim().to_string(),
        )?;
        tracing::debug!(connection = %conn, display_name = %identity.display_name, "connection identified");
        Ok(identity)
    }

    /// Joins `conn` to `room`, leaving its current room first.
    ///
    /// The joiner receives `room-joined` with the member list, then every
    /// member (joiner included) receives `joined`. Joining the room the
    /// connection is already in only repeats `room-joined`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ValidationFailed`] for a malformed room id,
    /// [`RelayError::UnknownConnection`], [`RelayError::NotIdentified`],
    /// [`RelayError::RoomNotFound`], or [`RelayError::PersistenceFailed`]
    /// if the directory lookup fails.
    pub async fn join_room(
        &self,
        conn: ConnectionId,
        room: &RoomId,
    ) -> Result<Vec<MemberView>, RelayError> {
        room.validate()?;
        {
            let state = self.state.read().await;
            if state.registry().lookup(conn)?.identity.is_none() {
                return Err(RelayError::NotIdentified(conn));
            }
        }

        let metadata = self
            .directory
            .room_metadata(room)
            .await?
            .ok_or_else(|| RelayError::RoomNotFound(room.clone()))?;

        let mut state = self.state.write().await;
        let outcome = state.join(conn, room)?;
        let _ = state.notify(
            conn,
            ServerEvent::RoomJoined {
                room_id: room.clone(),
                room_name: metadata.name,
                description: metadata.description,
                members: outcome.members.clone(),
            },
        );
        self.deliver(&state, outcome.notices);
        drop(state);

        if outcome.previous_room.is_some() {
            let _ = self.typing.stop(conn).await;
        }

        tracing::info!(
            connection = %conn,
            %room,
            previous = ?outcome.previous_room,
            rejoined = outcome.rejoined,
            members = outcome.members.len(),
            "joined room"
        );
        Ok(outcome.members)
    }

    /// Removes `conn` from `room`. Returns `false` if it was not there.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ValidationFailed`] for a malformed room id, or
    /// [`RelayError::UnknownConnection`] if `conn` is not attached.
    pub async fn leave_room(&self, conn: ConnectionId, room: &RoomId) -> Result<bool, RelayError> {
        room.validate()?;
        let mut state = self.state.write().await;
        let Some(notices) = state.leave(conn, room)? else {
            return Ok(false);
        };
        self.deliver(&state, notices);
        drop(state);

        let _ = self.typing.stop(conn).await;
        tracing::info!(connection = %conn, %room, "left room");
        Ok(true)
    }

    /// Validates and relays a chat message to every member of `room`,
    /// sender included, then hands it to persistence.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ValidationFailed`] for a malformed room id or
    /// for empty or oversized text, [`RelayError::UnknownConnection`],
    /// [`RelayError::NotIdentified`], or [`RelayError::NotInRoom`] if
    /// `room` is not the sender's current room, including when the sender
    /// leaves it before the message goes out.
    pub async fn send_message(
        &self,
        conn: ConnectionId,
        room: &RoomId,
        text: &str,
    ) -> Result<SendReceipt, RelayError> {
        room.validate()?;
        let sender = {
            let state = self.state.read().await;
            let current = state.registry().lookup(conn)?;
            let identity = current
                .identity
                .clone()
                .ok_or(RelayError::NotIdentified(conn))?;
            if current.room.as_ref() != Some(room) {
                return Err(RelayError::NotInRoom(room.clone()));
            }
            identity
        };

        let message = ChatMessage::compose(
            room.clone(),
            sender,
            text,
            self.settings.max_message_length,
        )?;
        let origin = Origin::Member {
            sender: conn,
            echo: true,
        };
        let report = self
            .engine
            .broadcast(&self.state, room, message.to_event(), origin)
            .await
            .ok_or_else(|| RelayError::NotInRoom(room.clone()))?;
        self.bridge.persist(message.to_record());

        tracing::debug!(
            message_id = %message.id,
            %room,
            attempted = report.attempted,
            delivered = report.delivered,
            "message relayed"
        );
        Ok(SendReceipt {
            id: message.id,
            report,
        })
    }

    /// Relays a typing indicator to the other members of the sender's room
    /// and (re)arms its expiry timer. Returns `false` if the sender is in no
    /// room, or left it before the indicator went out; nothing is relayed
    /// then.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownConnection`] if `conn` is not attached.
    pub async fn typing_start(&self, conn: ConnectionId) -> Result<bool, RelayError> {
        let (room, identity) = {
            let state = self.state.read().await;
            let current = state.registry().lookup(conn)?;
            match (&current.room, &current.identity) {
                (Some(room), Some(identity)) => (room.clone(), identity.clone()),
                _ => return Ok(false),
            }
        };

        let service = self.clone();
        let window = self.settings.typing_timeout;
        let _ = self
            .typing
            .start(conn, room.clone(), move |generation| {
                tokio::spawn(async move {
                    tokio::time::sleep(window).await;
                    service.expire_typing(conn, generation).await;
                })
                .abort_handle()
            })
            .await;

        let relayed = self
            .relay_notice(PresenceTracker::on_typing(&room, &identity, conn, true))
            .await;
        if relayed.is_none() {
            let _ = self.typing.stop(conn).await;
            return Ok(false);
        }
        Ok(true)
    }

    /// Ends the sender's typing indicator. Returns `false` (and emits
    /// nothing) if no indicator was active.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownConnection`] if `conn` is not attached.
    pub async fn typing_stop(&self, conn: ConnectionId) -> Result<bool, RelayError> {
        self.state.read().await.registry().lookup(conn)?;

        let Some(room) = self.typing.stop(conn).await else {
            return Ok(false);
        };
        let Some(identity) = self.member_identity(conn, &room).await else {
            return Ok(false);
        };
        self.relay_notice(PresenceTracker::on_typing(&room, &identity, conn, false))
            .await;
        Ok(true)
    }

    /// Detaches `conn`, releasing its room membership and notifying the
    /// remaining members. Returns `false` if it was already detached.
    pub async fn disconnect(&self, conn: ConnectionId) -> bool {
        let mut state = self.state.write().await;
        let Some((detached, notices)) = state.detach(conn) else {
            return false;
        };
        self.deliver(&state, notices);
        drop(state);

        let _ = self.typing.stop(conn).await;
        tracing::info!(connection = %conn, room = ?detached.room, "connection detached");
        true
    }

    /// Executes one client command. A failure is reported to `conn` alone
    /// as an `error` event.
    pub async fn dispatch(&self, conn: ConnectionId, command: ClientCommand) {
        let result = match command {
            ClientCommand::Identify {
                display_name,
                avatar_ref,
            } => self
                .identify(conn, &display_name, &avatar_ref)
                .await
                .map(|_| ()),
            ClientCommand::JoinRoom { room_id } => self.join_room(conn, &room_id).await.map(|_| ()),
            ClientCommand::LeaveRoom { room_id } => {
                self.leave_room(conn, &room_id).await.map(|_| ())
            }
            ClientCommand::SendMessage { room_id, text } => {
                self.send_message(conn, &room_id, &text).await.map(|_| ())
            }
            ClientCommand::TypingStart => self.typing_start(conn).await.map(|_| ()),
            ClientCommand::TypingStop => self.typing_stop(conn).await.map(|_| ()),
        };

        if let Err(e) = result {
            self.reject(conn, &e).await;
        }
    }

    /// Sends `err` to `conn` as an `error` event.
    pub async fn reject(&self, conn: ConnectionId, err: &RelayError) {
        tracing::debug!(connection = %conn, code = err.error_code(), error = %err, "command rejected");
        let _ = self.state.read().await.notify(conn, err.to_event());
    }

    /// Current members of `room`. Unknown rooms are simply empty.
    pub async fn room_presence(&self, room: &RoomId) -> RoomPresence {
        let state = self.state.read().await;
        RoomPresence {
            room_id: room.clone(),
            online_count: state.directory().count(room),
            members: state.member_snapshot(room),
        }
    }

    /// Persisted messages of `room`, oldest first, skipping the `offset`
    /// newest. `limit` defaults to [`DEFAULT_HISTORY_LIMIT`] and is capped
    /// at [`MAX_HISTORY_LIMIT`].
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ValidationFailed`] for a malformed room id, or
    /// [`RelayError::PersistenceFailed`] if the store read fails.
    pub async fn recent_messages(
        &self,
        room: &RoomId,
        limit: Option<u32>,
        offset: u32,
    ) -> Result<HistoryPage, RelayError> {
        room.validate()?;
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        let messages = self.store.recent_messages(room, limit, offset).await?;
        let total_count = self.store.count_messages(room).await?;
        Ok(HistoryPage {
            messages,
            total_count,
        })
    }

    /// Relay-wide connection and delivery counters.
    pub async fn stats(&self) -> RelayStats {
        let state = self.state.read().await;
        RelayStats {
            connections: state.registry().len(),
            active_rooms: state
                .directory()
                .iter()
                .filter(|(_, members)| !members.is_empty())
                .count(),
            delivery: self.engine.stats(),
        }
    }

    /// Deletes persisted messages older than `max_age`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Internal`] if `max_age` is out of range, or
    /// [`RelayError::PersistenceFailed`] if the delete fails.
    pub async fn sweep_retention(&self, max_age: Duration) -> Result<u64, RelayError> {
        let max_age =
            chrono::Duration::from_std(max_age).map_err(|e| RelayError::Internal(e.to_string()))?;
        let deleted = self.store.delete_messages_before(Utc::now() - max_age).await?;
        if deleted > 0 {
            tracing::info!(deleted, "expired messages removed");
        }
        Ok(deleted)
    }

    async fn expire_typing(&self, conn: ConnectionId, generation: u64) {
        let Some(room) = self.typing.expire(conn, generation).await else {
            return;
        };
        let Some(identity) = self.member_identity(conn, &room).await else {
            return;
        };
        tracing::debug!(connection = %conn, %room, "typing indicator expired");
        self.relay_notice(PresenceTracker::on_typing(&room, &identity, conn, false))
            .await;
    }

    /// Identity of `conn` if it is still a member of `room`.
    async fn member_identity(&self, conn: ConnectionId, room: &RoomId) -> Option<Identity> {
        let state = self.state.read().await;
        state
            .registry()
            .get(&conn)
            .filter(|current| current.room.as_ref() == Some(room))
            .and_then(|current| current.identity.clone())
    }

    /// Delivers a notice outside any membership change. A room notice is
    /// sent on behalf of the excepted member and returns `None` if that
    /// member has left the room.
    async fn relay_notice(&self, notice: PresenceNotice) -> Option<DeliveryReport> {
        let event = notice.event.to_server_event();
        match notice.audience {
            Audience::RoomExcept { room, except } => {
                let origin = Origin::Member {
                    sender: except,
                    echo: false,
                };
                self.engine.broadcast(&self.state, &room, event, origin).await
            }
            Audience::Connections(recipients) => {
                let state = self.state.read().await;
                Some(
                    self.engine
                        .fan_out(state.registry(), recipients, &Arc::new(event)),
                )
            }
        }
    }

    /// Delivers membership notices while the caller holds the write lock.
    fn deliver(&self, state: &RelayState, notices: Vec<PresenceNotice>) {
        for notice in notices {
            let event = Arc::new(notice.event.to_server_event());
            let report = match notice.audience {
                Audience::Connections(recipients) => {
                    self.engine.fan_out(state.registry(), recipients, &event)
                }
                Audience::RoomExcept { room, except } => self.engine.fan_out(
                    state.registry(),
                    state
                        .directory()
                        .members(&room)
                        .iter()
                        .copied()
                        .filter(|member| *member != except),
                    &event,
                ),
            };
            if report.is_partial() {
                tracing::debug!(
                    room = %notice.event.room(),
                    kind = event.kind(),
                    failed = report.failed(),
                    "presence delivery incomplete"
                );
            }
        }
    }
}
