//! In-process implementation of the collaborator traits.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::models::{MessageRecord, RoomMetadata};
use super::{DirectoryService, MessageStore};
use crate::domain::ids::{MessageId, RoomId};
use crate::error::RelayError;

/// Room directory and message store kept in memory.
///
/// Used when persistence is disabled and in tests. Nothing survives a
/// restart.
#[derive(Debug)]
pub struct InMemoryStore {
    auto_create_rooms: bool,
    rooms: RwLock<HashMap<RoomId, RoomMetadata>>,
    messages: RwLock<Vec<MessageRecord>>,
}

impl InMemoryStore {
    /// Creates an empty store. With `auto_create_rooms`, unknown rooms are
    /// created on first lookup.
    #[must_use]
    pub fn new(auto_create_rooms: bool) -> Self {
        Self {
            auto_create_rooms,
            rooms: RwLock::new(HashMap::new()),
            messages: RwLock::new(Vec::new()),
        }
    }

    /// Creates or replaces a room.
    pub async fn create_room(&self, id: RoomId, name: impl Into<String>, description: impl Into<String>) {
        let metadata = RoomMetadata {
            id: id.clone(),
            name: name.into(),
            description: description.into(),
            message_count: 0,
        };
        self.rooms.write().await.insert(id, metadata);
    }

    /// Every stored message in insertion order.
    pub async fn messages(&self) -> Vec<MessageRecord> {
        self.messages.read().await.clone()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl DirectoryService for InMemoryStore {
    async fn room_metadata(&self, room: &RoomId) -> Result<Option<RoomMetadata>, RelayError> {
        if let Some(metadata) = self.rooms.read().await.get(room) {
            return Ok(Some(metadata.clone()));
        }
        if !self.auto_create_rooms {
            return Ok(None);
        }
        let mut rooms = self.rooms.write().await;
        let metadata = rooms.entry(room.clone()).or_insert_with(|| RoomMetadata {
            id: room.clone(),
            name: room.to_string(),
            description: String::new(),
            message_count: 0,
        });
        Ok(Some(metadata.clone()))
    }

    async fn increment_message_count(&self, room: &RoomId) -> Result<(), RelayError> {
        let mut rooms = self.rooms.write().await;
        let metadata = rooms
            .get_mut(room)
            .ok_or_else(|| RelayError::RoomNotFound(room.clone()))?;
        metadata.message_count = metadata.message_count.saturating_add(1);
        Ok(())
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn save_message(&self, record: &MessageRecord) -> Result<MessageId, RelayError> {
        let mut messages = self.messages.write().await;
        if !messages.iter().any(|stored| stored.id == record.id) {
            messages.push(record.clone());
        }
        Ok(record.id)
    }

    async fn recent_messages(
        &self,
        room: &RoomId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<MessageRecord>, RelayError> {
        let messages = self.messages.read().await;
        let mut in_room: Vec<MessageRecord> = messages
            .iter()
            .filter(|record| &record.room_id == room)
            .cloned()
            .collect();
        in_room.sort_by_key(|record| std::cmp::Reverse(record.created_at));
        let mut page: Vec<MessageRecord> = in_room
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        page.reverse();
        Ok(page)
    }

    async fn count_messages(&self, room: &RoomId) -> Result<u64, RelayError> {
        let messages = self.messages.read().await;
        Ok(messages.iter().filter(|record| &record.room_id == room).count() as u64)
    }

    async fn delete_messages_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RelayError> {
        let mut messages = self.messages.write().await;
        let before = messages.len();
        messages.retain(|record| record.created_at >= cutoff);
        Ok((before - messages.len()) as u64)
    }
}
