//! Persistence layer: the external collaborators the relay core talks to.
//!
//! The core sees two services through traits:
//!
//! - [`DirectoryService`]: room metadata lookup and the per-room message
//!   counter.
//! - [`MessageStore`]: durable message storage and history.
//!
//! [`PostgresStore`] implements both over `sqlx::PgPool`;
//! [`InMemoryStore`] implements both in process for development and tests.

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::InMemoryStore;
pub use models::{MessageRecord, RoomMetadata};
pub use postgres::PostgresStore;

use crate::domain::ids::{MessageId, RoomId};
use crate::error::RelayError;

/// Room metadata service.
#[async_trait]
pub trait DirectoryService: Send + Sync + std::fmt::Debug {
    /// Returns the room's metadata, or `None` if the room does not exist.
    ///
    /// Implementations configured to create rooms on demand upsert the
    /// room here and never return `None`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::PersistenceFailed`] if the lookup fails.
    async fn room_metadata(&self, room: &RoomId) -> Result<Option<RoomMetadata>, RelayError>;

    /// Adds one to the room's message counter.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::PersistenceFailed`] if the update fails.
    async fn increment_message_count(&self, room: &RoomId) -> Result<(), RelayError>;
}

/// Durable message storage.
#[async_trait]
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    /// Stores `record` under its own id and returns that id. Saving the
    /// same record twice must not create a second copy.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::PersistenceFailed`] if the write fails.
    async fn save_message(&self, record: &MessageRecord) -> Result<MessageId, RelayError>;

    /// Returns up to `limit` messages of `room` in ascending time order,
    /// after skipping the `offset` newest ones.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::PersistenceFailed`] if the read fails.
    async fn recent_messages(
        &self,
        room: &RoomId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<MessageRecord>, RelayError>;

    /// Number of stored messages in `room`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::PersistenceFailed`] if the read fails.
    async fn count_messages(&self, room: &RoomId) -> Result<u64, RelayError>;

    /// Deletes messages created before `cutoff` and returns how many went.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::PersistenceFailed`] if the delete fails.
    async fn delete_messages_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RelayError>;
}
