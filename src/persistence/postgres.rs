//! PostgreSQL implementation of the collaborator traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{MessageRecord, RoomMetadata};
use super::{DirectoryService, MessageStore};
use crate::domain::ids::{MessageId, RoomId};
use crate::error::RelayError;

/// PostgreSQL-backed directory and message store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    auto_create_rooms: bool,
}

impl PostgresStore {
    /// Creates a store over the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool, auto_create_rooms: bool) -> Self {
        Self {
            pool,
            auto_create_rooms,
        }
    }

    /// Applies the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::PersistenceFailed`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), RelayError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RelayError::PersistenceFailed(e.to_string()))
    }
}

type MessageRow = (Uuid, String, String, String, String, String, DateTime<Utc>);

fn message_from_row(
    (id, room_id, sender_id, sender_name, sender_avatar, text, created_at): MessageRow,
) -> MessageRecord {
    MessageRecord {
        id: MessageId::from_uuid(id),
        room_id: RoomId::new(room_id),
        sender_id,
        sender_name,
        sender_avatar,
        text,
        created_at,
    }
}

#[async_trait]
impl DirectoryService for PostgresStore {
    async fn room_metadata(&self, room: &RoomId) -> Result<Option<RoomMetadata>, RelayError> {
        if self.auto_create_rooms {
            sqlx::query("INSERT INTO rooms (id, name) VALUES ($1, $1) ON CONFLICT (id) DO NOTHING")
                .bind(room.as_str())
                .execute(&self.pool)
                .await?;
        }

        let row = sqlx::query_as::<_, (String, String, String, i64)>(
            "SELECT id, name, description, message_count FROM rooms WHERE id = $1",
        )
        .bind(room.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, name, description, message_count)| RoomMetadata {
            id: RoomId::new(id),
            name,
            description,
            message_count,
        }))
    }

    async fn increment_message_count(&self, room: &RoomId) -> Result<(), RelayError> {
        let result = sqlx::query("UPDATE rooms SET message_count = message_count + 1 WHERE id = $1")
            .bind(room.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RelayError::RoomNotFound(room.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for PostgresStore {
    async fn save_message(&self, record: &MessageRecord) -> Result<MessageId, RelayError> {
        sqlx::query(
            "INSERT INTO messages (id, room_id, sender_id, sender_name, sender_avatar, body, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (id) DO NOTHING",
        )
        .bind(*record.id.as_uuid())
        .bind(record.room_id.as_str())
        .bind(&record.sender_id)
        .bind(&record.sender_name)
        .bind(&record.sender_avatar)
        .bind(&record.text)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(record.id)
    }

    async fn recent_messages(
        &self,
        room: &RoomId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<MessageRecord>, RelayError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, room_id, sender_id, sender_name, sender_avatar, body, created_at FROM ( \
                 SELECT * FROM messages WHERE room_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3 \
             ) newest ORDER BY created_at ASC",
        )
        .bind(room.as_str())
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(message_from_row).collect())
    }

    async fn count_messages(&self, room: &RoomId) -> Result<u64, RelayError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages WHERE room_id = $1")
            .bind(room.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn delete_messages_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RelayError> {
        let result = sqlx::query("DELETE FROM messages WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
