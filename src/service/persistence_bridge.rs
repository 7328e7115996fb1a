//! Hands confirmed messages to the persistence collaborators.
//!
//! Persistence runs on its own task after a message has been broadcast, so
//! a slow or failing store never delays delivery. Failed saves are retried
//! with doubling backoff; after the last attempt the message is logged and
//! dropped. The room counter update is independent of the save: a counter
//! failure is logged and never undoes the saved message.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::RelaySettings;
use crate::persistence::{DirectoryService, MessageRecord, MessageStore};

/// Result of one persistence hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The store accepted the message.
    Saved {
        /// Save attempts used, including the successful one.
        attempts: u32,
        /// Whether the room's message counter was updated.
        counted: bool,
    },
    /// Every attempt failed and the message was dropped.
    Dropped {
        /// Save attempts used.
        attempts: u32,
    },
}

/// Fire-and-forget persistence with bounded retries.
#[derive(Debug, Clone)]
pub struct PersistenceBridge {
    store: Arc<dyn MessageStore>,
    directory: Arc<dyn DirectoryService>,
    max_attempts: u32,
    backoff: Duration,
}

impl PersistenceBridge {
    /// Creates a bridge using the retry settings in `settings`.
    #[must_use]
    pub fn new(
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn DirectoryService>,
        settings: &RelaySettings,
    ) -> Self {
        Self {
            store,
            directory,
            max_attempts: settings.persist_max_attempts.max(1),
            backoff: settings.persist_retry_backoff,
        }
    }

    /// Persists `record` on a background task and returns immediately.
    pub fn persist(&self, record: MessageRecord) -> JoinHandle<PersistOutcome> {
        let bridge = self.clone();
        tokio::spawn(async move { bridge.persist_now(&record).await })
    }

    /// Saves `record` with retries, then bumps its room counter.
    pub async fn persist_now(&self, record: &MessageRecord) -> PersistOutcome {
        let mut delay = self.backoff;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.save_message(record).await {
                Ok(stored_id) => {
                    if stored_id != record.id {
                        tracing::warn!(
                            message_id = %record.id,
                            %stored_id,
                            "store assigned a different message id"
                        );
                    }
                    let counted = self.count(record).await;
                    return PersistOutcome::Saved {
                        attempts: attempt,
                        counted,
                    };
                }
                Err(e) if attempt < self.max_attempts => {
                    tracing::warn!(
                        message_id = %record.id,
                        attempt,
                        error = %e,
                        "message save failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => {
                    tracing::error!(
                        message_id = %record.id,
                        room = %record.room_id,
                        attempts = attempt,
                        error = %e,
                        "message save failed, dropping"
                    );
                    return PersistOutcome::Dropped { attempts: attempt };
                }
            }
        }
    }

    async fn count(&self, record: &MessageRecord) -> bool {
        match self.directory.increment_message_count(&record.room_id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    room = %record.room_id,
                    error = %e,
                    "room message counter update failed"
                );
                false
            }
        }
    }
}
