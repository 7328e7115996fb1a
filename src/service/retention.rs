//! Background deletion of expired messages.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::relay_service::RelayService;

/// Spawns a task that deletes messages older than `max_age` every
/// `interval`, starting immediately. Sweep failures are logged and the task
/// keeps running; abort the returned handle to stop it.
pub fn spawn_retention_sweeper(
    relay: RelayService,
    max_age: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = relay.sweep_retention(max_age).await {
                tracing::warn!(error = %e, "retention sweep failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::config::RelaySettings;
    use crate::domain::{MessageId, RoomId};
    use crate::persistence::{DirectoryService, InMemoryStore, MessageRecord, MessageStore};

    fn record(age: chrono::Duration) -> MessageRecord {
        MessageRecord {
            id: MessageId::new(),
            room_id: RoomId::from("general"),
            sender_id: "u-a".to_string(),
            sender_name: "A".to_string(),
            sender_avatar: String::new(),
            text: "hello".to_string(),
            created_at: Utc::now() - age,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_deletes_only_expired_messages() {
        let store = Arc::new(InMemoryStore::default());
        let _ = store.save_message(&record(chrono::Duration::hours(100))).await;
        let _ = store.save_message(&record(chrono::Duration::minutes(5))).await;
        let relay = RelayService::new(
            Arc::clone(&store) as Arc<dyn DirectoryService>,
            Arc::clone(&store) as Arc<dyn MessageStore>,
            RelaySettings::default(),
        );

        let sweeper = spawn_retention_sweeper(
            relay,
            Duration::from_secs(72 * 3600),
            Duration::from_secs(3600),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        sweeper.abort();

        let remaining = store.messages().await;
        assert_eq!(remaining.len(), 1);
        assert!(remaining.iter().all(|r| r.created_at > Utc::now() - chrono::Duration::hours(1)));
    }
}
