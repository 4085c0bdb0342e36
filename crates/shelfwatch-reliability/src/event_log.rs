use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::aggregate::StoredEvent;
use crate::error::StoreError;

/// Append-only crawl event log, queryable by crawl and event type.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends `events` in order. Re-appending an already stored event id is
    /// a no-op; a different event at an occupied sequence is a conflict.
    async fn append(&self, events: &[StoredEvent]) -> Result<(), StoreError>;

    /// Every event of one crawl, in sequence order.
    async fn events_for(&self, crawl_id: Uuid) -> Result<Vec<StoredEvent>, StoreError>;

    /// The earliest event of `kind` for one crawl.
    async fn first_of_kind(
        &self,
        crawl_id: Uuid,
        kind: &str,
    ) -> Result<Option<StoredEvent>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<StoredEvent>>,
}

impl MemoryEventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, events: &[StoredEvent]) -> Result<(), StoreError> {
        let mut log = self.events.lock().await;
        for event in events {
            if log.iter().any(|e| e.event_id == event.event_id) {
                continue;
            }
            if log
                .iter()
                .any(|e| e.crawl_id == event.crawl_id && e.sequence == event.sequence)
            {
                return Err(StoreError::Conflict {
                    event_id: event.event_id,
                    crawl_id: event.crawl_id,
                    sequence: event.sequence,
                });
            }
        }
        for event in events {
            if !log.iter().any(|e| e.event_id == event.event_id) {
                log.push(event.clone());
            }
        }
        Ok(())
    }

    async fn events_for(&self, crawl_id: Uuid) -> Result<Vec<StoredEvent>, StoreError> {
        let mut events: Vec<StoredEvent> = self
            .events
            .lock()
            .await
            .iter()
            .filter(|e| e.crawl_id == crawl_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.sequence);
        Ok(events)
    }

    async fn first_of_kind(
        &self,
        crawl_id: Uuid,
        kind: &str,
    ) -> Result<Option<StoredEvent>, StoreError> {
        Ok(self
            .events_for(crawl_id)
            .await?
            .into_iter()
            .find(|e| e.event.kind() == kind))
    }
}
