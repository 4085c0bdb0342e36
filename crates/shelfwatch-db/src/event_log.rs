//! Postgres-backed crawl event log (`crawl_events`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use shelfwatch_reliability::{CrawlEvent, EventLog, StoredEvent, StoreError};
use sqlx::PgPool;
use uuid::Uuid;

use crate::backend;

const SEQUENCE_CONSTRAINT: &str = "crawl_events_crawl_sequence_key";

/// A row from the `crawl_events` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct EventRow {
    event_id: Uuid,
    crawl_id: Uuid,
    sequence: i64,
    payload: Value,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for StoredEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let sequence = u64::try_from(row.sequence)
            .map_err(|_| StoreError::Backend(format!("negative sequence {}", row.sequence)))?;
        Ok(StoredEvent {
            event_id: row.event_id,
            crawl_id: row.crawl_id,
            sequence,
            recorded_at: row.recorded_at,
            event: serde_json::from_value::<CrawlEvent>(row.payload)?,
        })
    }
}

fn is_sequence_conflict(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|db| db.constraint())
        .is_some_and(|c| c == SEQUENCE_CONSTRAINT)
}

#[derive(Debug, Clone)]
pub struct PgEventLog {
    pool: PgPool,
}

impl PgEventLog {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventLog for PgEventLog {
    async fn append(&self, events: &[StoredEvent]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        for event in events {
            let sequence = i64::try_from(event.sequence)
                .map_err(|_| StoreError::Backend(format!("sequence {} overflows", event.sequence)))?;
            let inserted = sqlx::query(
                "INSERT INTO crawl_events \
                     (event_id, crawl_id, sequence, event_type, payload, recorded_at) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (event_id) DO NOTHING",
            )
            .bind(event.event_id)
            .bind(event.crawl_id)
            .bind(sequence)
            .bind(event.event.kind())
            .bind(serde_json::to_value(&event.event)?)
            .bind(event.recorded_at)
            .execute(&mut *tx)
            .await;

            match inserted {
                Ok(_) => {}
                Err(e) if is_sequence_conflict(&e) => {
                    // Dropping `tx` rolls back the whole batch.
                    return Err(StoreError::Conflict {
                        event_id: event.event_id,
                        crawl_id: event.crawl_id,
                        sequence: event.sequence,
                    });
                }
                Err(e) => return Err(backend(e)),
            }
        }
        tx.commit().await.map_err(backend)
    }

    async fn events_for(&self, crawl_id: Uuid) -> Result<Vec<StoredEvent>, StoreError> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT event_id, crawl_id, sequence, payload, recorded_at \
             FROM crawl_events \
             WHERE crawl_id = $1 \
             ORDER BY sequence",
        )
        .bind(crawl_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(StoredEvent::try_from).collect()
    }

    async fn first_of_kind(
        &self,
        crawl_id: Uuid,
        kind: &str,
    ) -> Result<Option<StoredEvent>, StoreError> {
        let row = sqlx::query_as::<_, EventRow>(
            "SELECT event_id, crawl_id, sequence, payload, recorded_at \
             FROM crawl_events \
             WHERE crawl_id = $1 AND event_type = $2 \
             ORDER BY sequence \
             LIMIT 1",
        )
        .bind(crawl_id)
        .bind(kind)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(StoredEvent::try_from).transpose()
    }
}
