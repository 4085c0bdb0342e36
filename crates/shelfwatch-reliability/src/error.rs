use thiserror::Error;
use uuid::Uuid;

use crate::aggregate::CrawlStatus;

/// A command that the crawl aggregate's current status does not allow.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregateError {
    #[error("cannot {command} crawl {crawl_id}: status is {status}")]
    InvalidTransition {
        crawl_id: Uuid,
        command: &'static str,
        status: CrawlStatus,
    },

    #[error("event {event_id} belongs to crawl {found}, not {expected}")]
    ForeignEvent {
        event_id: Uuid,
        expected: Uuid,
        found: Uuid,
    },

    #[error("event {event_id} has sequence {found}, expected {expected}")]
    OutOfSequence {
        event_id: Uuid,
        expected: u64,
        found: u64,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("value serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("event {event_id} conflicts with crawl {crawl_id} sequence {sequence}")]
    Conflict {
        event_id: Uuid,
        crawl_id: Uuid,
        sequence: u64,
    },
}

#[derive(Debug, Error)]
pub enum ReliabilityError {
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
