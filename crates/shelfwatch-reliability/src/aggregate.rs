//! Event-sourced crawl aggregate.
//!
//! One aggregate per crawl attempt. Commands validate against the current
//! state, record an event and fold it in with [`apply`]; the recorded events
//! are drained with [`CrawlAggregate::take_uncommitted`] and appended to the
//! event log before any reactor sees them.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shelfwatch_core::ProductListingUrl;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::AggregateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

impl CrawlStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, CrawlStatus::Completed | CrawlStatus::Failed)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CrawlStatus::NotStarted => "not_started",
            CrawlStatus::InProgress => "in_progress",
            CrawlStatus::Completed => "completed",
            CrawlStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that can happen to a crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrawlEvent {
    CrawlStarted {
        url: String,
        /// Retailer slug; the reliability layer's only retailer key.
        retailer: String,
        /// Display name, for logs and alerts only.
        retailer_name: String,
        metadata: Map<String, Value>,
        started_at: DateTime<Utc>,
    },
    ProductListingDiscovered {
        url: String,
        category: Option<String>,
        metadata: Map<String, Value>,
    },
    CrawlCompleted {
        statistics: Map<String, Value>,
        completed_at: DateTime<Utc>,
    },
    CrawlFailed {
        reason: String,
        context: Map<String, Value>,
        failed_at: DateTime<Utc>,
    },
}

impl CrawlEvent {
    pub const STARTED: &'static str = "crawl_started";
    pub const LISTING_DISCOVERED: &'static str = "product_listing_discovered";
    pub const COMPLETED: &'static str = "crawl_completed";
    pub const FAILED: &'static str = "crawl_failed";

    /// Stable event-type name, as stored in the event log.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            CrawlEvent::CrawlStarted { .. } => Self::STARTED,
            CrawlEvent::ProductListingDiscovered { .. } => Self::LISTING_DISCOVERED,
            CrawlEvent::CrawlCompleted { .. } => Self::COMPLETED,
            CrawlEvent::CrawlFailed { .. } => Self::FAILED,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CrawlEvent::CrawlCompleted { .. } | CrawlEvent::CrawlFailed { .. }
        )
    }
}

/// A [`CrawlEvent`] with its envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Unique per event; reactors deduplicate on it.
    pub event_id: Uuid,
    pub crawl_id: Uuid,
    /// 1-based position within the crawl's stream.
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
    pub event: CrawlEvent,
}

/// Read model folded from a crawl's events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrawlState {
    pub id: Uuid,
    pub status: CrawlStatus,
    pub url: Option<String>,
    pub retailer: Option<String>,
    pub retailer_name: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub metadata: Map<String, Value>,
    pub product_listings_discovered: u64,
    pub statistics: Map<String, Value>,
    pub failure_reason: Option<String>,
    pub failure_context: Option<Map<String, Value>>,
    /// Number of events applied.
    pub version: u64,
}

impl CrawlState {
    #[must_use]
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            status: CrawlStatus::NotStarted,
            url: None,
            retailer: None,
            retailer_name: None,
            started_at: None,
            metadata: Map::new(),
            product_listings_discovered: 0,
            statistics: Map::new(),
            failure_reason: None,
            failure_context: None,
            version: 0,
        }
    }
}

fn command_for(event: &CrawlEvent) -> &'static str {
    match event {
        CrawlEvent::CrawlStarted { .. } => "start",
        CrawlEvent::ProductListingDiscovered { .. } => "record a listing for",
        CrawlEvent::CrawlCompleted { .. } => "complete",
        CrawlEvent::CrawlFailed { .. } => "fail",
    }
}

/// Folds one event into `state`.
///
/// # Errors
///
/// Returns [`AggregateError::InvalidTransition`] when the event is not
/// allowed from the current status: a start on anything but `NotStarted`,
/// or any other event outside `InProgress`.
pub fn apply(mut state: CrawlState, event: &CrawlEvent) -> Result<CrawlState, AggregateError> {
    let allowed = match event {
        CrawlEvent::CrawlStarted { .. } => state.status == CrawlStatus::NotStarted,
        _ => state.status == CrawlStatus::InProgress,
    };
    if !allowed {
        return Err(AggregateError::InvalidTransition {
            crawl_id: state.id,
            command: command_for(event),
            status: state.status,
        });
    }

    match event {
        CrawlEvent::CrawlStarted {
            url,
            retailer,
            retailer_name,
            metadata,
            started_at,
        } => {
            state.status = CrawlStatus::InProgress;
            state.url = Some(url.clone());
            state.retailer = Some(retailer.clone());
            state.retailer_name = Some(retailer_name.clone());
            state.metadata.clone_from(metadata);
            state.started_at = Some(*started_at);
        }
        CrawlEvent::ProductListingDiscovered { .. } => {
            state.product_listings_discovered += 1;
        }
        CrawlEvent::CrawlCompleted { statistics, .. } => {
            state.status = CrawlStatus::Completed;
            state.statistics.clone_from(statistics);
        }
        CrawlEvent::CrawlFailed {
            reason, context, ..
        } => {
            state.status = CrawlStatus::Failed;
            state.failure_reason = Some(reason.clone());
            state.failure_context = Some(context.clone());
        }
    }
    state.version += 1;
    Ok(state)
}

/// Command side of a single crawl.
pub struct CrawlAggregate {
    state: CrawlState,
    uncommitted: Vec<StoredEvent>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CrawlAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrawlAggregate")
            .field("state", &self.state)
            .field("uncommitted", &self.uncommitted.len())
            .finish_non_exhaustive()
    }
}

impl CrawlAggregate {
    /// A fresh aggregate with a new crawl id.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_id(Uuid::new_v4(), clock)
    }

    #[must_use]
    pub fn with_id(id: Uuid, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: CrawlState::new(id),
            uncommitted: Vec::new(),
            clock,
        }
    }

    /// Rebuilds an aggregate from its stored stream.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError`] if an event belongs to another crawl, is out
    /// of sequence, or is not a legal transition.
    pub fn replay(
        id: Uuid,
        events: &[StoredEvent],
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AggregateError> {
        let mut state = CrawlState::new(id);
        for stored in events {
            if stored.crawl_id != id {
                return Err(AggregateError::ForeignEvent {
                    event_id: stored.event_id,
                    expected: id,
                    found: stored.crawl_id,
                });
            }
            if stored.sequence != state.version + 1 {
                return Err(AggregateError::OutOfSequence {
                    event_id: stored.event_id,
                    expected: state.version + 1,
                    found: stored.sequence,
                });
            }
            state = apply(state, &stored.event)?;
        }
        Ok(Self {
            state,
            uncommitted: Vec::new(),
            clock,
        })
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.state.id
    }

    #[must_use]
    pub fn state(&self) -> &CrawlState {
        &self.state
    }

    #[must_use]
    pub fn status(&self) -> CrawlStatus {
        self.state.status
    }

    /// Drains events recorded since the last call, oldest first.
    pub fn take_uncommitted(&mut self) -> Vec<StoredEvent> {
        std::mem::take(&mut self.uncommitted)
    }

    fn record(&mut self, event: CrawlEvent) -> Result<(), AggregateError> {
        let state = apply(self.state.clone(), &event)?;
        self.uncommitted.push(StoredEvent {
            event_id: Uuid::new_v4(),
            crawl_id: state.id,
            sequence: state.version,
            recorded_at: self.clock.now(),
            event,
        });
        self.state = state;
        Ok(())
    }

    /// `NotStarted` → `InProgress`.
    ///
    /// # Errors
    ///
    /// Rejected unless the crawl has not started.
    pub fn start_crawl(
        &mut self,
        url: &str,
        retailer: &str,
        retailer_name: &str,
        metadata: Map<String, Value>,
    ) -> Result<(), AggregateError> {
        self.record(CrawlEvent::CrawlStarted {
            url: url.to_owned(),
            retailer: retailer.to_owned(),
            retailer_name: retailer_name.to_owned(),
            metadata,
            started_at: self.clock.now(),
        })
    }

    /// # Errors
    ///
    /// Rejected unless the crawl is in progress.
    pub fn record_product_listing_discovered(
        &mut self,
        url: &str,
        category: Option<&str>,
        metadata: Map<String, Value>,
    ) -> Result<(), AggregateError> {
        self.record(CrawlEvent::ProductListingDiscovered {
            url: url.to_owned(),
            category: category.map(str::to_owned),
            metadata,
        })
    }

    /// Records one discovery event per listing, in order. Returns how many
    /// were recorded.
    ///
    /// # Errors
    ///
    /// Rejected unless the crawl is in progress; nothing is recorded then.
    pub fn record_product_listings_discovered<'a, I>(
        &mut self,
        listings: I,
    ) -> Result<usize, AggregateError>
    where
        I: IntoIterator<Item = &'a ProductListingUrl>,
    {
        if self.state.status != CrawlStatus::InProgress {
            return Err(AggregateError::InvalidTransition {
                crawl_id: self.state.id,
                command: "record listings for",
                status: self.state.status,
            });
        }
        let mut recorded = 0;
        for listing in listings {
            self.record_product_listing_discovered(
                &listing.url,
                listing.category.as_deref(),
                listing.metadata.clone(),
            )?;
            recorded += 1;
        }
        Ok(recorded)
    }

    /// `InProgress` → `Completed`.
    ///
    /// # Errors
    ///
    /// Rejected unless the crawl is in progress.
    pub fn complete_crawl(&mut self, statistics: Map<String, Value>) -> Result<(), AggregateError> {
        self.record(CrawlEvent::CrawlCompleted {
            statistics,
            completed_at: self.clock.now(),
        })
    }

    /// `InProgress` → `Failed`.
    ///
    /// # Errors
    ///
    /// Rejected unless the crawl is in progress.
    pub fn mark_as_failed(
        &mut self,
        reason: &str,
        context: Map<String, Value>,
    ) -> Result<(), AggregateError> {
        self.record(CrawlEvent::CrawlFailed {
            reason: reason.to_owned(),
            context,
            failed_at: self.clock.now(),
        })
    }
}

#[cfg(test)]
#[path = "aggregate_test.rs"]
mod tests;
