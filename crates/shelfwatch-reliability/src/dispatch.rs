//! Append-then-dispatch plumbing between the crawl aggregate and the
//! reactors.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::aggregate::{CrawlAggregate, CrawlEvent, StoredEvent};
use crate::error::StoreError;
use crate::event_log::EventLog;
use crate::price_drop::{ListingPriceDropped, PriceDropReactor, PriceDropSummary};

/// Statistic/context key carrying a crawl's wall-clock duration.
pub const DURATION_KEY: &str = "duration_seconds";

/// A terminal crawl event joined with its start event.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlOutcome {
    /// Id of the terminal event.
    pub event_id: Uuid,
    pub crawl_id: Uuid,
    /// Retailer slug.
    pub retailer: String,
    pub retailer_name: String,
    pub url: String,
    pub success: bool,
    pub occurred_at: DateTime<Utc>,
    pub duration_seconds: Option<f64>,
    pub reason: Option<String>,
    pub context: Map<String, Value>,
}

impl CrawlOutcome {
    /// Joins `terminal` with `start`. `None` if `terminal` is not a terminal
    /// event or `start` is not a start event.
    #[must_use]
    pub fn from_events(start: &StoredEvent, terminal: &StoredEvent) -> Option<Self> {
        let CrawlEvent::CrawlStarted {
            url,
            retailer,
            retailer_name,
            ..
        } = &start.event
        else {
            return None;
        };

        let (success, occurred_at, reason, context) = match &terminal.event {
            CrawlEvent::CrawlCompleted {
                statistics,
                completed_at,
            } => (true, *completed_at, None, statistics.clone()),
            CrawlEvent::CrawlFailed {
                reason,
                context,
                failed_at,
            } => (false, *failed_at, Some(reason.clone()), context.clone()),
            _ => return None,
        };

        Some(Self {
            event_id: terminal.event_id,
            crawl_id: terminal.crawl_id,
            retailer: retailer.clone(),
            retailer_name: retailer_name.clone(),
            url: url.clone(),
            success,
            occurred_at,
            duration_seconds: context.get(DURATION_KEY).and_then(Value::as_f64),
            reason,
            context,
        })
    }
}

/// A consumer of crawl outcomes. Delivery is at-least-once, so handlers
/// must tolerate seeing the same `event_id` twice.
#[async_trait]
pub trait Reactor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_outcome(&self, outcome: &CrawlOutcome);
}

/// The event log plus every registered reactor.
pub struct ReactorSet {
    log: Arc<dyn EventLog>,
    reactors: Vec<Arc<dyn Reactor>>,
    price_drop: Option<Arc<PriceDropReactor>>,
}

impl std::fmt::Debug for ReactorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorSet")
            .field(
                "reactors",
                &self.reactors.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field("price_drop", &self.price_drop.is_some())
            .finish_non_exhaustive()
    }
}

impl ReactorSet {
    #[must_use]
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self {
            log,
            reactors: Vec::new(),
            price_drop: None,
        }
    }

    #[must_use]
    pub fn with_reactor(mut self, reactor: Arc<dyn Reactor>) -> Self {
        self.reactors.push(reactor);
        self
    }

    #[must_use]
    pub fn with_price_drop(mut self, reactor: Arc<PriceDropReactor>) -> Self {
        self.price_drop = Some(reactor);
        self
    }

    #[must_use]
    pub fn event_log(&self) -> &Arc<dyn EventLog> {
        &self.log
    }

    /// Appends the aggregate's pending events to the log, then dispatches
    /// them. Returns how many events were committed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the append fails; reactors have not run then
    /// and the events are lost from the aggregate.
    pub async fn commit(&self, aggregate: &mut CrawlAggregate) -> Result<usize, StoreError> {
        let events = aggregate.take_uncommitted();
        if events.is_empty() {
            return Ok(0);
        }
        self.log.append(&events).await?;
        self.dispatch(&events).await;
        Ok(events.len())
    }

    /// Hands every terminal event in `events` to every reactor. The start
    /// event is taken from the same batch when present, else from the log.
    pub async fn dispatch(&self, events: &[StoredEvent]) {
        for terminal in events.iter().filter(|e| e.event.is_terminal()) {
            let Some(outcome) = self.resolve(events, terminal).await else {
                continue;
            };
            tracing::debug!(
                crawl_id = %outcome.crawl_id,
                retailer = %outcome.retailer,
                success = outcome.success,
                "dispatching crawl outcome"
            );
            for reactor in &self.reactors {
                reactor.on_outcome(&outcome).await;
            }
        }
    }

    /// Runs the price-drop reactor, if one is registered.
    pub async fn dispatch_price_drop(&self, event: &ListingPriceDropped) -> Option<PriceDropSummary> {
        match &self.price_drop {
            Some(reactor) => Some(reactor.on_price_drop(event).await),
            None => None,
        }
    }

    async fn resolve(&self, batch: &[StoredEvent], terminal: &StoredEvent) -> Option<CrawlOutcome> {
        let in_batch = batch
            .iter()
            .find(|e| e.crawl_id == terminal.crawl_id && e.event.kind() == CrawlEvent::STARTED)
            .cloned();
        let start = match in_batch {
            Some(start) => start,
            None => match self
                .log
                .first_of_kind(terminal.crawl_id, CrawlEvent::STARTED)
                .await
            {
                Ok(Some(start)) => start,
                Ok(None) => {
                    tracing::warn!(
                        crawl_id = %terminal.crawl_id,
                        "no start event for terminal crawl event; skipping reactors"
                    );
                    return None;
                }
                Err(e) => {
                    tracing::warn!(
                        crawl_id = %terminal.crawl_id,
                        error = %e,
                        "event log lookup failed; skipping reactors"
                    );
                    return None;
                }
            },
        };
        CrawlOutcome::from_events(&start, terminal)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::Mutex;

    use super::*;
    use crate::clock::SystemClock;
    use crate::event_log::MemoryEventLog;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<CrawlOutcome>>,
    }

    #[async_trait]
    impl Reactor for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn on_outcome(&self, outcome: &CrawlOutcome) {
            self.seen.lock().await.push(outcome.clone());
        }
    }

    fn start(crawl: &mut CrawlAggregate) {
        crawl
            .start_crawl("https://www.petsathome.example/c/dog", "pets-at-home", "Pets at Home", Map::new())
            .unwrap();
    }

    #[tokio::test]
    async fn commit_appends_before_dispatching_terminal_outcome() {
        let log = Arc::new(MemoryEventLog::new());
        let recorder = Arc::new(Recorder::default());
        let set = ReactorSet::new(log.clone()).with_reactor(recorder.clone());

        let mut crawl = CrawlAggregate::new(Arc::new(SystemClock));
        start(&mut crawl);
        assert_eq!(set.commit(&mut crawl).await.unwrap(), 1);
        assert!(recorder.seen.lock().await.is_empty());

        let mut stats = Map::new();
        stats.insert(DURATION_KEY.to_owned(), json!(4.5));
        crawl.complete_crawl(stats).unwrap();
        assert_eq!(set.commit(&mut crawl).await.unwrap(), 1);

        let seen = recorder.seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert!(seen[0].success);
        assert_eq!(seen[0].retailer, "pets-at-home");
        assert_eq!(seen[0].retailer_name, "Pets at Home");
        assert_eq!(seen[0].duration_seconds, Some(4.5));
        assert_eq!(log.len().await, 2);
    }

    #[tokio::test]
    async fn failure_outcome_carries_reason_and_context() {
        let log = Arc::new(MemoryEventLog::new());
        let recorder = Arc::new(Recorder::default());
        let set = ReactorSet::new(log).with_reactor(recorder.clone());

        let mut crawl = CrawlAggregate::new(Arc::new(SystemClock));
        start(&mut crawl);
        let mut context = Map::new();
        context.insert("status_code".to_owned(), json!(503));
        crawl.mark_as_failed("HTTP 503", context).unwrap();
        set.commit(&mut crawl).await.unwrap();

        let seen = recorder.seen.lock().await;
        assert!(!seen[0].success);
        assert_eq!(seen[0].reason.as_deref(), Some("HTTP 503"));
        assert_eq!(seen[0].context["status_code"], 503);
        assert_eq!(seen[0].duration_seconds, None);
    }

    #[tokio::test]
    async fn terminal_without_start_event_is_skipped() {
        let log = Arc::new(MemoryEventLog::new());
        let recorder = Arc::new(Recorder::default());
        let set = ReactorSet::new(log).with_reactor(recorder.clone());

        let mut crawl = CrawlAggregate::new(Arc::new(SystemClock));
        start(&mut crawl);
        crawl.complete_crawl(Map::new()).unwrap();
        let events = crawl.take_uncommitted();
        set.dispatch(&events[1..]).await;

        assert!(recorder.seen.lock().await.is_empty());
    }
}
