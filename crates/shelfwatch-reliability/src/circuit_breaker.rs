//! Per-retailer circuit breaker over a short sliding window of crawl
//! outcomes.
//!
//! The breaker opens when the window holds at least `min_samples` outcomes
//! and the failure rate is at or above `failure_threshold`. It closes only on
//! a successful crawl while open, or on a manual [`CircuitBreakerReactor::reset`].
//! The cooldown TTL expires the open flag so the job runner will try the
//! retailer again, but the registry status stays `CircuitOpen` until one of
//! those two events.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::clock::Clock;
use crate::dispatch::{CrawlOutcome, Reactor};
use crate::error::StoreError;
use crate::notify::{Notification, NotificationSink, Severity};
use crate::registry::{RetailerRegistry, RetailerStatus};
use crate::store::{get_json, mark_seen, put_json, update_json, KvStore};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerConfig {
    pub window: TimeDelta,
    /// Failure rate in `(0, 1]`; reaching it exactly trips the breaker.
    pub failure_threshold: f64,
    pub min_samples: usize,
    pub cooldown: TimeDelta,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window: TimeDelta::minutes(60),
            failure_threshold: 0.5,
            min_samples: 3,
            cooldown: TimeDelta::minutes(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowEntry {
    pub event_id: Uuid,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time view of one retailer's breaker, for operator tooling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub retailer: String,
    pub open: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub samples: usize,
    pub failures: usize,
    pub failure_rate: f64,
}

#[allow(clippy::cast_precision_loss)]
fn failure_rate(window: &[WindowEntry]) -> (usize, f64) {
    let failures = window.iter().filter(|e| !e.success).count();
    if window.is_empty() {
        (0, 0.0)
    } else {
        (failures, failures as f64 / window.len() as f64)
    }
}

fn window_key(slug: &str) -> String {
    format!("circuit:{slug}:window")
}

fn open_key(slug: &str) -> String {
    format!("circuit:{slug}:open")
}

fn cooldown_key(slug: &str) -> String {
    format!("circuit:{slug}:cooldown_until")
}

pub struct CircuitBreakerReactor {
    store: Arc<dyn KvStore>,
    registry: Arc<dyn RetailerRegistry>,
    clock: Arc<dyn Clock>,
    sink: Option<Arc<dyn NotificationSink>>,
    config: CircuitBreakerConfig,
}

impl std::fmt::Debug for CircuitBreakerReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerReactor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CircuitBreakerReactor {
    #[must_use]
    pub fn new(
        store: Arc<dyn KvStore>,
        registry: Arc<dyn RetailerRegistry>,
        clock: Arc<dyn Clock>,
        config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            sink: None,
            config,
        }
    }

    /// Also alert operators when a breaker opens.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Whether crawling of `slug` is currently blocked. A store failure
    /// reads as closed.
    pub async fn is_open(&self, slug: &str) -> bool {
        match self.store.get(&open_key(slug)).await {
            Ok(flag) => flag.is_some(),
            Err(e) => {
                tracing::warn!(retailer = slug, error = %e, "circuit flag read failed; treating as closed");
                false
            }
        }
    }

    /// Whether the breaker still holds `slug` disabled: either the open flag
    /// is live, or the flag has expired and the registry status is still
    /// `CircuitOpen` awaiting a trial crawl. A registry failure reads as not
    /// tripped.
    pub async fn is_tripped(&self, slug: &str) -> bool {
        if self.is_open(slug).await {
            return true;
        }
        match self.registry.status(slug).await {
            Ok(status) => status == Some(RetailerStatus::CircuitOpen),
            Err(e) => {
                tracing::warn!(retailer = slug, error = %e, "status lookup failed; treating circuit as closed");
                false
            }
        }
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    pub async fn snapshot(&self, slug: &str) -> Result<CircuitSnapshot, StoreError> {
        let store = self.store.as_ref();
        let window: Vec<WindowEntry> = get_json(store, &window_key(slug))
            .await?
            .unwrap_or_default();
        let (failures, rate) = failure_rate(&window);
        Ok(CircuitSnapshot {
            retailer: slug.to_owned(),
            open: store.get(&open_key(slug)).await?.is_some(),
            cooldown_until: get_json(store, &cooldown_key(slug)).await?,
            samples: window.len(),
            failures,
            failure_rate: rate,
        })
    }

    /// Clears the window, open flag and cooldown for `slug` and restores an
    /// `Active` status if the breaker had disabled the retailer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store or registry write fails.
    pub async fn reset(&self, slug: &str) -> Result<(), StoreError> {
        for key in [window_key(slug), open_key(slug), cooldown_key(slug)] {
            self.store.forget(&key).await?;
        }
        if self.registry.status(slug).await? == Some(RetailerStatus::CircuitOpen) {
            self.registry.set_status(slug, RetailerStatus::Active).await?;
        }
        tracing::info!(retailer = slug, "circuit breaker reset");
        Ok(())
    }

    async fn append(&self, outcome: &CrawlOutcome) -> Result<Vec<WindowEntry>, StoreError> {
        let cutoff = self.clock.now() - self.config.window;
        let entry = WindowEntry {
            event_id: outcome.event_id,
            success: outcome.success,
            timestamp: outcome.occurred_at,
        };
        let window = update_json::<Vec<WindowEntry>, _>(
            self.store.as_ref(),
            &window_key(&outcome.retailer),
            Some(self.config.window),
            move |window| {
                let mut window: Vec<WindowEntry> = window
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|e| e.timestamp >= cutoff)
                    .collect();
                if entry.timestamp >= cutoff {
                    window.push(entry.clone());
                }
                Some(window)
            },
        )
        .await?;
        Ok(window.unwrap_or_default())
    }

    async fn open(&self, outcome: &CrawlOutcome, failures: usize, samples: usize) {
        let slug = outcome.retailer.as_str();
        let now = self.clock.now();
        let cooldown_until = now + self.config.cooldown;
        let ttl = Some(self.config.cooldown);

        let written = async {
            self.store
                .put(&open_key(slug), Value::Bool(true), ttl)
                .await?;
            put_json(self.store.as_ref(), &cooldown_key(slug), &cooldown_until, ttl).await?;
            self.registry
                .set_status(slug, RetailerStatus::CircuitOpen)
                .await
        }
        .await;
        if let Err(e) = written {
            tracing::warn!(retailer = slug, error = %e, "failed to persist open circuit");
            return;
        }

        tracing::warn!(
            retailer = slug,
            failures,
            samples,
            cooldown_until = %cooldown_until,
            "circuit breaker opened"
        );
        if let Some(sink) = &self.sink {
            let notification = Notification::operator(
                Severity::Warning,
                format!("Crawling paused for {}", outcome.retailer_name),
                format!(
                    "{failures} of the last {samples} crawls failed; retailer disabled until a crawl succeeds or the breaker is reset."
                ),
            )
            .with_context("retailer", slug)
            .with_context("cooldown_until", cooldown_until.to_rfc3339());
            sink.send(&notification).await;
        }
    }

    async fn close(&self, slug: &str) {
        match self.reset(slug).await {
            Ok(()) => tracing::info!(retailer = slug, "circuit breaker closed after successful crawl"),
            Err(e) => tracing::warn!(retailer = slug, error = %e, "failed to close circuit"),
        }
    }
}

#[async_trait]
impl Reactor for CircuitBreakerReactor {
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    async fn on_outcome(&self, outcome: &CrawlOutcome) {
        let seen_key = format!("seen:{}:{}", self.name(), outcome.event_id);
        match mark_seen(self.store.as_ref(), &seen_key, self.config.window).await {
            Ok(false) => return,
            Ok(true) => {}
            Err(e) => tracing::warn!(error = %e, "idempotency check failed; recording anyway"),
        }

        let window = match self.append(outcome).await {
            Ok(window) => window,
            Err(e) => {
                tracing::warn!(
                    retailer = %outcome.retailer,
                    error = %e,
                    "circuit window update failed; leaving breaker unchanged"
                );
                return;
            }
        };

        let slug = outcome.retailer.as_str();
        if outcome.success {
            if self.is_tripped(slug).await {
                self.close(slug).await;
            }
            return;
        }

        let (failures, rate) = failure_rate(&window);
        tracing::debug!(
            retailer = slug,
            samples = window.len(),
            failures,
            failure_rate = rate,
            "circuit window evaluated"
        );
        if window.len() >= self.config.min_samples
            && rate >= self.config.failure_threshold
            && !self.is_open(slug).await
        {
            self.open(outcome, failures, window.len()).await;
        }
    }
}

#[cfg(test)]
#[path = "circuit_breaker_test.rs"]
mod tests;
