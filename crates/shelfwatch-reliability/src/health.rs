//! Long-horizon retailer health, separate from the circuit breaker's short
//! window.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::dispatch::{CrawlOutcome, Reactor};
use crate::registry::RetailerRegistry;
use crate::store::{get_json, mark_seen, put_json, update_json, KvStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthConfig {
    pub window: TimeDelta,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window: TimeDelta::hours(24),
        }
    }
}

/// One crawl outcome inside the health window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub event_id: uuid::Uuid,
    pub success: bool,
    pub duration_seconds: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetailerHealth {
    /// Percentage, rounded to 2 decimal places.
    pub success_rate: f64,
    pub total_crawls: u32,
    pub successful_crawls: u32,
    pub failed_crawls: u32,
    /// Mean over samples that have a duration; `None` when none do.
    pub avg_duration_seconds: Option<f64>,
    pub last_successful_crawl: Option<DateTime<Utc>>,
    pub computed_at: DateTime<Utc>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Metrics over `samples`, which must be in chronological order.
#[must_use]
pub fn compute_health(samples: &[HealthSample], now: DateTime<Utc>) -> RetailerHealth {
    let total = count(samples.len());
    let successful = count(samples.iter().filter(|s| s.success).count());

    let success_rate = if total == 0 {
        0.0
    } else {
        round2(f64::from(successful) / f64::from(total) * 100.0)
    };

    let durations: Vec<f64> = samples.iter().filter_map(|s| s.duration_seconds).collect();
    let avg_duration_seconds = if durations.is_empty() {
        None
    } else {
        Some(round2(
            durations.iter().sum::<f64>() / f64::from(count(durations.len())),
        ))
    };

    let last_successful_crawl = samples
        .iter()
        .rev()
        .find(|s| s.success)
        .map(|s| s.timestamp);

    RetailerHealth {
        success_rate,
        total_crawls: total,
        successful_crawls: successful,
        failed_crawls: total - successful,
        avg_duration_seconds,
        last_successful_crawl,
        computed_at: now,
    }
}

fn window_key(slug: &str) -> String {
    format!("health:{slug}:window")
}

fn metrics_key(slug: &str) -> String {
    format!("health:{slug}:metrics")
}

/// Keeps a 24 h window of outcomes per retailer and republishes the metrics
/// on every event.
pub struct UpdateRetailerHealthReactor {
    store: Arc<dyn KvStore>,
    registry: Arc<dyn RetailerRegistry>,
    clock: Arc<dyn Clock>,
    config: HealthConfig,
}

impl std::fmt::Debug for UpdateRetailerHealthReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateRetailerHealthReactor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl UpdateRetailerHealthReactor {
    #[must_use]
    pub fn new(
        store: Arc<dyn KvStore>,
        registry: Arc<dyn RetailerRegistry>,
        clock: Arc<dyn Clock>,
        config: HealthConfig,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            config,
        }
    }

    /// Last published metrics for `slug`, if any.
    pub async fn health(&self, slug: &str) -> Option<RetailerHealth> {
        match get_json(self.store.as_ref(), &metrics_key(slug)).await {
            Ok(health) => health,
            Err(e) => {
                tracing::warn!(retailer = slug, error = %e, "health metrics read failed");
                None
            }
        }
    }

    async fn record(&self, outcome: &CrawlOutcome) -> Option<RetailerHealth> {
        let now = self.clock.now();
        let cutoff = now - self.config.window;
        let sample = HealthSample {
            event_id: outcome.event_id,
            success: outcome.success,
            duration_seconds: outcome.duration_seconds,
            timestamp: outcome.occurred_at,
        };

        let window = update_json::<Vec<HealthSample>, _>(
            self.store.as_ref(),
            &window_key(&outcome.retailer),
            Some(self.config.window),
            move |window| {
                let mut window: Vec<HealthSample> = window
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|s| s.timestamp >= cutoff)
                    .collect();
                if sample.timestamp >= cutoff {
                    let at = window.partition_point(|s| s.timestamp <= sample.timestamp);
                    window.insert(at, sample.clone());
                }
                Some(window)
            },
        )
        .await;

        match window {
            Ok(window) => Some(compute_health(&window.unwrap_or_default(), now)),
            Err(e) => {
                tracing::warn!(
                    retailer = %outcome.retailer,
                    error = %e,
                    "health window update failed; skipping metrics"
                );
                None
            }
        }
    }
}

#[async_trait]
impl Reactor for UpdateRetailerHealthReactor {
    fn name(&self) -> &'static str {
        "retailer_health"
    }

    async fn on_outcome(&self, outcome: &CrawlOutcome) {
        let seen_key = format!("seen:{}:{}", self.name(), outcome.event_id);
        match mark_seen(self.store.as_ref(), &seen_key, self.config.window).await {
            Ok(false) => {
                tracing::debug!(event_id = %outcome.event_id, "health already recorded event");
                return;
            }
            Ok(true) => {}
            Err(e) => tracing::warn!(error = %e, "idempotency check failed; recording anyway"),
        }

        let Some(health) = self.record(outcome).await else {
            return;
        };

        if let Err(e) = put_json(
            self.store.as_ref(),
            &metrics_key(&outcome.retailer),
            &health,
            None,
        )
        .await
        {
            tracing::warn!(retailer = %outcome.retailer, error = %e, "health metrics write failed");
        }
        if let Err(e) = self
            .registry
            .update_health(&outcome.retailer, &health)
            .await
        {
            tracing::warn!(retailer = %outcome.retailer, error = %e, "registry health update failed");
        }

        tracing::info!(
            retailer = %outcome.retailer,
            success_rate = health.success_rate,
            total_crawls = health.total_crawls,
            "retailer health updated"
        );
    }
}

#[cfg(test)]
#[path = "health_test.rs"]
mod tests;
