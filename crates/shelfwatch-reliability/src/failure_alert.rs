use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeDelta;
use serde_json::Value;

use crate::dispatch::{CrawlOutcome, Reactor};
use crate::notify::{Notification, NotificationSink, Severity};
use crate::store::{get_json, mark_seen, update_json, KvStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureAlertConfig {
    /// Failures within the window at which alerts start.
    pub threshold: u32,
    /// Counter TTL, refreshed by every failure.
    pub window: TimeDelta,
}

impl Default for FailureAlertConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            window: TimeDelta::minutes(60),
        }
    }
}

fn counter_key(slug: &str) -> String {
    format!("failures:{slug}")
}

/// Counts failures per retailer and raises a critical operator alert once
/// the count reaches the threshold. Independent of the circuit breaker.
pub struct NotifyCrawlFailureReactor {
    store: Arc<dyn KvStore>,
    sink: Arc<dyn NotificationSink>,
    config: FailureAlertConfig,
}

impl std::fmt::Debug for NotifyCrawlFailureReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyCrawlFailureReactor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl NotifyCrawlFailureReactor {
    #[must_use]
    pub fn new(
        store: Arc<dyn KvStore>,
        sink: Arc<dyn NotificationSink>,
        config: FailureAlertConfig,
    ) -> Self {
        Self {
            store,
            sink,
            config,
        }
    }

    /// Failures currently counted for `slug`.
    pub async fn failure_count(&self, slug: &str) -> u32 {
        get_json::<u32>(self.store.as_ref(), &counter_key(slug))
            .await
            .ok()
            .flatten()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Reactor for NotifyCrawlFailureReactor {
    fn name(&self) -> &'static str {
        "crawl_failure_alert"
    }

    async fn on_outcome(&self, outcome: &CrawlOutcome) {
        if outcome.success {
            return;
        }

        let seen_key = format!("seen:{}:{}", self.name(), outcome.event_id);
        match mark_seen(self.store.as_ref(), &seen_key, self.config.window).await {
            Ok(false) => return,
            Ok(true) => {}
            Err(e) => tracing::warn!(error = %e, "idempotency check failed; counting anyway"),
        }

        let count = match update_json::<u32, _>(
            self.store.as_ref(),
            &counter_key(&outcome.retailer),
            Some(self.config.window),
            |count| Some(count.unwrap_or(0).saturating_add(1)),
        )
        .await
        {
            Ok(count) => count.unwrap_or(0),
            Err(e) => {
                tracing::warn!(
                    retailer = %outcome.retailer,
                    error = %e,
                    "failure counter update failed; no alert raised"
                );
                return;
            }
        };

        if count < self.config.threshold {
            tracing::debug!(retailer = %outcome.retailer, count, "crawl failure counted");
            return;
        }

        let reason = outcome.reason.as_deref().unwrap_or("unknown error");
        tracing::error!(
            retailer = %outcome.retailer,
            count,
            reason,
            "repeated crawl failures"
        );
        let notification = Notification::operator(
            Severity::Critical,
            format!("{} crawls failing", outcome.retailer_name),
            format!(
                "{count} crawl failures in the last {} minutes. Latest: {reason}",
                self.config.window.num_minutes()
            ),
        )
        .with_context("retailer", outcome.retailer.as_str())
        .with_context("crawl_id", outcome.crawl_id.to_string())
        .with_context("url", outcome.url.as_str())
        .with_context("failure_count", count)
        .with_context("failure_context", Value::Object(outcome.context.clone()));
        self.sink.send(&notification).await;
    }
}
