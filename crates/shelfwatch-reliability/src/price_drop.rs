//! Price-drop detection and alerting.
//!
//! The operator alert and per-user alerts are independent: a drop below the
//! global threshold can still satisfy an individual user's target price.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::notify::{Notification, NotificationSink, Severity};
use crate::store::{mark_seen, update_json, KvStore};

/// Percentage drop from `old_pence` to `new_pence`, rounded to 2 decimal
/// places. Zero when the price rose, stayed the same or `old_pence <= 0`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn drop_percentage(old_pence: i64, new_pence: i64) -> f64 {
    if old_pence <= 0 || new_pence >= old_pence {
        return 0.0;
    }
    let pct = (old_pence - new_pence) as f64 / old_pence as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

/// A listing's price went down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingPriceDropped {
    pub event_id: Uuid,
    pub listing_id: String,
    /// Retailer slug.
    pub retailer: String,
    pub title: String,
    pub previous_price_pence: i64,
    pub new_price_pence: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Returns a drop event only when both prices are resolved (`> 0`) and the
/// new one is strictly lower.
#[must_use]
pub fn detect_price_change(
    listing_id: &str,
    retailer: &str,
    title: &str,
    previous_pence: i64,
    current_pence: i64,
    now: DateTime<Utc>,
) -> Option<ListingPriceDropped> {
    if previous_pence <= 0 || current_pence <= 0 || current_pence >= previous_pence {
        return None;
    }
    Some(ListingPriceDropped {
        event_id: Uuid::new_v4(),
        listing_id: listing_id.to_owned(),
        retailer: retailer.to_owned(),
        title: title.to_owned(),
        previous_price_pence: previous_pence,
        new_price_pence: current_pence,
        occurred_at: now,
    })
}

/// How long a last-seen price is remembered between crawls.
pub const PRICE_MEMORY: TimeDelta = TimeDelta::days(30);

/// Swaps in `current_pence` as the last-seen price of `listing_id` and
/// reports a drop against the previous value. Unresolved prices (`0`) never
/// overwrite a known one.
///
/// # Errors
///
/// Returns [`StoreError`] if the store update fails.
pub async fn track_price(
    store: &dyn KvStore,
    retailer: &str,
    listing_id: &str,
    title: &str,
    current_pence: i64,
    now: DateTime<Utc>,
) -> Result<Option<ListingPriceDropped>, StoreError> {
    if current_pence <= 0 {
        return Ok(None);
    }
    let key = format!("price:{retailer}:{listing_id}");
    let previous = Arc::new(std::sync::Mutex::new(None::<i64>));
    let captured = Arc::clone(&previous);
    update_json::<i64, _>(store, &key, Some(PRICE_MEMORY), move |last| {
        if let Ok(mut slot) = captured.lock() {
            *slot = last;
        }
        Some(current_pence)
    })
    .await?;

    let previous = previous.lock().ok().and_then(|slot| *slot);
    Ok(previous.and_then(|prev| {
        detect_price_change(listing_id, retailer, title, prev, current_pence, now)
    }))
}

/// A user's standing request to hear about a listing reaching a price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceAlert {
    pub id: Uuid,
    pub user_id: String,
    pub listing_id: String,
    pub target_price_pence: i64,
    pub active: bool,
    pub last_notified_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait PriceAlertRepository: Send + Sync {
    /// Active alerts on any product linked to `listing_id`.
    async fn active_alerts_for_listing(&self, listing_id: &str)
        -> Result<Vec<PriceAlert>, StoreError>;

    async fn mark_notified(&self, alert_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryPriceAlertRepository {
    alerts: Mutex<Vec<PriceAlert>>,
}

impl MemoryPriceAlertRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, alert: PriceAlert) {
        self.alerts.lock().await.push(alert);
    }

    pub async fn get(&self, alert_id: Uuid) -> Option<PriceAlert> {
        self.alerts
            .lock()
            .await
            .iter()
            .find(|a| a.id == alert_id)
            .cloned()
    }
}

#[async_trait]
impl PriceAlertRepository for MemoryPriceAlertRepository {
    async fn active_alerts_for_listing(
        &self,
        listing_id: &str,
    ) -> Result<Vec<PriceAlert>, StoreError> {
        Ok(self
            .alerts
            .lock()
            .await
            .iter()
            .filter(|a| a.active && a.listing_id == listing_id)
            .cloned()
            .collect())
    }

    async fn mark_notified(&self, alert_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(alert) = self
            .alerts
            .lock()
            .await
            .iter_mut()
            .find(|a| a.id == alert_id)
        {
            alert.last_notified_at = Some(at);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceDropConfig {
    /// Drop percentage at or above which operators are alerted.
    pub global_threshold_percent: f64,
    /// Minimum gap between two notifications for the same user alert.
    pub cooldown: TimeDelta,
}

impl Default for PriceDropConfig {
    fn default() -> Self {
        Self {
            global_threshold_percent: 20.0,
            cooldown: TimeDelta::hours(24),
        }
    }
}

/// What one price-drop event caused.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PriceDropSummary {
    pub drop_percentage: f64,
    pub operator_alerted: bool,
    pub users_notified: usize,
}

fn format_pence(pence: i64) -> String {
    format!("£{}.{:02}", pence / 100, pence % 100)
}

pub struct PriceDropReactor {
    alerts: Arc<dyn PriceAlertRepository>,
    sink: Arc<dyn NotificationSink>,
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    config: PriceDropConfig,
}

impl std::fmt::Debug for PriceDropReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceDropReactor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PriceDropReactor {
    #[must_use]
    pub fn new(
        store: Arc<dyn KvStore>,
        alerts: Arc<dyn PriceAlertRepository>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        config: PriceDropConfig,
    ) -> Self {
        Self {
            alerts,
            sink,
            store,
            clock,
            config,
        }
    }

    fn cooldown_elapsed(&self, alert: &PriceAlert, now: DateTime<Utc>) -> bool {
        alert
            .last_notified_at
            .is_none_or(|last| now - last >= self.config.cooldown)
    }

    pub async fn on_price_drop(&self, event: &ListingPriceDropped) -> PriceDropSummary {
        let pct = drop_percentage(event.previous_price_pence, event.new_price_pence);
        let mut summary = PriceDropSummary {
            drop_percentage: pct,
            ..PriceDropSummary::default()
        };
        if event.new_price_pence >= event.previous_price_pence {
            tracing::debug!(listing_id = %event.listing_id, "price did not drop; ignoring");
            return summary;
        }

        let seen_key = format!("seen:price_drop:{}", event.event_id);
        match mark_seen(self.store.as_ref(), &seen_key, self.config.cooldown).await {
            Ok(false) => return summary,
            Ok(true) => {}
            Err(e) => tracing::warn!(error = %e, "idempotency check failed; alerting anyway"),
        }

        let now = self.clock.now();
        let prices = format!(
            "{} → {}",
            format_pence(event.previous_price_pence),
            format_pence(event.new_price_pence)
        );

        if pct >= self.config.global_threshold_percent {
            let notification = Notification::operator(
                Severity::Warning,
                format!("Price drop {pct:.2}%: {}", event.title),
                format!("{} at {}: {prices}", event.title, event.retailer),
            )
            .with_context("listing_id", event.listing_id.as_str())
            .with_context("retailer", event.retailer.as_str())
            .with_context("drop_percentage", pct);
            self.sink.send(&notification).await;
            summary.operator_alerted = true;
        }

        let alerts = match self.alerts.active_alerts_for_listing(&event.listing_id).await {
            Ok(alerts) => alerts,
            Err(e) => {
                tracing::warn!(
                    listing_id = %event.listing_id,
                    error = %e,
                    "price alert lookup failed; skipping user notifications"
                );
                return summary;
            }
        };

        for alert in alerts {
            if alert.target_price_pence < event.new_price_pence || !self.cooldown_elapsed(&alert, now) {
                continue;
            }
            let notification = Notification::user(
                &alert.user_id,
                format!("{} is now {}", event.title, format_pence(event.new_price_pence)),
                format!(
                    "Your target was {}. Price at {}: {prices}",
                    format_pence(alert.target_price_pence),
                    event.retailer
                ),
            )
            .with_context("alert_id", alert.id.to_string())
            .with_context("listing_id", event.listing_id.as_str());
            self.sink.send(&notification).await;
            summary.users_notified += 1;

            if let Err(e) = self.alerts.mark_notified(alert.id, now).await {
                tracing::warn!(alert_id = %alert.id, error = %e, "failed to stamp price alert");
            }
        }

        tracing::info!(
            listing_id = %event.listing_id,
            drop_percentage = pct,
            operator_alerted = summary.operator_alerted,
            users_notified = summary.users_notified,
            "price drop processed"
        );
        summary
    }
}

#[cfg(test)]
#[path = "price_drop_test.rs"]
mod tests;
