use serde_json::Map;

use super::*;
use crate::clock::ManualClock;
use crate::notify::MemorySink;
use crate::registry::MemoryRetailerRegistry;
use crate::store::MemoryStore;

const SLUG: &str = "bm";

struct Harness {
    clock: Arc<ManualClock>,
    registry: Arc<MemoryRetailerRegistry>,
    sink: Arc<MemorySink>,
    breaker: CircuitBreakerReactor,
}

async fn harness() -> Harness {
    let start = DateTime::parse_from_rfc3339("2026-03-01T09:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let clock = Arc::new(ManualClock::new(start));
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let registry = Arc::new(MemoryRetailerRegistry::new());
    registry.register(SLUG).await;
    let sink = Arc::new(MemorySink::new());
    let breaker = CircuitBreakerReactor::new(
        store,
        registry.clone(),
        clock.clone(),
        CircuitBreakerConfig::default(),
    )
    .with_sink(sink.clone());
    Harness {
        clock,
        registry,
        sink,
        breaker,
    }
}

fn outcome(clock: &ManualClock, success: bool) -> CrawlOutcome {
    CrawlOutcome {
        event_id: Uuid::new_v4(),
        crawl_id: Uuid::new_v4(),
        retailer: SLUG.to_owned(),
        retailer_name: "B&M".to_owned(),
        url: "https://www.bmstores.example/c/pets".to_owned(),
        success,
        occurred_at: clock.now(),
        duration_seconds: None,
        reason: (!success).then(|| "HTTP 503".to_owned()),
        context: Map::new(),
    }
}

impl Harness {
    async fn record(&self, success: bool) {
        self.breaker.on_outcome(&outcome(&self.clock, success)).await;
        self.clock.advance(TimeDelta::minutes(1));
    }

    async fn status(&self) -> Option<RetailerStatus> {
        self.registry.status(SLUG).await.unwrap()
    }
}

#[tokio::test]
async fn opens_at_threshold_then_closes_on_success() {
    let h = harness().await;
    h.record(true).await;
    h.record(true).await;
    h.record(false).await;
    assert!(!h.breaker.is_open(SLUG).await, "1 of 3 failed; must stay closed");
    h.record(false).await;

    assert!(h.breaker.is_open(SLUG).await);
    assert_eq!(h.status().await, Some(RetailerStatus::CircuitOpen));
    let snapshot = h.breaker.snapshot(SLUG).await.unwrap();
    assert_eq!(snapshot.samples, 4);
    assert_eq!(snapshot.failures, 2);
    assert!((snapshot.failure_rate - 0.5).abs() < f64::EPSILON);
    assert!(snapshot.cooldown_until.is_some());

    h.record(true).await;
    assert!(!h.breaker.is_open(SLUG).await);
    assert_eq!(h.status().await, Some(RetailerStatus::Active));
    let snapshot = h.breaker.snapshot(SLUG).await.unwrap();
    assert_eq!(snapshot.samples, 0);
    assert_eq!(snapshot.cooldown_until, None);
}

#[tokio::test]
async fn stays_closed_below_sample_floor() {
    let h = harness().await;
    h.record(false).await;
    h.record(false).await;
    assert!(!h.breaker.is_open(SLUG).await);
    assert_eq!(h.status().await, Some(RetailerStatus::Active));
}

#[tokio::test]
async fn opening_is_idempotent_and_alerts_once() {
    let h = harness().await;
    for _ in 0..5 {
        h.record(false).await;
    }
    assert!(h.breaker.is_open(SLUG).await);
    let alerts = h.sink.sent().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, Severity::Warning);
    assert_eq!(alerts[0].context["retailer"], SLUG);
}

#[tokio::test]
async fn outcomes_outside_window_do_not_count() {
    let h = harness().await;
    h.record(false).await;
    h.record(false).await;
    h.clock.advance(TimeDelta::minutes(61));
    h.record(false).await;
    assert!(!h.breaker.is_open(SLUG).await);
    assert_eq!(h.breaker.snapshot(SLUG).await.unwrap().samples, 1);
}

#[tokio::test]
async fn replayed_failure_is_not_double_counted() {
    let h = harness().await;
    let failure = outcome(&h.clock, false);
    h.record(true).await;
    for _ in 0..3 {
        h.breaker.on_outcome(&failure).await;
    }
    assert!(!h.breaker.is_open(SLUG).await);
    assert_eq!(h.breaker.snapshot(SLUG).await.unwrap().samples, 2);
}

#[tokio::test]
async fn cooldown_expires_flag_but_not_status() {
    let h = harness().await;
    for _ in 0..3 {
        h.record(false).await;
    }
    assert!(h.breaker.is_open(SLUG).await);
    h.clock.advance(TimeDelta::minutes(31));
    assert!(!h.breaker.is_open(SLUG).await);
    assert!(h.breaker.is_tripped(SLUG).await);
    assert_eq!(h.status().await, Some(RetailerStatus::CircuitOpen));
}

#[tokio::test]
async fn success_after_cooldown_closes_and_restores_status() {
    let h = harness().await;
    for _ in 0..3 {
        h.record(false).await;
    }
    h.clock.advance(TimeDelta::minutes(31));
    assert!(!h.breaker.is_open(SLUG).await);

    h.record(true).await;

    assert_eq!(h.status().await, Some(RetailerStatus::Active));
    assert!(!h.breaker.is_tripped(SLUG).await);
    let snapshot = h.breaker.snapshot(SLUG).await.unwrap();
    assert_eq!(snapshot.samples, 0);
    assert_eq!(snapshot.cooldown_until, None);
}

#[tokio::test]
async fn failed_trial_after_cooldown_rearms_the_flag() {
    let h = harness().await;
    for _ in 0..3 {
        h.record(false).await;
    }
    h.clock.advance(TimeDelta::minutes(31));

    h.record(false).await;

    assert!(h.breaker.is_open(SLUG).await);
    assert_eq!(h.status().await, Some(RetailerStatus::CircuitOpen));
}

#[tokio::test]
async fn manual_reset_clears_state_and_restores_status() {
    let h = harness().await;
    for _ in 0..3 {
        h.record(false).await;
    }
    h.breaker.reset(SLUG).await.unwrap();
    assert!(!h.breaker.is_open(SLUG).await);
    assert_eq!(h.status().await, Some(RetailerStatus::Active));
    assert_eq!(h.breaker.snapshot(SLUG).await.unwrap().samples, 0);
}

#[tokio::test]
async fn reset_leaves_operator_pause_alone() {
    let h = harness().await;
    h.registry
        .set_status(SLUG, RetailerStatus::Paused)
        .await
        .unwrap();
    h.breaker.reset(SLUG).await.unwrap();
    assert_eq!(h.status().await, Some(RetailerStatus::Paused));
}
