//! Live integration tests for shelfwatch-db using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated Postgres database spun up by the
//! sqlx test harness, so `DATABASE_URL` must point at a server the tests may
//! create databases on. Run with `cargo test -p shelfwatch-db -- --ignored`.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use serde_json::{json, Map};
use shelfwatch_db::{
    insert_price_alert, list_retailers, PgEventLog, PgKvStore, PgPriceAlertRepository,
    PgRetailerRegistry,
};
use shelfwatch_reliability::{
    mark_seen, update_json, CrawlAggregate, CrawlEvent, EventLog, KvStore, PriceAlert,
    PriceAlertRepository, RetailerRegistry, RetailerStatus, StoreError, SystemClock,
};
use uuid::Uuid;

fn finished_crawl() -> CrawlAggregate {
    let mut crawl = CrawlAggregate::new(Arc::new(SystemClock));
    crawl
        .start_crawl(
            "https://www.zooplus.example/shop/dogs",
            "zooplus",
            "Zooplus",
            Map::new(),
        )
        .unwrap();
    crawl.complete_crawl(Map::new()).unwrap();
    crawl
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn event_log_appends_idempotently_and_replays(pool: sqlx::PgPool) {
    let log = PgEventLog::new(pool);
    let mut crawl = finished_crawl();
    let events = crawl.take_uncommitted();

    log.append(&events).await.unwrap();
    log.append(&events).await.unwrap();

    let stored = log.events_for(crawl.id()).await.unwrap();
    assert_eq!(stored.len(), events.len());
    for (stored, original) in stored.iter().zip(&events) {
        assert_eq!(stored.event_id, original.event_id);
        assert_eq!(stored.sequence, original.sequence);
        assert_eq!(stored.event, original.event);
    }

    let start = log
        .first_of_kind(crawl.id(), CrawlEvent::STARTED)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(start.sequence, 1);

    let replayed = CrawlAggregate::replay(crawl.id(), &stored, Arc::new(SystemClock)).unwrap();
    assert_eq!(replayed.state(), crawl.state());
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn event_log_rejects_occupied_sequence(pool: sqlx::PgPool) {
    let log = PgEventLog::new(pool);
    let mut crawl = finished_crawl();
    let events = crawl.take_uncommitted();
    log.append(&events[..1]).await.unwrap();

    let mut rogue = events[0].clone();
    rogue.event_id = Uuid::new_v4();
    let err = log.append(&[events[1].clone(), rogue]).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict { sequence: 1, .. }));

    // The whole batch rolled back.
    assert_eq!(log.events_for(crawl.id()).await.unwrap().len(), 1);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn kv_store_update_and_expiry(pool: sqlx::PgPool) {
    let store = PgKvStore::new(pool);

    store.put("k", json!(1), None).await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), Some(json!(1)));

    let written = update_json::<i64, _>(&store, "k", None, |n| Some(n.unwrap_or(0) + 1))
        .await
        .unwrap();
    assert_eq!(written, Some(2));

    store
        .put("gone", json!(true), Some(TimeDelta::milliseconds(-1)))
        .await
        .unwrap();
    assert_eq!(store.get("gone").await.unwrap(), None);
    assert!(store.purge_expired().await.unwrap() >= 1);

    assert!(mark_seen(&store, "seen:x", TimeDelta::minutes(5)).await.unwrap());
    assert!(!mark_seen(&store, "seen:x", TimeDelta::minutes(5)).await.unwrap());

    store.forget("k").await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), None);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn kv_store_concurrent_updates_do_not_lose_writes(pool: sqlx::PgPool) {
    let store = Arc::new(PgKvStore::new(pool));
    let mut handles = Vec::new();
    for _ in 0..10 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            update_json::<i64, _>(store.as_ref(), "counter", None, |n| {
                Some(n.unwrap_or(0) + 1)
            })
            .await
            .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(store.get("counter").await.unwrap(), Some(json!(10)));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn registry_tracks_status(pool: sqlx::PgPool) {
    let registry = PgRetailerRegistry::new(pool.clone());
    assert_eq!(registry.status("bm").await.unwrap(), None);

    registry
        .set_status("bm", RetailerStatus::CircuitOpen)
        .await
        .unwrap();
    assert_eq!(
        registry.status("bm").await.unwrap(),
        Some(RetailerStatus::CircuitOpen)
    );

    let rows = list_retailers(&pool).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].slug, "bm");
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn price_alerts_filter_inactive_and_stamp_notification(pool: sqlx::PgPool) {
    let repo = PgPriceAlertRepository::new(pool.clone());
    let live = PriceAlert {
        id: Uuid::new_v4(),
        user_id: "user-a".to_string(),
        listing_id: "lst-1".to_string(),
        target_price_pence: 900,
        active: true,
        last_notified_at: None,
    };
    let paused = PriceAlert {
        id: Uuid::new_v4(),
        active: false,
        ..live.clone()
    };
    insert_price_alert(&pool, &live).await.unwrap();
    insert_price_alert(&pool, &paused).await.unwrap();

    let alerts = repo.active_alerts_for_listing("lst-1").await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].id, live.id);

    let now = Utc::now();
    repo.mark_notified(live.id, now).await.unwrap();
    let alerts = repo.active_alerts_for_listing("lst-1").await.unwrap();
    let stamped = alerts[0].last_notified_at.unwrap();
    assert!((stamped - now).num_milliseconds().abs() < 1);
}
