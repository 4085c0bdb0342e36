//! Offline tests for shelfwatch-db configuration and row types.
//! These tests do not require a live database connection.

use std::path::PathBuf;

use chrono::Utc;
use serde_json::json;
use shelfwatch_core::{AppConfig, Environment};
use shelfwatch_db::{PoolConfig, RetailerRow};
use shelfwatch_reliability::RetailerStatus;

fn app_config() -> AppConfig {
    AppConfig {
        database_url: Some("postgres://example".to_string()),
        env: Environment::Test,
        log_level: "info".to_string(),
        retailers_path: PathBuf::from("./config/retailers.yaml"),
        alert_webhook_url: None,
        db_max_connections: 42,
        db_min_connections: 7,
        db_acquire_timeout_secs: 9,
        scraper_request_timeout_secs: 30,
        scraper_user_agent: "ua".to_string(),
        scraper_max_concurrent_retailers: 1,
        scraper_inter_request_delay_ms: 250,
        job_timeout_secs: 120,
        job_max_attempts: 3,
        job_retry_backoff_secs: 5,
        circuit_failure_threshold: 0.5,
        circuit_min_samples: 3,
        circuit_window_mins: 60,
        circuit_cooldown_mins: 30,
        health_window_hours: 24,
        failure_alert_threshold: 3,
        failure_alert_window_mins: 60,
        price_drop_alert_percent: 20.0,
        price_alert_cooldown_hours: 24,
    }
}

#[test]
fn pool_config_from_app_config_uses_core_values() {
    let pool_config = PoolConfig::from_app_config(&app_config());
    assert_eq!(pool_config.max_connections, 42);
    assert_eq!(pool_config.min_connections, 7);
    assert_eq!(pool_config.acquire_timeout_secs, 9);
}

fn retailer_row(status: &str, health: Option<serde_json::Value>) -> RetailerRow {
    RetailerRow {
        slug: "zooplus".to_string(),
        name: Some("Zooplus".to_string()),
        base_url: Some("https://www.zooplus.example".to_string()),
        status: status.to_string(),
        health,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[test]
fn retailer_row_parses_status() {
    assert_eq!(
        retailer_row("circuit_open", None).status(),
        Ok(RetailerStatus::CircuitOpen)
    );
    assert!(retailer_row("disabled", None).status().is_err());
}

#[test]
fn retailer_row_decodes_health_json() {
    let row = retailer_row(
        "active",
        Some(json!({
            "success_rate": 75.0,
            "total_crawls": 4,
            "successful_crawls": 3,
            "failed_crawls": 1,
            "avg_duration_seconds": 12.5,
            "last_successful_crawl": "2026-03-01T09:00:00Z",
            "computed_at": "2026-03-01T10:00:00Z"
        })),
    );
    let health = row.health().expect("health should decode");
    assert_eq!(health.total_crawls, 4);
    assert_eq!(health.avg_duration_seconds, Some(12.5));

    assert!(retailer_row("active", Some(json!({"bogus": true})))
        .health()
        .is_none());
}
