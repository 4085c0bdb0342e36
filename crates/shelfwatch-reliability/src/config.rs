use chrono::TimeDelta;
use shelfwatch_core::AppConfig;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::failure_alert::FailureAlertConfig;
use crate::health::HealthConfig;
use crate::price_drop::PriceDropConfig;

/// Tuning for every reactor, derived from [`AppConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ReliabilityConfig {
    pub circuit: CircuitBreakerConfig,
    pub health: HealthConfig,
    pub failure_alert: FailureAlertConfig,
    pub price_drop: PriceDropConfig,
}

impl ReliabilityConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            circuit: CircuitBreakerConfig {
                window: TimeDelta::minutes(config.circuit_window_mins),
                failure_threshold: config.circuit_failure_threshold,
                min_samples: config.circuit_min_samples,
                cooldown: TimeDelta::minutes(config.circuit_cooldown_mins),
            },
            health: HealthConfig {
                window: TimeDelta::hours(config.health_window_hours),
            },
            failure_alert: FailureAlertConfig {
                threshold: config.failure_alert_threshold,
                window: TimeDelta::minutes(config.failure_alert_window_mins),
            },
            price_drop: PriceDropConfig {
                global_threshold_percent: config.price_drop_alert_percent,
                cooldown: TimeDelta::hours(config.price_alert_cooldown_hours),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use shelfwatch_core::Environment;

    use super::*;

    fn app_config() -> AppConfig {
        AppConfig {
            database_url: None,
            env: Environment::Test,
            log_level: "info".to_owned(),
            retailers_path: PathBuf::from("./config/retailers.yaml"),
            alert_webhook_url: None,
            db_max_connections: 10,
            db_min_connections: 1,
            db_acquire_timeout_secs: 10,
            scraper_request_timeout_secs: 30,
            scraper_user_agent: "shelfwatch/0.1".to_owned(),
            scraper_max_concurrent_retailers: 4,
            scraper_inter_request_delay_ms: 500,
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
    fn stock_settings_match_reactor_defaults() {
        assert_eq!(
            ReliabilityConfig::from_app_config(&app_config()),
            ReliabilityConfig::default()
        );
    }

    #[test]
    fn overrides_flow_into_each_reactor() {
        let mut app = app_config();
        app.circuit_min_samples = 5;
        app.circuit_cooldown_mins = 10;
        app.health_window_hours = 6;
        app.failure_alert_threshold = 1;
        app.price_drop_alert_percent = 12.5;

        let config = ReliabilityConfig::from_app_config(&app);
        assert_eq!(config.circuit.min_samples, 5);
        assert_eq!(config.circuit.cooldown, TimeDelta::minutes(10));
        assert_eq!(config.health.window, TimeDelta::hours(6));
        assert_eq!(config.failure_alert.threshold, 1);
        assert!((config.price_drop.global_threshold_percent - 12.5).abs() < f64::EPSILON);
    }
}
