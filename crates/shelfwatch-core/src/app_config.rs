use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    /// Postgres URL. When absent the CLI runs against in-memory stores.
    pub database_url: Option<String>,
    pub env: Environment,
    pub log_level: String,
    pub retailers_path: PathBuf,
    /// Chat webhook for operator alerts. Alerts are only logged when absent.
    pub alert_webhook_url: Option<String>,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub scraper_request_timeout_secs: u64,
    pub scraper_user_agent: String,
    pub scraper_max_concurrent_retailers: usize,
    /// Default courtesy delay after each crawl; retailers may override it.
    pub scraper_inter_request_delay_ms: u64,
    /// Overall timeout for one crawl attempt (fetch + extraction).
    pub job_timeout_secs: u64,
    /// Total attempts per logical crawl, including the first.
    pub job_max_attempts: u32,
    /// Fixed delay between attempts.
    pub job_retry_backoff_secs: u64,
    /// Failure rate in `(0, 1]` at or above which the breaker opens.
    pub circuit_failure_threshold: f64,
    pub circuit_min_samples: usize,
    pub circuit_window_mins: i64,
    pub circuit_cooldown_mins: i64,
    pub health_window_hours: i64,
    pub failure_alert_threshold: u32,
    pub failure_alert_window_mins: i64,
    /// Drop percentage at or above which operators are alerted.
    pub price_drop_alert_percent: f64,
    pub price_alert_cooldown_hours: i64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("log_level", &self.log_level)
            .field("retailers_path", &self.retailers_path)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[redacted]"),
            )
            .field(
                "alert_webhook_url",
                &self.alert_webhook_url.as_ref().map(|_| "[redacted]"),
            )
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field(
                "scraper_request_timeout_secs",
                &self.scraper_request_timeout_secs,
            )
            .field("scraper_user_agent", &self.scraper_user_agent)
            .field(
                "scraper_max_concurrent_retailers",
                &self.scraper_max_concurrent_retailers,
            )
            .field(
                "scraper_inter_request_delay_ms",
                &self.scraper_inter_request_delay_ms,
            )
            .field("job_timeout_secs", &self.job_timeout_secs)
            .field("job_max_attempts", &self.job_max_attempts)
            .field("job_retry_backoff_secs", &self.job_retry_backoff_secs)
            .field("circuit_failure_threshold", &self.circuit_failure_threshold)
            .field("circuit_min_samples", &self.circuit_min_samples)
            .field("circuit_window_mins", &self.circuit_window_mins)
            .field("circuit_cooldown_mins", &self.circuit_cooldown_mins)
            .field("health_window_hours", &self.health_window_hours)
            .field("failure_alert_threshold", &self.failure_alert_threshold)
            .field("failure_alert_window_mins", &self.failure_alert_window_mins)
            .field("price_drop_alert_percent", &self.price_drop_alert_percent)
            .field(
                "price_alert_cooldown_hours",
                &self.price_alert_cooldown_hours,
            )
            .finish()
    }
}
