use std::fmt::Display;
use std::str::FromStr;

use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if a value is present but invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if a value is present but invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the real environment so it can be tested with a plain
/// `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::path::PathBuf;

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let optional = |var: &str| -> Option<String> { lookup(var).ok().filter(|v| !v.is_empty()) };

    let database_url = optional("DATABASE_URL");
    let env = parse_environment(&or_default("SHELFWATCH_ENV", "development"));
    let log_level = or_default("SHELFWATCH_LOG_LEVEL", "info");
    let retailers_path = PathBuf::from(or_default(
        "SHELFWATCH_RETAILERS_PATH",
        "./config/retailers.yaml",
    ));
    let alert_webhook_url = optional("SHELFWATCH_ALERT_WEBHOOK_URL");

    let db_max_connections = parse_var(&lookup, "SHELFWATCH_DB_MAX_CONNECTIONS", 10u32)?;
    let db_min_connections = parse_var(&lookup, "SHELFWATCH_DB_MIN_CONNECTIONS", 1u32)?;
    let db_acquire_timeout_secs = parse_var(&lookup, "SHELFWATCH_DB_ACQUIRE_TIMEOUT_SECS", 10u64)?;

    let scraper_request_timeout_secs =
        parse_var(&lookup, "SHELFWATCH_SCRAPER_REQUEST_TIMEOUT_SECS", 30u64)?;
    let scraper_user_agent = or_default(
        "SHELFWATCH_SCRAPER_USER_AGENT",
        "shelfwatch/0.1 (price-tracking)",
    );
    let scraper_max_concurrent_retailers =
        parse_var(&lookup, "SHELFWATCH_SCRAPER_MAX_CONCURRENT_RETAILERS", 1usize)?;
    let scraper_inter_request_delay_ms =
        parse_var(&lookup, "SHELFWATCH_SCRAPER_INTER_REQUEST_DELAY_MS", 1_000u64)?;

    let job_timeout_secs = parse_var(&lookup, "SHELFWATCH_JOB_TIMEOUT_SECS", 120u64)?;
    let job_max_attempts = parse_var(&lookup, "SHELFWATCH_JOB_MAX_ATTEMPTS", 3u32)?;
    let job_retry_backoff_secs = parse_var(&lookup, "SHELFWATCH_JOB_RETRY_BACKOFF_SECS", 30u64)?;

    let circuit_failure_threshold =
        parse_var(&lookup, "SHELFWATCH_CIRCUIT_FAILURE_THRESHOLD", 0.5f64)?;
    let circuit_min_samples = parse_var(&lookup, "SHELFWATCH_CIRCUIT_MIN_SAMPLES", 3usize)?;
    let circuit_window_mins = parse_var(&lookup, "SHELFWATCH_CIRCUIT_WINDOW_MINS", 60i64)?;
    let circuit_cooldown_mins = parse_var(&lookup, "SHELFWATCH_CIRCUIT_COOLDOWN_MINS", 30i64)?;
    let health_window_hours = parse_var(&lookup, "SHELFWATCH_HEALTH_WINDOW_HOURS", 24i64)?;
    let failure_alert_threshold =
        parse_var(&lookup, "SHELFWATCH_FAILURE_ALERT_THRESHOLD", 3u32)?;
    let failure_alert_window_mins =
        parse_var(&lookup, "SHELFWATCH_FAILURE_ALERT_WINDOW_MINS", 60i64)?;
    let price_drop_alert_percent =
        parse_var(&lookup, "SHELFWATCH_PRICE_DROP_ALERT_PERCENT", 20.0f64)?;
    let price_alert_cooldown_hours =
        parse_var(&lookup, "SHELFWATCH_PRICE_ALERT_COOLDOWN_HOURS", 24i64)?;

    if !(circuit_failure_threshold > 0.0 && circuit_failure_threshold <= 1.0) {
        return Err(ConfigError::InvalidEnvVar {
            var: "SHELFWATCH_CIRCUIT_FAILURE_THRESHOLD".to_string(),
            reason: format!("{circuit_failure_threshold} is outside (0, 1]"),
        });
    }
    if !(0.0..=100.0).contains(&price_drop_alert_percent) {
        return Err(ConfigError::InvalidEnvVar {
            var: "SHELFWATCH_PRICE_DROP_ALERT_PERCENT".to_string(),
            reason: format!("{price_drop_alert_percent} is outside [0, 100]"),
        });
    }
    require_positive("SHELFWATCH_CIRCUIT_MIN_SAMPLES", circuit_min_samples)?;
    require_positive("SHELFWATCH_JOB_MAX_ATTEMPTS", job_max_attempts)?;
    require_positive("SHELFWATCH_FAILURE_ALERT_THRESHOLD", failure_alert_threshold)?;
    for (var, value) in [
        ("SHELFWATCH_CIRCUIT_WINDOW_MINS", circuit_window_mins),
        ("SHELFWATCH_CIRCUIT_COOLDOWN_MINS", circuit_cooldown_mins),
        ("SHELFWATCH_HEALTH_WINDOW_HOURS", health_window_hours),
        ("SHELFWATCH_FAILURE_ALERT_WINDOW_MINS", failure_alert_window_mins),
    ] {
        require_positive(var, value)?;
    }
    if price_alert_cooldown_hours < 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "SHELFWATCH_PRICE_ALERT_COOLDOWN_HOURS".to_string(),
            reason: "must not be negative".to_string(),
        });
    }

    Ok(AppConfig {
        database_url,
        env,
        log_level,
        retailers_path,
        alert_webhook_url,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        scraper_request_timeout_secs,
        scraper_user_agent,
        scraper_max_concurrent_retailers,
        scraper_inter_request_delay_ms,
        job_timeout_secs,
        job_max_attempts,
        job_retry_backoff_secs,
        circuit_failure_threshold,
        circuit_min_samples,
        circuit_window_mins,
        circuit_cooldown_mins,
        health_window_hours,
        failure_alert_threshold,
        failure_alert_window_mins,
        price_drop_alert_percent,
        price_alert_cooldown_hours,
    })
}

/// Reads `var` through `lookup`, falling back to `default` when unset.
fn parse_var<F, T>(lookup: &F, var: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            }),
        Err(_) => Ok(default),
    }
}

fn require_positive<T>(var: &str, value: T) -> Result<(), ConfigError>
where
    T: PartialOrd + Default + Display,
{
    if value > T::default() {
        Ok(())
    } else {
        Err(ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: format!("{value} must be greater than zero"),
        })
    }
}

/// Parse a string into an `Environment` variant.
///
/// Unrecognized values default to `Environment::Development`.
fn parse_environment(s: &str) -> Environment {
    match s {
        "production" => Environment::Production,
        "test" => Environment::Test,
        _ => Environment::Development,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
