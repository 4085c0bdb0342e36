//! Read-mostly operator commands: breaker state, retailer health and the
//! retailer registry.

use chrono::{DateTime, Utc};
use clap::Subcommand;
use shelfwatch_core::RetailersFile;
use shelfwatch_reliability::{CircuitSnapshot, RetailerHealth, RetailerRegistry, RetailerStatus};

use crate::backend::Backend;

/// Sub-commands available under `breaker`.
#[derive(Debug, Subcommand)]
pub enum BreakerCommands {
    /// Show the failure window and open flag per retailer
    Status {
        /// Limit to one retailer slug
        #[arg(long)]
        retailer: Option<String>,
    },
    /// Clear the breaker for a retailer and re-enable it
    Reset {
        /// Retailer slug
        retailer: String,
    },
}

fn fmt_time(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string())
}

/// Slugs a read command reports on: the one asked for, or every configured
/// retailer.
///
/// # Errors
///
/// Returns an error if `filter` names a retailer missing from the config.
pub(crate) fn selected_slugs(
    retailers: &RetailersFile,
    filter: Option<&str>,
) -> anyhow::Result<Vec<String>> {
    match filter {
        Some(slug) => {
            let retailer = retailers
                .find(slug)
                .ok_or_else(|| anyhow::anyhow!("retailer '{slug}' not found in config"))?;
            Ok(vec![retailer.slug()])
        }
        None => Ok(retailers.retailers.iter().map(|r| r.slug()).collect()),
    }
}

pub(crate) fn format_snapshot(snapshot: &CircuitSnapshot) -> String {
    let state = if snapshot.open { "OPEN" } else { "closed" };
    format!(
        "{:<24}{:<8}{:>8}{:>10}{:>8.1}%  {}",
        snapshot.retailer,
        state,
        snapshot.samples,
        snapshot.failures,
        snapshot.failure_rate * 100.0,
        fmt_time(snapshot.cooldown_until)
    )
}

pub(crate) fn format_health(slug: &str, health: &RetailerHealth) -> String {
    let duration = health
        .avg_duration_seconds
        .map_or_else(|| "-".to_string(), |d| format!("{d:.2}s"));
    format!(
        "{:<24}{:>8.2}%{:>8}{:>8}{:>8}{:>10}  {}",
        slug,
        health.success_rate,
        health.total_crawls,
        health.successful_crawls,
        health.failed_crawls,
        duration,
        fmt_time(health.last_successful_crawl)
    )
}

/// # Errors
///
/// Returns an error if the slug is unknown or the store cannot be read.
pub(crate) async fn run_breaker_status(
    backend: &Backend,
    retailers: &RetailersFile,
    filter: Option<&str>,
) -> anyhow::Result<()> {
    let slugs = selected_slugs(retailers, filter)?;
    println!(
        "{:<24}{:<8}{:>8}{:>10}{:>9}  COOLDOWN UNTIL",
        "RETAILER", "STATE", "SAMPLES", "FAILURES", "RATE"
    );
    for slug in &slugs {
        let snapshot = backend.breaker.snapshot(slug).await?;
        println!("{}", format_snapshot(&snapshot));
    }
    Ok(())
}

/// # Errors
///
/// Returns an error if the slug is unknown or the reset cannot be written.
pub(crate) async fn run_breaker_reset(
    backend: &Backend,
    retailers: &RetailersFile,
    slug: &str,
) -> anyhow::Result<()> {
    let slugs = selected_slugs(retailers, Some(slug))?;
    for slug in &slugs {
        backend.breaker.reset(slug).await?;
        println!("circuit breaker reset for {slug}");
    }
    Ok(())
}

/// # Errors
///
/// Returns an error if the slug is unknown.
pub(crate) async fn run_health(
    backend: &Backend,
    retailers: &RetailersFile,
    filter: Option<&str>,
) -> anyhow::Result<()> {
    let slugs = selected_slugs(retailers, filter)?;
    println!(
        "{:<24}{:>9}{:>8}{:>8}{:>8}{:>10}  LAST SUCCESS",
        "RETAILER", "SUCCESS", "TOTAL", "OK", "FAILED", "AVG"
    );
    for slug in &slugs {
        match backend.health.health(slug).await {
            Some(health) => println!("{}", format_health(slug, &health)),
            None => println!("{slug:<24}no crawls in window"),
        }
    }
    Ok(())
}

/// Lists configured retailers with their registry status. Against Postgres
/// the registry rows are listed instead, which also shows retailers no
/// longer in the config file.
///
/// # Errors
///
/// Returns an error if the registry cannot be read.
pub(crate) async fn run_retailers(backend: &Backend, retailers: &RetailersFile) -> anyhow::Result<()> {
    println!("{:<24}{:<14}{:<9}BASE URL", "SLUG", "STATUS", "ENABLED");

    if let Some(pool) = &backend.pool {
        let rows = shelfwatch_db::list_retailers(pool).await?;
        for row in &rows {
            let enabled = retailers
                .find(&row.slug)
                .map_or("-", |r| if r.enabled { "yes" } else { "no" });
            println!(
                "{:<24}{:<14}{:<9}{}",
                row.slug,
                row.status,
                enabled,
                row.base_url.as_deref().unwrap_or("-")
            );
        }
        return Ok(());
    }

    for retailer in &retailers.retailers {
        let slug = retailer.slug();
        let status = backend
            .registry
            .status(&slug)
            .await?
            .unwrap_or(RetailerStatus::Active);
        let enabled = if retailer.enabled { "yes" } else { "no" };
        println!(
            "{:<24}{:<14}{:<9}{}",
            slug,
            status.as_str(),
            enabled,
            retailer.base_url
        );
    }
    Ok(())
}
