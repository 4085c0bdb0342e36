//! One logical crawl of one URL: gate on the breaker, retry the fetch with a
//! fixed backoff, and commit exactly one terminal event however many
//! attempts it took.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use shelfwatch_core::{AppConfig, CrawlRecord, RetailerConfig};
use shelfwatch_reliability::{
    track_price, Clock, CrawlAggregate, RetailerRegistry, RetailerStatus, DURATION_KEY,
};
use shelfwatch_scraper::{retry_with_fixed_backoff, Crawler, RetryPolicy, ScraperError};

use crate::backend::Backend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct JobSettings {
    /// Deadline for the whole crawl, every attempt and backoff included.
    pub job_timeout: Duration,
    pub retry: RetryPolicy,
    /// Courtesy pause after the crawl, whatever its outcome.
    pub delay: Duration,
}

impl JobSettings {
    pub(crate) fn new(config: &AppConfig, retailer: &RetailerConfig) -> Self {
        Self {
            job_timeout: Duration::from_secs(config.job_timeout_secs),
            retry: RetryPolicy::new(
                config.job_max_attempts,
                Duration::from_secs(config.job_retry_backoff_secs),
            ),
            delay: Duration::from_millis(
                retailer
                    .request_delay_ms
                    .unwrap_or(config.scraper_inter_request_delay_ms),
            ),
        }
    }
}

#[derive(Debug)]
pub(crate) enum JobOutcome {
    Skipped {
        reason: String,
    },
    Completed {
        records: Vec<CrawlRecord>,
        attempts: u32,
        price_drops: usize,
    },
    Failed {
        reason: String,
        attempts: u32,
    },
}

/// Key the price of a details record is tracked under: the retailer SKU when
/// known, else the page URL.
fn listing_key(record: &CrawlRecord) -> Option<(String, &shelfwatch_core::ProductDetails)> {
    let CrawlRecord::Details(details) = record else {
        return None;
    };
    let key = details.external_id.clone().or_else(|| {
        details
            .metadata
            .get("source_url")
            .and_then(Value::as_str)
            .map(str::to_owned)
    })?;
    Some((key, details))
}

fn statistics(records: &[CrawlRecord], attempts: u32, elapsed: Duration) -> Map<String, Value> {
    let count = |kind: &str| records.iter().filter(|r| r.kind() == kind).count();
    let mut stats = Map::new();
    stats.insert("records".to_owned(), json!(records.len()));
    stats.insert("details".to_owned(), json!(count("details")));
    stats.insert("listings".to_owned(), json!(count("listing")));
    stats.insert("next_pages".to_owned(), json!(count("next_page")));
    stats.insert("attempts".to_owned(), json!(attempts));
    stats.insert(DURATION_KEY.to_owned(), json!(elapsed.as_secs_f64()));
    stats
}

fn failure_context(err: &ScraperError, attempts: u32, elapsed: Duration) -> Map<String, Value> {
    let mut context = Map::new();
    context.insert("attempts".to_owned(), json!(attempts));
    context.insert(DURATION_KEY.to_owned(), json!(elapsed.as_secs_f64()));
    if let Some(status) = err.status_code() {
        context.insert("status_code".to_owned(), json!(status));
    }
    context
}

async fn skip_reason(backend: &Backend, slug: &str) -> Option<String> {
    match backend.registry.status(slug).await {
        Ok(Some(RetailerStatus::Paused)) => return Some("retailer is paused".to_owned()),
        Ok(_) => {}
        Err(e) => tracing::warn!(retailer = slug, error = %e, "status lookup failed; crawling anyway"),
    }
    if backend.breaker.is_open(slug).await {
        return Some("circuit breaker is open".to_owned());
    }
    None
}

/// Runs one crawl of `url` end to end.
///
/// # Errors
///
/// Returns an error only if the event log rejects the crawl's events; crawl
/// failures are reported as [`JobOutcome::Failed`].
pub(crate) async fn run_job(
    backend: &Backend,
    crawler: &Crawler,
    retailer_name: &str,
    url: &str,
    settings: &JobSettings,
) -> anyhow::Result<JobOutcome> {
    let slug = crawler.retailer();
    if let Some(reason) = skip_reason(backend, slug).await {
        tracing::info!(retailer = slug, url, reason = %reason, "skipping crawl");
        return Ok(JobOutcome::Skipped { reason });
    }

    let mut aggregate = CrawlAggregate::new(backend.clock.clone());
    let mut metadata = Map::new();
    metadata.insert("max_attempts".to_owned(), json!(settings.retry.max_attempts));
    aggregate.start_crawl(url, slug, retailer_name, metadata)?;
    backend.reactors.commit(&mut aggregate).await?;

    let started = Instant::now();
    let started_attempts = AtomicU32::new(0);
    let started_attempts = &started_attempts;
    let retried = retry_with_fixed_backoff(settings.retry, move |attempt| async move {
        started_attempts.store(attempt, Ordering::Relaxed);
        tracing::debug!(retailer = slug, url, attempt, "crawl attempt");
        crawler
            .crawl(url)
            .await
            .map(Iterator::collect::<Vec<CrawlRecord>>)
    });
    let (result, attempts) = match tokio::time::timeout(settings.job_timeout, retried).await {
        Ok(attempted) => (attempted.result, attempted.attempts),
        Err(_) => (
            Err(ScraperError::Timeout {
                url: url.to_owned(),
                timeout_secs: settings.job_timeout.as_secs(),
            }),
            started_attempts.load(Ordering::Relaxed),
        ),
    };
    let elapsed = started.elapsed();

    let outcome = match result {
        Ok(records) => {
            aggregate.record_product_listings_discovered(records.iter().filter_map(|r| {
                match r {
                    CrawlRecord::Listing(listing) => Some(listing),
                    _ => None,
                }
            }))?;
            let price_drops = track_prices(backend, slug, &records).await;
            aggregate.complete_crawl(statistics(&records, attempts, elapsed))?;
            tracing::info!(
                retailer = slug,
                url,
                records = records.len(),
                attempts,
                elapsed_secs = elapsed.as_secs_f64(),
                "crawl completed"
            );
            JobOutcome::Completed {
                records,
                attempts,
                price_drops,
            }
        }
        Err(err) => {
            let reason = err.to_string();
            aggregate.mark_as_failed(&reason, failure_context(&err, attempts, elapsed))?;
            tracing::error!(retailer = slug, url, attempts, error = %err, "crawl failed");
            JobOutcome::Failed { reason, attempts }
        }
    };
    backend.reactors.commit(&mut aggregate).await?;

    if !settings.delay.is_zero() {
        tokio::time::sleep(settings.delay).await;
    }
    Ok(outcome)
}

/// Records the latest price of every details record and dispatches any
/// drops. Returns how many drops were found.
async fn track_prices(backend: &Backend, slug: &str, records: &[CrawlRecord]) -> usize {
    let mut drops = 0;
    for (listing_id, details) in records.iter().filter_map(listing_key) {
        if !details.has_price() {
            continue;
        }
        let tracked = track_price(
            backend.store.as_ref(),
            slug,
            &listing_id,
            &details.title,
            details.price_pence,
            backend.clock.now(),
        )
        .await;
        match tracked {
            Ok(Some(drop)) => {
                drops += 1;
                backend.reactors.dispatch_price_drop(&drop).await;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(
                retailer = slug,
                listing_id = %listing_id,
                error = %e,
                "price tracking failed"
            ),
        }
    }
    drops
}

#[cfg(test)]
#[path = "job_test.rs"]
mod tests;
