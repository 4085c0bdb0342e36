//! `crawl` command handler.
//!
//! Retailers are crawled concurrently, bounded by
//! `SHELFWATCH_SCRAPER_MAX_CONCURRENT_RETAILERS`; URLs of one retailer run
//! sequentially so its courtesy delay holds. A failing URL is logged and
//! counted, never propagated.

mod job;

use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use shelfwatch_core::{AppConfig, CrawlRecord, RetailerConfig, RetailersFile};
use shelfwatch_scraper::urls::extract_domain;
use shelfwatch_scraper::{Crawler, HtmlFetcher, HttpFetcher};

use crate::backend::Backend;

pub(crate) use job::{run_job, JobOutcome, JobSettings};

/// What to crawl: a retailer and the URLs to start from.
#[derive(Debug)]
pub(crate) struct CrawlTarget<'a> {
    pub retailer: &'a RetailerConfig,
    pub urls: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CrawlTotals {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub records: usize,
    pub price_drops: usize,
    /// Fetch attempts across all crawls, retries included.
    pub attempts: u32,
}

impl CrawlTotals {
    fn add(&mut self, other: CrawlTotals) {
        self.completed += other.completed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.records += other.records;
        self.price_drops += other.price_drops;
        self.attempts += other.attempts;
    }
}

fn retailer_for_url<'a>(retailers: &'a RetailersFile, url: &str) -> Option<&'a RetailerConfig> {
    let domain = extract_domain(url);
    retailers
        .retailers
        .iter()
        .find(|r| extract_domain(&r.base_url) == domain)
}

/// Resolves command arguments into per-retailer targets.
///
/// With URLs, each is assigned to `retailer_filter` or to the retailer whose
/// base URL shares its host. Without URLs, every enabled retailer (or only
/// the filtered one) is crawled from its base URL.
///
/// # Errors
///
/// Returns an error for an unknown retailer slug or a URL no retailer claims.
pub(crate) fn resolve_targets<'a>(
    retailers: &'a RetailersFile,
    retailer_filter: Option<&str>,
    urls: &[String],
) -> anyhow::Result<Vec<CrawlTarget<'a>>> {
    let filtered = match retailer_filter {
        Some(slug) => Some(
            retailers
                .find(slug)
                .ok_or_else(|| anyhow::anyhow!("retailer '{slug}' not found in config"))?,
        ),
        None => None,
    };

    if urls.is_empty() {
        let selected: Vec<&RetailerConfig> = match filtered {
            Some(retailer) => vec![retailer],
            None => retailers.enabled().collect(),
        };
        return Ok(selected
            .into_iter()
            .map(|retailer| CrawlTarget {
                retailer,
                urls: vec![retailer.base_url.clone()],
            })
            .collect());
    }

    let mut targets: Vec<CrawlTarget<'a>> = Vec::new();
    for url in urls {
        let retailer = match filtered {
            Some(retailer) => retailer,
            None => retailer_for_url(retailers, url).ok_or_else(|| {
                anyhow::anyhow!("no configured retailer serves {url}; pass --retailer")
            })?,
        };
        match targets
            .iter_mut()
            .find(|t| t.retailer.slug() == retailer.slug())
        {
            Some(target) => target.urls.push(url.clone()),
            None => targets.push(CrawlTarget {
                retailer,
                urls: vec![url.clone()],
            }),
        }
    }
    Ok(targets)
}

fn print_records(records: &[CrawlRecord]) {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for record in records {
        match serde_json::to_string(record) {
            Ok(line) => {
                if let Err(e) = writeln!(out, "{line}") {
                    tracing::warn!(error = %e, "failed to write record");
                    return;
                }
            }
            Err(e) => tracing::warn!(kind = record.kind(), error = %e, "failed to serialize record"),
        }
    }
}

/// Crawls one retailer's URLs in order, following up to `max_pages` pages of
/// pagination from each start URL.
async fn crawl_retailer(
    backend: &Backend,
    config: &AppConfig,
    fetcher: Arc<dyn HtmlFetcher>,
    target: &CrawlTarget<'_>,
    max_pages: u32,
) -> anyhow::Result<CrawlTotals> {
    let crawler = Crawler::from_config(target.retailer, fetcher)?;
    let settings = JobSettings::new(config, target.retailer);
    let mut totals = CrawlTotals::default();

    let mut queue: VecDeque<(String, u32)> = target.urls.iter().map(|u| (u.clone(), 1)).collect();
    while let Some((url, page)) = queue.pop_front() {
        match run_job(backend, &crawler, &target.retailer.name, &url, &settings).await? {
            JobOutcome::Completed {
                records,
                attempts,
                price_drops,
            } => {
                totals.completed += 1;
                totals.attempts += attempts;
                totals.records += records.len();
                totals.price_drops += price_drops;
                print_records(&records);
                if page < max_pages {
                    let next = records.iter().find_map(|r| match r {
                        CrawlRecord::NextPage(next) => Some(next.url.clone()),
                        _ => None,
                    });
                    if let Some(next) = next {
                        queue.push_back((next, page + 1));
                    }
                }
            }
            JobOutcome::Failed { reason, attempts } => {
                totals.failed += 1;
                totals.attempts += attempts;
                eprintln!("failed {url} after {attempts} attempts: {reason}");
            }
            JobOutcome::Skipped { reason } => {
                // The retailer stays blocked for the rest of this run.
                totals.skipped += 1 + queue.len();
                eprintln!("skipped {}: {reason}", target.retailer.slug());
                break;
            }
        }
    }
    Ok(totals)
}

/// Runs the `crawl` command and prints a summary line.
///
/// # Errors
///
/// Returns an error if targets cannot be resolved, the HTTP client cannot be
/// built, or every attempted crawl failed.
pub(crate) async fn run_crawl(
    config: &AppConfig,
    backend: &Backend,
    retailers: &RetailersFile,
    retailer_filter: Option<&str>,
    urls: &[String],
    max_pages: u32,
) -> anyhow::Result<()> {
    let targets = resolve_targets(retailers, retailer_filter, urls)?;
    if targets.is_empty() {
        println!("no enabled retailers to crawl");
        return Ok(());
    }

    let fetcher: Arc<dyn HtmlFetcher> = Arc::new(
        HttpFetcher::new(config.scraper_request_timeout_secs, &config.scraper_user_agent)
            .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {e}"))?,
    );
    let max_concurrent = config.scraper_max_concurrent_retailers.max(1);

    let results: Vec<(&CrawlTarget<'_>, anyhow::Result<CrawlTotals>)> = stream::iter(&targets)
        .map(|target| {
            let fetcher = Arc::clone(&fetcher);
            async move {
                let result = crawl_retailer(backend, config, fetcher, target, max_pages).await;
                (target, result)
            }
        })
        .buffer_unordered(max_concurrent)
        .collect()
        .await;

    let mut totals = CrawlTotals::default();
    for (target, result) in results {
        match result {
            Ok(retailer_totals) => totals.add(retailer_totals),
            Err(e) => {
                tracing::error!(retailer = %target.retailer.slug(), error = %e, "retailer crawl aborted");
                totals.failed += target.urls.len();
            }
        }
    }

    backend.purge_expired().await;

    eprintln!(
        "crawled {} urls in {} attempts: {} completed, {} failed, {} skipped; {} records, {} price drops",
        totals.completed + totals.failed + totals.skipped,
        totals.attempts,
        totals.completed,
        totals.failed,
        totals.skipped,
        totals.records,
        totals.price_drops
    );

    if totals.completed == 0 && totals.failed > 0 {
        anyhow::bail!("all {} attempted crawls failed", totals.failed);
    }
    Ok(())
}
