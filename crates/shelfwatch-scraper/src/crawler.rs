use std::sync::Arc;
use std::time::Duration;

use shelfwatch_core::{CrawlRecord, RetailerConfig};

use crate::client::{FetchOptions, HtmlFetcher};
use crate::details::DetailsExtractor;
use crate::error::ScraperError;
use crate::extractor::Extractor;
use crate::listing::ListingUrlExtractor;

/// Fetches a page once and runs every extractor that claims its URL.
pub struct Crawler {
    retailer: String,
    fetcher: Arc<dyn HtmlFetcher>,
    extractors: Vec<Box<dyn Extractor>>,
    fetch_options: FetchOptions,
}

impl std::fmt::Debug for Crawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crawler")
            .field("retailer", &self.retailer)
            .field(
                "extractors",
                &self.extractors.iter().map(|e| e.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl Crawler {
    /// A crawler with no extractors; add them with [`Crawler::with_extractor`].
    #[must_use]
    pub fn new(retailer: &str, fetcher: Arc<dyn HtmlFetcher>) -> Self {
        Self {
            retailer: retailer.to_owned(),
            fetcher,
            extractors: Vec::new(),
            fetch_options: FetchOptions::default(),
        }
    }

    /// Builds the details and listing extractors a retailer's selector tables
    /// declare.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::InvalidPattern`] if any configured regex does
    /// not compile.
    pub fn from_config(
        config: &RetailerConfig,
        fetcher: Arc<dyn HtmlFetcher>,
    ) -> Result<Self, ScraperError> {
        let slug = config.slug();
        let mut crawler = Self::new(&slug, fetcher);

        if let Some(details) = &config.details {
            crawler = crawler.with_extractor(DetailsExtractor::new(
                &slug,
                config.currency.as_deref(),
                details.clone(),
            )?);
        }
        if let Some(listing) = &config.listing {
            crawler = crawler.with_extractor(ListingUrlExtractor::new(&slug, listing.clone())?);
        }
        if crawler.extractors.is_empty() {
            tracing::warn!(retailer = %slug, "retailer has no extractors configured");
        }
        Ok(crawler)
    }

    #[must_use]
    pub fn with_extractor(mut self, extractor: impl Extractor + 'static) -> Self {
        self.extractors.push(Box::new(extractor));
        self
    }

    #[must_use]
    pub fn with_fetch_options(mut self, options: FetchOptions) -> Self {
        self.fetch_options = options;
        self
    }

    /// Per-request timeout for the fetch, leaving other options untouched.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_options.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn retailer(&self) -> &str {
        &self.retailer
    }

    /// Status code of the last fetch, as reported by the fetcher.
    #[must_use]
    pub fn last_status_code(&self) -> Option<u16> {
        self.fetcher.last_status_code()
    }

    /// Fetches `url` once and returns the records of every matching
    /// extractor, each extractor's output kept in its own order.
    ///
    /// # Errors
    ///
    /// Any fetch failure is returned as-is; nothing is retried here.
    pub async fn crawl(
        &self,
        url: &str,
    ) -> Result<impl Iterator<Item = CrawlRecord> + '_, ScraperError> {
        let html = self.fetcher.fetch_html(url, &self.fetch_options).await?;
        tracing::debug!(
            retailer = %self.retailer,
            url,
            bytes = html.len(),
            "page fetched"
        );
        Ok(self.extract(html, url))
    }

    /// Runs the matching extractors over already-fetched `html`.
    pub fn extract(&self, html: String, url: &str) -> impl Iterator<Item = CrawlRecord> + '_ {
        let url = url.to_owned();
        let matching: Vec<&dyn Extractor> = self
            .extractors
            .iter()
            .map(|e| &**e)
            .filter(|e| e.can_handle(&url))
            .collect();

        if matching.is_empty() {
            tracing::debug!(retailer = %self.retailer, url = %url, "no extractor handles url");
        }

        matching
            .into_iter()
            .flat_map(move |extractor| extractor.extract(&html, &url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shelfwatch_core::parse_retailers;

    struct StaticFetcher {
        body: Result<String, u16>,
    }

    #[async_trait]
    impl HtmlFetcher for StaticFetcher {
        async fn fetch_html(
            &self,
            url: &str,
            _options: &FetchOptions,
        ) -> Result<String, ScraperError> {
            match &self.body {
                Ok(body) => Ok(body.clone()),
                Err(status) => Err(ScraperError::UnexpectedStatus {
                    status: *status,
                    url: url.to_owned(),
                }),
            }
        }

        fn last_status_code(&self) -> Option<u16> {
            Some(match &self.body {
                Ok(_) => 200,
                Err(status) => *status,
            })
        }
    }

    const RETAILERS_YAML: &str = r#"
retailers:
  - name: Pet Shop
    base_url: https://www.petshop.example
    details:
      url_patterns: ['/p/']
      title: ['h1']
      price: ['.price']
    listing:
      url_patterns: ['/c/']
      link: ['a.product-link']
      product_url_pattern: '/p/'
"#;

    const PAGE: &str = r#"<html><body>
      <h1>Harringtons Complete Dog Food 2kg</h1>
      <span class="price">£6.50</span>
      <a class="product-link" href="/p/bakers-adult-5kg">Bakers</a>
    </body></html>"#;

    fn make_crawler(body: Result<String, u16>) -> Crawler {
        let file = parse_retailers(RETAILERS_YAML).expect("valid retailers yaml");
        let config = file.find("pet-shop").expect("retailer present");
        Crawler::from_config(config, Arc::new(StaticFetcher { body })).expect("valid config")
    }

    #[tokio::test]
    async fn product_url_runs_only_details_extractor() {
        let crawler = make_crawler(Ok(PAGE.to_owned()));
        let records: Vec<CrawlRecord> = crawler
            .crawl("https://www.petshop.example/p/harringtons-2kg")
            .await
            .unwrap()
            .collect();
        assert_eq!(records.len(), 1);
        let CrawlRecord::Details(details) = &records[0] else {
            panic!("expected details, got {:?}", records[0]);
        };
        assert_eq!(details.title, "Harringtons Complete Dog Food 2kg");
        assert_eq!(details.price_pence, 650);
        assert_eq!(details.weight_grams, Some(2000));
    }

    #[tokio::test]
    async fn listing_url_runs_only_listing_extractor() {
        let crawler = make_crawler(Ok(PAGE.to_owned()));
        let kinds: Vec<&str> = crawler
            .crawl("https://www.petshop.example/c/dog-food")
            .await
            .unwrap()
            .map(|r| r.kind())
            .collect();
        assert_eq!(kinds, vec!["listing"]);
    }

    #[tokio::test]
    async fn unmatched_url_yields_nothing() {
        let crawler = make_crawler(Ok(PAGE.to_owned()));
        let records = crawler
            .crawl("https://www.petshop.example/help")
            .await
            .unwrap();
        assert_eq!(records.count(), 0);
    }

    #[tokio::test]
    async fn fetch_failure_propagates() {
        let crawler = make_crawler(Err(503));
        let err = crawler
            .crawl("https://www.petshop.example/p/harringtons-2kg")
            .await
            .err()
            .expect("fetch should fail");
        assert_eq!(err.status_code(), Some(503));
        assert_eq!(crawler.last_status_code(), Some(503));
    }

    #[test]
    fn retailer_without_tables_has_no_extractors() {
        let file = parse_retailers(
            "retailers:\n  - name: Bare\n    base_url: https://bare.example\n",
        )
        .unwrap();
        let crawler = Crawler::from_config(
            &file.retailers[0],
            Arc::new(StaticFetcher {
                body: Ok(String::new()),
            }),
        )
        .unwrap();
        assert_eq!(crawler.retailer(), "bare");
        assert_eq!(crawler.extract(PAGE.to_owned(), "https://bare.example/p/1").count(), 0);
    }
}
