//! Product URL discovery on category/listing pages.
//!
//! Candidate links are collected from the DOM (and optionally from inline
//! scripts) when the iterator is first polled; resolution, validation and
//! deduplication then happen one candidate at a time. The pagination
//! successor, if any, is always the last record.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use shelfwatch_core::{CrawlRecord, ListingSelectors, PaginatedUrl, ProductListingUrl};

use crate::error::ScraperError;
use crate::extractor::{compile_optional, compile_patterns, url_matches, Extractor, RecordIter};
use crate::pagination::find_next_page;
use crate::selector::{any_matches, select_all};
use crate::urls::{canonicalize_url, resolve_url};

static SCRIPTS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script").expect("valid script selector"));

/// Compiled listing rules for one retailer. Hooks receive it so they can
/// delegate to the configured behaviour.
#[derive(Debug)]
pub struct ListingRules {
    product_url: Option<Regex>,
    product_id: Option<Regex>,
    category: Option<Regex>,
    category_from_product_url: bool,
    strip_query: bool,
}

impl ListingRules {
    /// A product URL must match `product_url_pattern`; with no pattern every
    /// resolved link qualifies.
    #[must_use]
    pub fn is_product_url(&self, url: &str) -> bool {
        self.product_url.as_ref().is_none_or(|re| re.is_match(url))
    }

    /// Product id captured by `product_id_pattern`, else the URL itself.
    #[must_use]
    pub fn identity_key(&self, url: &str) -> String {
        self.product_id
            .as_ref()
            .and_then(|re| re.captures(url))
            .and_then(|caps| caps.get(1))
            .map_or_else(|| url.to_owned(), |m| format!("id:{}", m.as_str()))
    }

    /// Category captured by `category_pattern`, looked up in the product URL
    /// first when `category_from_product_url` is set, else in the listing URL
    /// only.
    #[must_use]
    pub fn category_for(&self, source_url: &str, product_url: &str) -> Option<String> {
        let re = self.category.as_ref()?;
        let capture = |url: &str| {
            re.captures(url)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_owned())
        };
        if self.category_from_product_url {
            capture(product_url).or_else(|| capture(source_url))
        } else {
            capture(source_url)
        }
    }

    #[must_use]
    pub fn canonicalize(&self, url: &str) -> String {
        canonicalize_url(url, self.strip_query)
    }
}

/// Retailer-specific overrides for listing discovery. The defaults delegate
/// to the configured [`ListingRules`].
pub trait ListingHooks: Send + Sync {
    fn should_extract(&self, _doc: &Html, _source_url: &str) -> bool {
        true
    }

    fn is_product_url(&self, rules: &ListingRules, url: &str) -> bool {
        rules.is_product_url(url)
    }

    /// Key used for the second deduplication pass; two URLs with the same key
    /// are the same product.
    fn identity_key(&self, rules: &ListingRules, url: &str) -> String {
        rules.identity_key(url)
    }

    fn category_for(
        &self,
        rules: &ListingRules,
        source_url: &str,
        product_url: &str,
    ) -> Option<String> {
        rules.category_for(source_url, product_url)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultListingHooks;

impl ListingHooks for DefaultListingHooks {}

/// Emits [`ProductListingUrl`]s (and an optional [`PaginatedUrl`]) for a
/// listing page.
pub struct ListingUrlExtractor {
    retailer: String,
    selectors: ListingSelectors,
    url_patterns: Vec<Regex>,
    script_url: Option<Regex>,
    rules: ListingRules,
    hooks: Box<dyn ListingHooks>,
}

impl std::fmt::Debug for ListingUrlExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListingUrlExtractor")
            .field("retailer", &self.retailer)
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

impl ListingUrlExtractor {
    /// # Errors
    ///
    /// Returns [`ScraperError::InvalidPattern`] if any configured regex does
    /// not compile.
    pub fn new(retailer: &str, selectors: ListingSelectors) -> Result<Self, ScraperError> {
        let rules = ListingRules {
            product_url: compile_optional(retailer, selectors.product_url_pattern.as_deref())?,
            product_id: compile_optional(retailer, selectors.product_id_pattern.as_deref())?,
            category: compile_optional(retailer, selectors.category_pattern.as_deref())?,
            category_from_product_url: selectors.category_from_product_url,
            strip_query: selectors.strip_query,
        };
        Ok(Self {
            retailer: retailer.to_owned(),
            url_patterns: compile_patterns(retailer, &selectors.url_patterns)?,
            script_url: compile_optional(retailer, selectors.script_url_pattern.as_deref())?,
            selectors,
            rules,
            hooks: Box::new(DefaultListingHooks),
        })
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: impl ListingHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    #[must_use]
    pub fn rules(&self) -> &ListingRules {
        &self.rules
    }

    /// Parses the page and gathers raw candidates. Everything after this is
    /// lazy.
    fn scan(&self, html: &str, source_url: &str) -> ListingUrls<'_> {
        let doc = Html::parse_document(html);

        if any_matches(&doc, &self.selectors.block_selectors) {
            tracing::warn!(
                retailer = %self.retailer,
                url = source_url,
                "block page detected, skipping listing extraction"
            );
            return ListingUrls::empty(self, source_url);
        }
        if !self.hooks.should_extract(&doc, source_url) {
            tracing::info!(
                retailer = %self.retailer,
                url = source_url,
                "listing extraction vetoed by retailer hook"
            );
            return ListingUrls::empty(self, source_url);
        }

        let mut candidates: Vec<String> = select_all(&doc, &self.selectors.link)
            .into_iter()
            .filter_map(|el| el.value().attr("href"))
            .map(str::to_owned)
            .collect();

        if let Some(re) = &self.script_url {
            let before = candidates.len();
            for script in doc.select(&SCRIPTS) {
                let text = script.text().collect::<String>();
                candidates.extend(
                    re.captures_iter(&text)
                        .filter_map(|caps| caps.get(1))
                        .map(|m| m.as_str().replace("\\/", "/")),
                );
            }
            tracing::debug!(
                retailer = %self.retailer,
                found = candidates.len() - before,
                "script-embedded product candidates"
            );
        }

        let next_page = self.selectors.pagination.as_ref().and_then(|pagination| {
            find_next_page(&doc, source_url, pagination).map(|(url, page)| PaginatedUrl {
                url,
                retailer: self.retailer.clone(),
                page,
                category: self.hooks.category_for(&self.rules, source_url, source_url),
                discovered_from: source_url.to_owned(),
            })
        });

        ListingUrls {
            extractor: self,
            source_url: source_url.to_owned(),
            candidates: candidates.into_iter(),
            seen_urls: HashSet::new(),
            seen_keys: HashSet::new(),
            next_page,
            discovered_at: Utc::now(),
            emitted: 0,
            finished: false,
        }
    }
}

impl Extractor for ListingUrlExtractor {
    fn name(&self) -> &str {
        "listing"
    }

    fn can_handle(&self, url: &str) -> bool {
        url_matches(&self.url_patterns, url)
    }

    fn extract<'a>(&'a self, html: &str, source_url: &str) -> RecordIter<'a> {
        let html = html.to_owned();
        let source_url = source_url.to_owned();
        Box::new(std::iter::once_with(move || self.scan(&html, &source_url)).flatten())
    }
}

/// Single-pass iterator over one listing page's discoveries.
struct ListingUrls<'a> {
    extractor: &'a ListingUrlExtractor,
    source_url: String,
    candidates: std::vec::IntoIter<String>,
    seen_urls: HashSet<String>,
    seen_keys: HashSet<String>,
    next_page: Option<PaginatedUrl>,
    discovered_at: DateTime<Utc>,
    emitted: usize,
    finished: bool,
}

impl<'a> ListingUrls<'a> {
    fn empty(extractor: &'a ListingUrlExtractor, source_url: &str) -> Self {
        Self {
            extractor,
            source_url: source_url.to_owned(),
            candidates: Vec::new().into_iter(),
            seen_urls: HashSet::new(),
            seen_keys: HashSet::new(),
            next_page: None,
            discovered_at: Utc::now(),
            emitted: 0,
            finished: false,
        }
    }

    fn accept(&mut self, href: &str) -> Option<ProductListingUrl> {
        let ex = self.extractor;
        let resolved = resolve_url(&self.source_url, href)?;
        let url = ex.rules.canonicalize(&resolved);

        if !self.seen_urls.insert(url.clone()) {
            return None;
        }
        if !ex.hooks.is_product_url(&ex.rules, &url) {
            return None;
        }
        if !self.seen_keys.insert(ex.hooks.identity_key(&ex.rules, &url)) {
            return None;
        }

        let category = ex.hooks.category_for(&ex.rules, &self.source_url, &url);
        Some(ProductListingUrl::new(
            url,
            &ex.retailer,
            category,
            &self.source_url,
            self.discovered_at,
        ))
    }
}

impl Iterator for ListingUrls<'_> {
    type Item = CrawlRecord;

    fn next(&mut self) -> Option<CrawlRecord> {
        while let Some(href) = self.candidates.next() {
            if let Some(listing) = self.accept(&href) {
                self.emitted += 1;
                return Some(CrawlRecord::Listing(listing));
            }
        }

        if let Some(page) = self.next_page.take() {
            return Some(CrawlRecord::NextPage(page));
        }

        if !self.finished {
            self.finished = true;
            tracing::debug!(
                retailer = %self.extractor.retailer,
                url = %self.source_url,
                emitted = self.emitted,
                distinct_urls = self.seen_urls.len(),
                "listing page exhausted"
            );
        }
        None
    }
}

#[cfg(test)]
#[path = "listing_test.rs"]
mod tests;
