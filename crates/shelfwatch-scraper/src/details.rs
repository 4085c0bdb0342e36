//! Product detail page extraction.
//!
//! Structured data is read first; each field then falls back to the
//! retailer's selector table. Missing fields never abort the record: the
//! title becomes [`UNKNOWN_PRODUCT_TITLE`] and the price the `0` sentinel.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::{Map, Value};
use shelfwatch_core::{
    CrawlRecord, DetailsSelectors, ProductDetails, DEFAULT_CURRENCY, UNKNOWN_PRODUCT_TITLE,
};

use crate::brand::brand_from_title;
use crate::error::ScraperError;
use crate::extractor::{compile_patterns, url_matches, Extractor, RecordIter};
use crate::jsonld::{first_product, StructuredProduct};
use crate::price::price_from_element;
use crate::selector::{
    any_matches, element_text, select_all, select_attr, select_first_where, select_text,
};
use crate::urls::resolve_url;
use crate::weight::{first_weight, parse_quantity};

const IMAGE_ATTRIBUTES: [&str; 3] = ["src", "data-src", "data-lazy-src"];
const EXTERNAL_ID_ATTRIBUTES: [&str; 5] =
    ["data-sku", "data-product-id", "data-id", "content", "value"];
const PLACEHOLDER_MARKERS: [&str; 4] = ["placeholder", "loading", "spinner", "blank.gif"];

static TABLE_CELLS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("th, td, dt, dd").expect("valid cell selector"));

static FIRST_INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("valid integer regex"));

/// Retailer-specific overrides for the details pipeline.
///
/// Every method has a neutral default, so most retailers need nothing beyond
/// their selector table.
pub trait DetailsHooks: Send + Sync {
    /// Return `false` to yield nothing for this page, e.g. on a CAPTCHA wall.
    fn should_extract(&self, _doc: &Html, _source_url: &str) -> bool {
        true
    }

    /// Brand derived from the breadcrumb trail, consulted after structured
    /// data and the brand selectors.
    fn brand_from_breadcrumbs(&self, _crumbs: &[String]) -> Option<String> {
        None
    }

    /// Adds retailer extras (loyalty prices, promotions, review counts).
    fn extra_metadata(
        &self,
        _doc: &Html,
        _structured: Option<&StructuredProduct>,
        _metadata: &mut Map<String, Value>,
    ) {
    }
}

/// Hooks that keep every default.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDetailsHooks;

impl DetailsHooks for DefaultDetailsHooks {}

/// Builds one [`ProductDetails`] per product page from a selector table.
pub struct DetailsExtractor {
    retailer: String,
    currency: String,
    selectors: DetailsSelectors,
    url_patterns: Vec<Regex>,
    quantity_patterns: Vec<Regex>,
    hooks: Box<dyn DetailsHooks>,
}

impl std::fmt::Debug for DetailsExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetailsExtractor")
            .field("retailer", &self.retailer)
            .field("currency", &self.currency)
            .finish_non_exhaustive()
    }
}

impl DetailsExtractor {
    /// # Errors
    ///
    /// Returns [`ScraperError::InvalidPattern`] if a URL or quantity pattern
    /// does not compile.
    pub fn new(
        retailer: &str,
        currency: Option<&str>,
        selectors: DetailsSelectors,
    ) -> Result<Self, ScraperError> {
        Ok(Self {
            retailer: retailer.to_owned(),
            currency: currency.unwrap_or(DEFAULT_CURRENCY).to_owned(),
            url_patterns: compile_patterns(retailer, &selectors.url_patterns)?,
            quantity_patterns: compile_patterns(retailer, &selectors.quantity_patterns)?,
            selectors,
            hooks: Box::new(DefaultDetailsHooks),
        })
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: impl DetailsHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    /// Runs the full pipeline. `None` means the page was deliberately
    /// skipped (block page or hook veto), never that a field was missing.
    #[must_use]
    pub fn extract_details(&self, html: &str, source_url: &str) -> Option<ProductDetails> {
        let doc = Html::parse_document(html);

        if any_matches(&doc, &self.selectors.block_selectors) {
            tracing::warn!(
                retailer = %self.retailer,
                url = source_url,
                "block page detected, skipping details extraction"
            );
            return None;
        }
        if !self.hooks.should_extract(&doc, source_url) {
            tracing::info!(
                retailer = %self.retailer,
                url = source_url,
                "details extraction vetoed by retailer hook"
            );
            return None;
        }

        let structured = first_product(html);
        let sd = structured.as_ref();
        let s = &self.selectors;

        let title = sd
            .and_then(|p| p.name.clone())
            .or_else(|| select_text(&doc, &s.title))
            .unwrap_or_else(|| {
                tracing::warn!(
                    retailer = %self.retailer,
                    url = source_url,
                    "could not resolve product title"
                );
                UNKNOWN_PRODUCT_TITLE.to_owned()
            });

        let price_pence = sd
            .and_then(|p| p.price_pence)
            .or_else(|| self.price_from_selectors(&doc, &s.price))
            .unwrap_or_else(|| {
                tracing::warn!(
                    retailer = %self.retailer,
                    url = source_url,
                    "could not resolve product price"
                );
                0
            });

        let crumbs: Vec<String> = select_all(&doc, &s.breadcrumb)
            .into_iter()
            .map(element_text)
            .filter(|t| !t.is_empty())
            .collect();

        let brand = self.resolve_brand(&doc, sd, &crumbs, &title);

        let weight_text = select_text(&doc, &s.weight);
        let weight_grams = first_weight(
            [
                sd.and_then(|p| p.offer_name.as_deref()),
                weight_text.as_deref(),
                Some(title.as_str()),
            ]
            .into_iter()
            .flatten(),
        );

        let mut metadata = Map::new();
        metadata.insert("source_url".to_owned(), Value::String(source_url.to_owned()));
        metadata.insert(
            "extracted_at".to_owned(),
            Value::String(Utc::now().to_rfc3339()),
        );
        metadata.insert("retailer".to_owned(), Value::String(self.retailer.clone()));
        if let Some(rating) = sd.and_then(|p| p.rating) {
            metadata.insert("rating".to_owned(), Value::from(rating));
        }
        if let Some(count) = sd.and_then(|p| p.review_count) {
            metadata.insert("review_count".to_owned(), Value::from(count));
        }
        self.hooks.extra_metadata(&doc, sd, &mut metadata);

        Some(ProductDetails {
            description: sd
                .and_then(|p| p.description.clone())
                .or_else(|| select_text(&doc, &s.description)),
            brand,
            price_pence,
            original_price_pence: self.price_from_selectors(&doc, &s.original_price),
            currency: sd
                .and_then(|p| p.currency.clone())
                .filter(|c| is_currency_code(c))
                .unwrap_or_else(|| self.currency.clone()),
            weight_grams,
            quantity: parse_quantity(&title, &self.quantity_patterns),
            images: self.collect_images(&doc, sd, source_url),
            ingredients: select_text(&doc, &s.ingredients),
            nutritional_info: self.nutrition_table(&doc),
            in_stock: self.resolve_stock(&doc, sd),
            stock_quantity: select_text(&doc, &s.stock_quantity).and_then(|t| {
                FIRST_INTEGER
                    .find(&t)
                    .and_then(|m| m.as_str().parse::<u32>().ok())
            }),
            external_id: sd
                .and_then(|p| p.sku.clone())
                .or_else(|| select_attr(&doc, &s.external_id, &EXTERNAL_ID_ATTRIBUTES))
                .or_else(|| select_text(&doc, &s.external_id)),
            category: sd
                .and_then(|p| p.category.clone())
                .or_else(|| category_from_crumbs(&crumbs)),
            barcode: sd.and_then(|p| p.gtin.clone()),
            metadata,
            title,
        })
    }

    fn price_from_selectors(&self, doc: &Html, selectors: &[String]) -> Option<i64> {
        let price = select_first_where(doc, selectors, |el| price_from_element(*el).is_some())
            .and_then(price_from_element);
        if price.is_none() && !selectors.is_empty() {
            tracing::debug!(retailer = %self.retailer, "no price selector matched");
        }
        price
    }

    /// Structured data, then brand selectors (attributes before text), then
    /// the breadcrumb hook, then the title heuristic.
    fn resolve_brand(
        &self,
        doc: &Html,
        sd: Option<&StructuredProduct>,
        crumbs: &[String],
        title: &str,
    ) -> Option<String> {
        let s = &self.selectors;
        let attrs: Vec<&str> = s.brand_attributes.iter().map(String::as_str).collect();

        sd.and_then(|p| p.brand.clone())
            .or_else(|| {
                if attrs.is_empty() {
                    None
                } else {
                    select_attr(doc, &s.brand, &attrs)
                }
            })
            .or_else(|| select_text(doc, &s.brand))
            .or_else(|| self.hooks.brand_from_breadcrumbs(crumbs))
            .or_else(|| {
                if title == UNKNOWN_PRODUCT_TITLE {
                    None
                } else {
                    brand_from_title(title, &s.brand_heuristic)
                }
            })
    }

    /// Structured availability wins outright; otherwise explicit stock
    /// markers are consulted, and no signal at all means in stock.
    fn resolve_stock(&self, doc: &Html, sd: Option<&StructuredProduct>) -> bool {
        if let Some(in_stock) = sd.and_then(|p| p.in_stock) {
            return in_stock;
        }
        let s = &self.selectors;
        if any_matches(doc, &s.out_of_stock) {
            return false;
        }
        if any_matches(doc, &s.in_stock) || any_matches(doc, &s.add_to_cart) {
            return true;
        }
        true
    }

    fn collect_images(
        &self,
        doc: &Html,
        sd: Option<&StructuredProduct>,
        source_url: &str,
    ) -> Vec<String> {
        let from_dom = select_all(doc, &self.selectors.image)
            .into_iter()
            .flat_map(|el| {
                IMAGE_ATTRIBUTES
                    .iter()
                    .filter_map(move |attr| el.value().attr(attr))
                    .map(str::to_owned)
                    .collect::<Vec<_>>()
            });

        let mut seen = HashSet::new();
        sd.map(|p| p.images.clone())
            .unwrap_or_default()
            .into_iter()
            .chain(from_dom)
            .filter(|raw| !is_placeholder(raw))
            .filter_map(|raw| resolve_url(source_url, &raw))
            .filter(|url| !is_placeholder(url))
            .filter(|url| seen.insert(url.clone()))
            .collect()
    }

    /// Reads two-column rows (`th`/`td`, `dt`/`dd`) into a label → value map.
    fn nutrition_table(&self, doc: &Html) -> Option<BTreeMap<String, String>> {
        let table: BTreeMap<String, String> = select_all(doc, &self.selectors.nutrition_rows)
            .into_iter()
            .filter_map(|row| {
                let mut cells = row
                    .select(&TABLE_CELLS)
                    .map(element_text)
                    .filter(|t| !t.is_empty());
                let label = cells.next()?;
                let value = cells.next()?;
                Some((label.trim_end_matches(':').to_owned(), value))
            })
            .collect();
        (!table.is_empty()).then_some(table)
    }
}

impl Extractor for DetailsExtractor {
    fn name(&self) -> &str {
        "details"
    }

    fn can_handle(&self, url: &str) -> bool {
        url_matches(&self.url_patterns, url)
    }

    fn extract<'a>(&'a self, html: &str, source_url: &str) -> RecordIter<'a> {
        let html = html.to_owned();
        let source_url = source_url.to_owned();
        Box::new(
            std::iter::once_with(move || self.extract_details(&html, &source_url))
                .flatten()
                .map(CrawlRecord::Details),
        )
    }
}

fn is_placeholder(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("data:") || PLACEHOLDER_MARKERS.iter().any(|m| lower.contains(m))
}

fn is_currency_code(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase())
}

/// The crumb before the last one; the last crumb is usually the product.
fn category_from_crumbs(crumbs: &[String]) -> Option<String> {
    match crumbs.len() {
        0 => None,
        1 => crumbs.first().cloned(),
        n => crumbs.get(n - 2).cloned(),
    }
}

#[cfg(test)]
#[path = "details_test.rs"]
mod tests;
