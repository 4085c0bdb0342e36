use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Title emitted when neither structured data nor any title selector resolves.
pub const UNKNOWN_PRODUCT_TITLE: &str = "Unknown Product";

/// ISO 4217 code assumed when a page does not declare one.
pub const DEFAULT_CURRENCY: &str = "GBP";

/// Structured product data extracted from a single product detail page.
///
/// Built once per extraction pass and handed straight to persistence; it is
/// never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDetails {
    /// Product name. [`UNKNOWN_PRODUCT_TITLE`] when unresolvable.
    pub title: String,
    pub description: Option<String>,
    pub brand: Option<String>,
    /// Current price in pence. `0` means the price could not be resolved;
    /// there is no concept of a free product.
    pub price_pence: i64,
    /// Pre-discount price in pence, when the page shows one.
    pub original_price_pence: Option<i64>,
    /// ISO 4217 currency code, e.g. `"GBP"`.
    pub currency: String,
    /// Per-unit weight in grams (millilitres are treated as grams).
    pub weight_grams: Option<u32>,
    /// Pack count, e.g. `12` for `"12 x 400g"`.
    pub quantity: Option<u32>,
    /// Absolute image URLs, deduplicated, in first-seen order.
    pub images: Vec<String>,
    pub ingredients: Option<String>,
    pub nutritional_info: Option<BTreeMap<String, String>>,
    /// Defaults to `true` when no stock signal is present on the page.
    pub in_stock: bool,
    pub stock_quantity: Option<u32>,
    /// Retailer SKU.
    pub external_id: Option<String>,
    pub category: Option<String>,
    pub barcode: Option<String>,
    /// Open retailer-specific extras. Always carries `source_url`,
    /// `extracted_at` and `retailer`.
    pub metadata: Map<String, Value>,
}

impl ProductDetails {
    /// Returns `true` when the price resolved to a real value.
    #[must_use]
    pub fn has_price(&self) -> bool {
        self.price_pence > 0
    }

    /// Returns `true` when the original price is strictly above the current one.
    #[must_use]
    pub fn is_discounted(&self) -> bool {
        self.original_price_pence
            .is_some_and(|original| self.has_price() && original > self.price_pence)
    }
}

/// A product page URL discovered on a listing/category page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductListingUrl {
    /// Absolute, normalized product URL.
    pub url: String,
    /// Retailer slug, e.g. `"pets-corner"`.
    pub retailer: String,
    pub category: Option<String>,
    /// Discovery provenance: `source_url` and `discovered_at`.
    pub metadata: Map<String, Value>,
}

impl ProductListingUrl {
    #[must_use]
    pub fn new(
        url: String,
        retailer: &str,
        category: Option<String>,
        source_url: &str,
        discovered_at: DateTime<Utc>,
    ) -> Self {
        let mut metadata = Map::new();
        metadata.insert("source_url".to_owned(), Value::String(source_url.to_owned()));
        metadata.insert(
            "discovered_at".to_owned(),
            Value::String(discovered_at.to_rfc3339()),
        );
        Self {
            url,
            retailer: retailer.to_owned(),
            category,
            metadata,
        }
    }
}

/// The single "next page" successor discovered on a listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginatedUrl {
    pub url: String,
    pub retailer: String,
    /// 1-based page number of `url`.
    pub page: u32,
    pub category: Option<String>,
    pub discovered_from: String,
}

/// Everything an extractor can emit for one page.
///
/// Product URLs and pagination URLs are kept as separate variants so the two
/// streams never share a key space when multiplexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CrawlRecord {
    Details(ProductDetails),
    Listing(ProductListingUrl),
    NextPage(PaginatedUrl),
}

impl CrawlRecord {
    /// Short label used in logs and CLI output.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            CrawlRecord::Details(_) => "details",
            CrawlRecord::Listing(_) => "listing",
            CrawlRecord::NextPage(_) => "next_page",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_details(price_pence: i64, original_price_pence: Option<i64>) -> ProductDetails {
        ProductDetails {
            title: "Royal Canin Maxi Adult 15kg".to_string(),
            description: None,
            brand: Some("Royal Canin".to_string()),
            price_pence,
            original_price_pence,
            currency: DEFAULT_CURRENCY.to_string(),
            weight_grams: Some(15_000),
            quantity: None,
            images: vec![],
            ingredients: None,
            nutritional_info: None,
            in_stock: true,
            stock_quantity: None,
            external_id: Some("RC-15".to_string()),
            category: Some("dog-food".to_string()),
            barcode: None,
            metadata: Map::new(),
        }
    }

    #[test]
    fn has_price_false_for_unresolved_sentinel() {
        assert!(!make_details(0, None).has_price());
    }

    #[test]
    fn is_discounted_when_original_above_current() {
        assert!(make_details(5999, Some(6999)).is_discounted());
    }

    #[test]
    fn is_discounted_false_when_price_unresolved() {
        assert!(!make_details(0, Some(6999)).is_discounted());
    }

    #[test]
    fn is_discounted_false_when_original_equal() {
        assert!(!make_details(5999, Some(5999)).is_discounted());
    }

    #[test]
    fn listing_url_records_provenance() {
        let at = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let listing = ProductListingUrl::new(
            "https://shop.example/p/1".to_string(),
            "example",
            None,
            "https://shop.example/c/dog",
            at,
        );
        assert_eq!(
            listing.metadata.get("source_url").and_then(Value::as_str),
            Some("https://shop.example/c/dog")
        );
        assert_eq!(
            listing.metadata.get("discovered_at").and_then(Value::as_str),
            Some("2026-01-02T03:04:05+00:00")
        );
    }

    #[test]
    fn crawl_record_serializes_with_kind_tag() {
        let record = CrawlRecord::NextPage(PaginatedUrl {
            url: "https://shop.example/c/dog?page=2".to_string(),
            retailer: "example".to_string(),
            page: 2,
            category: Some("dog".to_string()),
            discovered_from: "https://shop.example/c/dog".to_string(),
        });
        let json = serde_json::to_value(&record).expect("serialization failed");
        assert_eq!(json["kind"], "next_page");
        assert_eq!(json["page"], 2);
        assert_eq!(record.kind(), "next_page");
    }

    #[test]
    fn serde_roundtrip_details() {
        let details = make_details(1299, Some(1499));
        let json = serde_json::to_string(&details).expect("serialization failed");
        let decoded: ProductDetails = serde_json::from_str(&json).expect("deserialization failed");
        assert_eq!(decoded, details);
    }
}
