//! schema.org `Product` extraction from JSON-LD script blocks.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::price::{parse_decimal_pounds, pounds_to_pence};

static SCRIPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<script[^>]+type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script>"#)
        .expect("valid regex")
});

const GTIN_KEYS: [&str; 5] = ["gtin13", "gtin", "gtin8", "gtin12", "gtin14"];

/// The fields of a JSON-LD `Product` node the details pipeline consumes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredProduct {
    pub name: Option<String>,
    pub description: Option<String>,
    pub brand: Option<String>,
    pub price_pence: Option<i64>,
    pub currency: Option<String>,
    pub images: Vec<String>,
    /// `Some(false)` for `OutOfStock`/`SoldOut`, `Some(true)` for `InStock`.
    pub in_stock: Option<bool>,
    /// Offer name, often the variant label carrying the pack weight.
    pub offer_name: Option<String>,
    pub sku: Option<String>,
    pub gtin: Option<String>,
    pub category: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u64>,
}

/// Returns every `Product` node on the page, in document order.
///
/// Accepts top-level objects, arrays and `@graph` containers; `@type` may be a
/// string or an array of strings. Malformed blocks are skipped.
#[must_use]
pub fn extract_products(html: &str) -> Vec<StructuredProduct> {
    let mut products = Vec::new();

    for cap in SCRIPT.captures_iter(html) {
        let Some(json_text) = cap.get(1).map(|m| m.as_str()) else {
            continue;
        };
        let value: Value = match serde_json::from_str(json_text.trim()) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "skipping malformed JSON-LD block");
                continue;
            }
        };

        let mut candidates: Vec<&Value> = match &value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        let graphs: Vec<&Value> = candidates
            .iter()
            .filter_map(|item| item.get("@graph").and_then(Value::as_array))
            .flatten()
            .collect();
        candidates.extend(graphs);

        products.extend(
            candidates
                .into_iter()
                .filter(|item| is_product(item))
                .map(to_structured_product),
        );
    }

    products
}

/// The first `Product` node on the page, if any.
#[must_use]
pub fn first_product(html: &str) -> Option<StructuredProduct> {
    extract_products(html).into_iter().next()
}

fn is_product(item: &Value) -> bool {
    match item.get("@type") {
        Some(Value::String(s)) => s.eq_ignore_ascii_case("Product"),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|s| s.eq_ignore_ascii_case("Product")),
        _ => false,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_structured_product(item: &Value) -> StructuredProduct {
    let offer = first_offer(item);

    let price_pence = offer
        .and_then(|o| o.get("price").or_else(|| o.get("lowPrice")))
        .and_then(json_price_to_pence)
        .filter(|p| *p > 0);

    let gtin = GTIN_KEYS
        .iter()
        .find_map(|key| item.get(*key).and_then(scalar_string));

    let rating = item.get("aggregateRating");

    StructuredProduct {
        name: item.get("name").and_then(scalar_string),
        description: item.get("description").and_then(scalar_string),
        brand: item.get("brand").and_then(named_string),
        price_pence,
        currency: offer
            .and_then(|o| o.get("priceCurrency"))
            .and_then(scalar_string)
            .map(|c| c.to_ascii_uppercase()),
        images: item.get("image").map(image_urls).unwrap_or_default(),
        in_stock: offer
            .and_then(|o| o.get("availability"))
            .and_then(Value::as_str)
            .and_then(availability_to_stock),
        offer_name: offer.and_then(|o| o.get("name")).and_then(scalar_string),
        sku: item.get("sku").and_then(scalar_string),
        gtin,
        category: item.get("category").and_then(named_string),
        rating: rating
            .and_then(|r| r.get("ratingValue"))
            .and_then(json_f64),
        review_count: rating
            .and_then(|r| r.get("reviewCount").or_else(|| r.get("ratingCount")))
            .and_then(json_f64)
            .filter(|n| *n >= 0.0)
            .map(|n| n.round() as u64),
    }
}

/// `offers` may be a single offer, an array of offers or an `AggregateOffer`.
fn first_offer(item: &Value) -> Option<&Value> {
    match item.get("offers")? {
        Value::Array(offers) => offers.first(),
        offer @ Value::Object(_) => Some(offer),
        _ => None,
    }
}

/// Maps a schema.org availability URL to a stock flag.
fn availability_to_stock(availability: &str) -> Option<bool> {
    if availability.contains("OutOfStock")
        || availability.contains("SoldOut")
        || availability.contains("Discontinued")
    {
        Some(false)
    } else if availability.contains("InStock") || availability.contains("LimitedAvailability") {
        Some(true)
    } else {
        None
    }
}

/// Structured data prices are always in major units.
fn json_price_to_pence(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_f64().and_then(pounds_to_pence),
        Value::String(s) => parse_decimal_pounds(s),
        _ => None,
    }
}

fn json_f64(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
}

fn scalar_string(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_owned(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

/// Accepts `"Acme"`, `{"name": "Acme"}` or an array of either.
fn named_string(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => items.iter().find_map(named_string),
        Value::Object(_) => value.get("name").and_then(scalar_string),
        other => scalar_string(other),
    }
}

/// Accepts a URL string, an `ImageObject` with `url`/`contentUrl`, or an
/// array mixing both.
fn image_urls(value: &Value) -> Vec<String> {
    let urls = match value {
        Value::String(url) => vec![url.trim().to_owned()],
        Value::Array(items) => items.iter().flat_map(image_urls).collect(),
        Value::Object(_) => value
            .get("url")
            .or_else(|| value.get("contentUrl"))
            .and_then(Value::as_str)
            .map(|u| vec![u.trim().to_owned()])
            .unwrap_or_default(),
        _ => Vec::new(),
    };
    urls.into_iter().filter(|u| !u.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(json: &str) -> String {
        format!(
            r#"<html><head><script type="application/ld+json">{json}</script></head><body></body></html>"#
        )
    }

    #[test]
    fn reads_basic_product() {
        let html = wrap(
            r#"{
              "@context": "https://schema.org",
              "@type": "Product",
              "name": "Lily's Kitchen Chicken Casserole 400g",
              "description": "Complete wet food",
              "brand": {"@type": "Brand", "name": "Lily's Kitchen"},
              "sku": "LK-400",
              "gtin13": "5060184240123",
              "image": "https://cdn.example/lk.jpg",
              "offers": {
                "@type": "Offer",
                "price": "2.75",
                "priceCurrency": "gbp",
                "availability": "https://schema.org/InStock"
              },
              "aggregateRating": {"ratingValue": "4.6", "reviewCount": 212}
            }"#,
        );
        let product = first_product(&html).unwrap();
        assert_eq!(
            product.name.as_deref(),
            Some("Lily's Kitchen Chicken Casserole 400g")
        );
        assert_eq!(product.brand.as_deref(), Some("Lily's Kitchen"));
        assert_eq!(product.price_pence, Some(275));
        assert_eq!(product.currency.as_deref(), Some("GBP"));
        assert_eq!(product.in_stock, Some(true));
        assert_eq!(product.sku.as_deref(), Some("LK-400"));
        assert_eq!(product.gtin.as_deref(), Some("5060184240123"));
        assert_eq!(product.images, vec!["https://cdn.example/lk.jpg"]);
        assert_eq!(product.rating, Some(4.6));
        assert_eq!(product.review_count, Some(212));
    }

    #[test]
    fn expands_graph_container() {
        let html = wrap(
            r#"{"@graph": [
                {"@type": "BreadcrumbList"},
                {"@type": ["Product", "Thing"], "name": "Graph Product",
                 "offers": [{"price": 15, "availability": "OutOfStock"}]}
            ]}"#,
        );
        let product = first_product(&html).unwrap();
        assert_eq!(product.name.as_deref(), Some("Graph Product"));
        assert_eq!(product.price_pence, Some(1500));
        assert_eq!(product.in_stock, Some(false));
    }

    #[test]
    fn numeric_price_is_major_units() {
        let html = wrap(r#"{"@type": "Product", "offers": {"price": 12.99}}"#);
        assert_eq!(first_product(&html).unwrap().price_pence, Some(1299));
    }

    #[test]
    fn zero_price_is_unresolved() {
        let html = wrap(r#"{"@type": "Product", "offers": {"price": "0.00"}}"#);
        assert_eq!(first_product(&html).unwrap().price_pence, None);
    }

    #[test]
    fn collects_mixed_image_forms() {
        let html = wrap(
            r#"{"@type": "Product", "image": [
                "https://cdn.example/a.jpg",
                {"@type": "ImageObject", "url": "https://cdn.example/b.jpg"},
                {"contentUrl": "https://cdn.example/c.jpg"}
            ]}"#,
        );
        assert_eq!(
            first_product(&html).unwrap().images,
            vec![
                "https://cdn.example/a.jpg",
                "https://cdn.example/b.jpg",
                "https://cdn.example/c.jpg"
            ]
        );
    }

    #[test]
    fn skips_malformed_blocks_and_non_products() {
        let html = format!(
            "{}{}",
            wrap("{not json"),
            wrap(r#"{"@type": "Organization", "name": "Shop"}"#)
        );
        assert!(extract_products(&html).is_empty());
    }

    #[test]
    fn top_level_array_is_accepted() {
        let html = wrap(r#"[{"@type": "WebSite"}, {"@type": "product", "name": "Arr"}]"#);
        assert_eq!(first_product(&html).unwrap().name.as_deref(), Some("Arr"));
    }

    #[test]
    fn unknown_availability_is_no_signal() {
        assert_eq!(availability_to_stock("https://schema.org/PreOrder"), None);
        assert_eq!(availability_to_stock("http://schema.org/SoldOut"), Some(false));
    }
}
