use std::collections::HashSet;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// One retailer entry from `config/retailers.yaml`.
///
/// Selector tables are data: each retailer lists the selectors it wants tried,
/// in preference order, and the shared extraction pipeline does the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetailerConfig {
    /// Display name, e.g. `"Pets at Home"`.
    pub name: String,
    /// Explicit slug override. When absent the slug is derived from `name`.
    #[serde(default)]
    pub slug: Option<String>,
    /// Storefront root, e.g. `"https://www.petsathome.com"`.
    pub base_url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Courtesy delay observed after each crawl of this retailer.
    #[serde(default)]
    pub request_delay_ms: Option<u64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub details: Option<DetailsSelectors>,
    #[serde(default)]
    pub listing: Option<ListingSelectors>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl RetailerConfig {
    /// The canonical retailer key used by every cache and event.
    #[must_use]
    pub fn slug(&self) -> String {
        self.slug
            .as_deref()
            .map_or_else(|| slugify(&self.name), slugify)
    }
}

/// Generate a URL-safe slug from a display name.
///
/// `"Pets at Home"` becomes `"pets-at-home"` and `"B&M"` becomes `"bm"`.
#[must_use]
pub fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else if c == ' ' {
                '-'
            } else {
                '\0'
            }
        })
        .filter(|&c| c != '\0')
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Selector table for product detail pages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailsSelectors {
    /// Regexes matched against the page URL; empty means "any URL".
    pub url_patterns: Vec<String>,
    /// Selectors whose presence marks a block/CAPTCHA page.
    pub block_selectors: Vec<String>,
    pub title: Vec<String>,
    pub description: Vec<String>,
    pub brand: Vec<String>,
    /// Attributes read from a brand element before falling back to its text.
    pub brand_attributes: Vec<String>,
    pub price: Vec<String>,
    pub original_price: Vec<String>,
    pub weight: Vec<String>,
    pub image: Vec<String>,
    pub out_of_stock: Vec<String>,
    pub in_stock: Vec<String>,
    pub add_to_cart: Vec<String>,
    pub ingredients: Vec<String>,
    /// Row selectors for a two-column nutrition table.
    pub nutrition_rows: Vec<String>,
    pub breadcrumb: Vec<String>,
    pub external_id: Vec<String>,
    pub stock_quantity: Vec<String>,
    /// Regexes whose first capture group is a pack count.
    pub quantity_patterns: Vec<String>,
    pub brand_heuristic: BrandHeuristicConfig,
}

/// Tuning for the "first word of the title is the brand" fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrandHeuristicConfig {
    /// A candidate word must be strictly longer than this.
    pub min_length: usize,
    /// Extra stop words merged with the built-in generic list.
    pub stop_words: Vec<String>,
    /// Join the first two words when both look like brand words.
    pub combine_two_words: bool,
}

impl Default for BrandHeuristicConfig {
    fn default() -> Self {
        Self {
            min_length: 2,
            stop_words: Vec::new(),
            combine_two_words: false,
        }
    }
}

/// Selector table for category/listing pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingSelectors {
    /// Regexes matched against the page URL; empty means "any URL".
    pub url_patterns: Vec<String>,
    pub block_selectors: Vec<String>,
    /// Anchor selectors scanned for candidate product links.
    pub link: Vec<String>,
    /// Regex an absolute URL must match to count as a product page.
    pub product_url_pattern: Option<String>,
    /// Regex whose first capture group is the retailer's product id.
    pub product_id_pattern: Option<String>,
    /// Regex whose first capture group is the category slug.
    pub category_pattern: Option<String>,
    /// Prefer the product URL over the listing URL when inferring category.
    pub category_from_product_url: bool,
    /// Drop query string, fragment and trailing slash from product URLs.
    pub strip_query: bool,
    pub pagination: Option<PaginationSelectors>,
    /// Regex over inline `<script>` text whose first capture group is a
    /// product URL or path.
    pub script_url_pattern: Option<String>,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            url_patterns: Vec::new(),
            block_selectors: Vec::new(),
            link: vec!["a[href]".to_owned()],
            product_url_pattern: None,
            product_id_pattern: None,
            category_pattern: None,
            category_from_product_url: false,
            strip_query: true,
            pagination: None,
            script_url_pattern: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationSelectors {
    /// Selectors for the "next page" anchor.
    pub next: Vec<String>,
    /// Query parameter carrying the page number.
    pub page_param: String,
}

impl Default for PaginationSelectors {
    fn default() -> Self {
        Self {
            next: vec!["a[rel=next]".to_owned()],
            page_param: "page".to_owned(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RetailersFile {
    pub retailers: Vec<RetailerConfig>,
}

impl RetailersFile {
    /// Looks up a retailer by slug.
    #[must_use]
    pub fn find(&self, slug: &str) -> Option<&RetailerConfig> {
        self.retailers.iter().find(|r| r.slug() == slug)
    }

    /// Retailers with `enabled: true`.
    pub fn enabled(&self) -> impl Iterator<Item = &RetailerConfig> {
        self.retailers.iter().filter(|r| r.enabled)
    }
}

/// Load and validate retailer selector tables from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_retailers(path: &Path) -> Result<RetailersFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::RetailersFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_retailers(&content)
}

/// Parse and validate retailer selector tables from YAML text.
///
/// # Errors
///
/// Returns `ConfigError` if the YAML is malformed or fails validation.
pub fn parse_retailers(content: &str) -> Result<RetailersFile, ConfigError> {
    let retailers_file: RetailersFile = serde_yaml::from_str(content)?;
    validate_retailers(&retailers_file)?;
    Ok(retailers_file)
}

fn validate_retailers(retailers_file: &RetailersFile) -> Result<(), ConfigError> {
    let mut seen_slugs = HashSet::new();

    for retailer in &retailers_file.retailers {
        if retailer.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "retailer name must be non-empty".to_string(),
            ));
        }

        let slug = retailer.slug();
        if slug.is_empty() {
            return Err(ConfigError::Validation(format!(
                "retailer '{}' produces an empty slug",
                retailer.name
            )));
        }
        if !seen_slugs.insert(slug.clone()) {
            return Err(ConfigError::Validation(format!(
                "duplicate retailer slug: '{}' (from retailer '{}')",
                slug, retailer.name
            )));
        }

        if !(retailer.base_url.starts_with("http://") || retailer.base_url.starts_with("https://"))
        {
            return Err(ConfigError::Validation(format!(
                "retailer '{}' base_url must be an absolute http(s) URL",
                retailer.name
            )));
        }

        if let Some(currency) = &retailer.currency {
            if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
                return Err(ConfigError::Validation(format!(
                    "retailer '{}' has invalid currency '{currency}'; expected a 3-letter code",
                    retailer.name
                )));
            }
        }

        if let Some(details) = &retailer.details {
            let patterns = details
                .url_patterns
                .iter()
                .chain(details.quantity_patterns.iter());
            for pattern in patterns {
                check_regex(&retailer.name, pattern)?;
            }
        }

        if let Some(listing) = &retailer.listing {
            let patterns = listing.url_patterns.iter().chain(
                [
                    &listing.product_url_pattern,
                    &listing.product_id_pattern,
                    &listing.category_pattern,
                    &listing.script_url_pattern,
                ]
                .into_iter()
                .flatten(),
            );
            for pattern in patterns {
                check_regex(&retailer.name, pattern)?;
            }
            if listing.link.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "retailer '{}' listing config needs at least one link selector",
                    retailer.name
                )));
            }
        }
    }

    Ok(())
}

fn check_regex(retailer: &str, pattern: &str) -> Result<(), ConfigError> {
    Regex::new(pattern).map(|_| ()).map_err(|e| {
        ConfigError::Validation(format!(
            "retailer '{retailer}' has invalid pattern '{pattern}': {e}"
        ))
    })
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
#[path = "retailers_test.rs"]
mod tests;
