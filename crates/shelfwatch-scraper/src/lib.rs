pub mod brand;
pub mod client;
pub mod crawler;
pub mod details;
pub mod error;
pub mod extractor;
pub mod jsonld;
pub mod listing;
pub mod pagination;
pub mod price;
pub mod retry;
pub mod selector;
pub mod urls;
pub mod weight;

pub use client::{FetchOptions, HtmlFetcher, HttpFetcher};
pub use crawler::Crawler;
pub use details::{DefaultDetailsHooks, DetailsExtractor, DetailsHooks};
pub use error::ScraperError;
pub use extractor::{Extractor, RecordIter};
pub use jsonld::{first_product, StructuredProduct};
pub use listing::{DefaultListingHooks, ListingHooks, ListingRules, ListingUrlExtractor};
pub use price::parse_price_to_pence;
pub use retry::{is_retriable, retry_with_fixed_backoff, Attempted, RetryPolicy};
pub use selector::{select_all, select_attr, select_first, select_text};
pub use weight::{parse_quantity, parse_weight_grams};
