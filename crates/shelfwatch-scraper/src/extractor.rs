use regex::Regex;
use shelfwatch_core::CrawlRecord;

use crate::error::ScraperError;

/// Lazily produced records for one page.
pub type RecordIter<'a> = Box<dyn Iterator<Item = CrawlRecord> + 'a>;

/// A page-level extraction capability.
///
/// Implementations copy what they need out of `html` up front, so the
/// returned iterator borrows only the extractor itself. The iterator is
/// finite and single-pass.
pub trait Extractor: Send + Sync {
    /// Short label used in logs, e.g. `"details"`.
    fn name(&self) -> &str;

    /// Whether this extractor should run against `url`.
    fn can_handle(&self, url: &str) -> bool;

    fn extract<'a>(&'a self, html: &str, source_url: &str) -> RecordIter<'a>;
}

/// Compiles retailer-supplied regexes, attributing failures to the retailer.
pub(crate) fn compile_patterns(
    retailer: &str,
    patterns: &[String],
) -> Result<Vec<Regex>, ScraperError> {
    patterns
        .iter()
        .map(|p| compile_pattern(retailer, p))
        .collect()
}

pub(crate) fn compile_pattern(retailer: &str, pattern: &str) -> Result<Regex, ScraperError> {
    Regex::new(pattern).map_err(|source| ScraperError::InvalidPattern {
        retailer: retailer.to_owned(),
        pattern: pattern.to_owned(),
        source,
    })
}

pub(crate) fn compile_optional(
    retailer: &str,
    pattern: Option<&str>,
) -> Result<Option<Regex>, ScraperError> {
    pattern.map(|p| compile_pattern(retailer, p)).transpose()
}

/// An empty pattern list accepts every URL.
pub(crate) fn url_matches(patterns: &[Regex], url: &str) -> bool {
    patterns.is_empty() || patterns.iter().any(|re| re.is_match(url))
}
