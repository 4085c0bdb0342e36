use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited by {domain} (retry after {retry_after_secs}s)")]
    RateLimited {
        domain: String,
        retry_after_secs: u64,
    },

    #[error("page not found: {url}")]
    NotFound { url: String },

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("invalid URL \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid extractor pattern '{pattern}' for {retailer}: {source}")]
    InvalidPattern {
        retailer: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("crawl of {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },
}

impl ScraperError {
    /// HTTP status associated with the failure, when there was one.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ScraperError::Http(e) => e.status().map(|s| s.as_u16()),
            ScraperError::RateLimited { .. } => Some(429),
            ScraperError::NotFound { .. } => Some(404),
            ScraperError::UnexpectedStatus { status, .. } => Some(*status),
            ScraperError::InvalidUrl { .. }
            | ScraperError::InvalidPattern { .. }
            | ScraperError::Timeout { .. } => None,
        }
    }
}
