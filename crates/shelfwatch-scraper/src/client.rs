use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::{Client, StatusCode};

use crate::error::ScraperError;
use crate::urls::extract_domain;

const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Per-request options passed through to the fetcher.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Extra headers, applied after the fetcher's defaults.
    pub headers: Vec<(String, String)>,
    /// Overrides the client-wide request timeout.
    pub timeout: Option<Duration>,
}

impl FetchOptions {
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }
}

/// The HTML fetch collaborator used by [`crate::Crawler`].
#[async_trait]
pub trait HtmlFetcher: Send + Sync {
    /// Fetches `url` and returns the response body.
    ///
    /// # Errors
    ///
    /// Any transport failure or non-2xx status is an error; implementations
    /// do not retry.
    async fn fetch_html(&self, url: &str, options: &FetchOptions) -> Result<String, ScraperError>;

    /// Status code of the most recent response, if any request completed.
    fn last_status_code(&self) -> Option<u16>;
}

/// [`HtmlFetcher`] over `reqwest`.
///
/// Maps 404 to [`ScraperError::NotFound`], 429 to
/// [`ScraperError::RateLimited`] (honouring `Retry-After`) and any other
/// non-2xx to [`ScraperError::UnexpectedStatus`].
#[derive(Debug)]
pub struct HttpFetcher {
    client: Client,
    last_status: AtomicU16,
}

impl HttpFetcher {
    /// Creates a fetcher with the given timeout and `User-Agent`.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(timeout_secs: u64, user_agent: &str) -> Result<Self, ScraperError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT, HeaderValue::from_static(HTML_ACCEPT));
        default_headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-GB,en;q=0.9"));

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            .default_headers(default_headers)
            .build()?;
        Ok(Self {
            client,
            last_status: AtomicU16::new(0),
        })
    }
}

#[async_trait]
impl HtmlFetcher for HttpFetcher {
    async fn fetch_html(&self, url: &str, options: &FetchOptions) -> Result<String, ScraperError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| ScraperError::InvalidUrl {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;

        let mut request = self.client.get(parsed);
        for (name, value) in &options.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => request = request.header(name, value),
                _ => tracing::warn!(header = %name, "ignoring invalid request header"),
            }
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        self.last_status.store(status.as_u16(), Ordering::Relaxed);
        tracing::debug!(url, status = status.as_u16(), "fetched page");

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(ScraperError::RateLimited {
                domain: extract_domain(url),
                retry_after_secs,
            });
        }

        if status == StatusCode::NOT_FOUND {
            return Err(ScraperError::NotFound {
                url: url.to_owned(),
            });
        }

        if !status.is_success() {
            return Err(ScraperError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_owned(),
            });
        }

        Ok(response.text().await?)
    }

    fn last_status_code(&self) -> Option<u16> {
        match self.last_status.load(Ordering::Relaxed) {
            0 => None,
            code => Some(code),
        }
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
