//! Fixed-backoff retry for crawl attempts.
//!
//! The crawler itself never retries; the job layer wraps each logical crawl
//! in [`retry_with_fixed_backoff`] and reports a single outcome however many
//! attempts it took.

use std::future::Future;
use std::time::Duration;

use crate::error::ScraperError;

/// Attempt budget and the constant delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

/// Final result of a retried operation plus how many attempts were made.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, ScraperError>,
    pub attempts: u32,
}

/// Returns `true` if `err` is transient and worth another attempt.
///
/// Rate limiting, transport failures, timeouts and 5xx responses are
/// retried. A 404, other 4xx statuses and configuration errors are not.
#[must_use]
pub fn is_retriable(err: &ScraperError) -> bool {
    match err {
        ScraperError::RateLimited { .. } | ScraperError::Http(_) | ScraperError::Timeout { .. } => {
            true
        }
        ScraperError::UnexpectedStatus { status, .. } => *status >= 500,
        ScraperError::NotFound { .. }
        | ScraperError::InvalidUrl { .. }
        | ScraperError::InvalidPattern { .. } => false,
    }
}

/// Runs `operation` until it succeeds, fails with a non-retriable error, or
/// the attempt budget is spent, sleeping `policy.backoff` between attempts.
pub async fn retry_with_fixed_backoff<T, F, Fut>(
    policy: RetryPolicy,
    mut operation: F,
) -> Attempted<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ScraperError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(err) => {
                if !is_retriable(&err) || attempt >= max_attempts {
                    return Attempted {
                        result: Err(err),
                        attempts: attempt,
                    };
                }
                tracing::warn!(
                    attempt,
                    max_attempts,
                    backoff_secs = policy.backoff.as_secs(),
                    error = %err,
                    "crawl attempt failed, retrying after fixed backoff"
                );
            }
        }

        tokio::time::sleep(policy.backoff).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn rate_limited() -> ScraperError {
        ScraperError::RateLimited {
            domain: "shop.example".to_owned(),
            retry_after_secs: 0,
        }
    }

    fn no_wait(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO)
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let outcome =
            retry_with_fixed_backoff(no_wait(3), |_| async { Ok::<_, ScraperError>(7) }).await;
        assert_eq!(outcome.result.unwrap(), 7);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let outcome = retry_with_fixed_backoff(no_wait(3), move |_| {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(rate_limited())
                } else {
                    Ok("html")
                }
            }
        })
        .await;
        assert_eq!(outcome.result.unwrap(), "html");
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausting_budget_returns_last_error_once() {
        let outcome = retry_with_fixed_backoff(no_wait(3), |attempt| async move {
            Err::<(), _>(ScraperError::UnexpectedStatus {
                status: 503,
                url: format!("https://shop.example/?attempt={attempt}"),
            })
        })
        .await;
        assert_eq!(outcome.attempts, 3);
        match outcome.result {
            Err(ScraperError::UnexpectedStatus { url, .. }) => {
                assert!(url.ends_with("attempt=3"));
            }
            other => panic!("expected 503 error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let outcome = retry_with_fixed_backoff(no_wait(5), |_| async {
            Err::<(), _>(ScraperError::NotFound {
                url: "https://shop.example/p/gone".to_owned(),
            })
        })
        .await;
        assert_eq!(outcome.attempts, 1);
        assert!(matches!(outcome.result, Err(ScraperError::NotFound { .. })));
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let outcome =
            retry_with_fixed_backoff(no_wait(0), |_| async { Err::<(), _>(rate_limited()) }).await;
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_fixed_backoff_between_attempts() {
        let start = tokio::time::Instant::now();
        let outcome = retry_with_fixed_backoff(
            RetryPolicy::new(3, Duration::from_secs(30)),
            |_| async { Err::<(), _>(rate_limited()) },
        )
        .await;
        assert_eq!(outcome.attempts, 3);
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[test]
    fn client_errors_are_not_retriable() {
        assert!(!is_retriable(&ScraperError::UnexpectedStatus {
            status: 403,
            url: String::new(),
        }));
        assert!(is_retriable(&ScraperError::Timeout {
            url: String::new(),
            timeout_secs: 30,
        }));
    }
}
