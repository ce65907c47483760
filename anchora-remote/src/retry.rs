//! Bounded retry with exponential backoff for remote calls

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::{ApiError, Result};

/// Retry budget for a single logical remote operation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

/// Run `op` until it succeeds, fails non-retriably, or the budget runs out.
///
/// Backoff doubles per attempt; a rate-limit response with an explicit
/// `retry_after` overrides the computed delay.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retriable() && attempt < policy.max_retries => {
                let wait = match &err {
                    ApiError::RateLimited {
                        retry_after: Some(delay),
                    } => *delay,
                    _ => backoff,
                };
                attempt += 1;
                debug!(
                    operation = what,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    "retrying after transient failure: {}",
                    err
                );
                tokio::time::sleep(wait).await;
                backoff = backoff.saturating_mul(2);
            }
            Err(err) => {
                if err.is_retriable() {
                    warn!(operation = what, "retry budget exhausted: {}", err);
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&quick_policy(), "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ApiError::Transient("flaky".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&quick_policy(), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ApiError::Transient("down".into())) }
        })
        .await;
        assert!(matches!(result, Err(ApiError::Transient(_))));
        // Initial attempt plus three retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retriable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&quick_policy(), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ApiError::Unauthorized("expired".into())) }
        })
        .await;
        assert!(matches!(result, Err(ApiError::Unauthorized(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
