//! Exponential-backoff retry for transient failures.
//!
//! Wraps async operations that talk to the source provider or the LLM API.
//! Only errors classified transient by [`DocstewardError::is_transient`]
//! are retried; permanent errors surface immediately.

use std::time::Duration;

use tracing::{info, warn};

use crate::error::{DocstewardError, Result};

/// Maximum number of retries for transient errors.
const MAX_RETRIES: u32 = 4;

/// Base delay for exponential backoff (1 second).
const BASE_DELAY_SECS: u64 = 1;

/// Run an async operation, retrying transient failures with exponential
/// backoff (1s, 2s, 4s, 8s). Permanent errors return immediately.
pub async fn with_retry<F, Fut, T>(operation_name: &str, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    for attempt in 0..=MAX_RETRIES {
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt, "operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => {
                if attempt < MAX_RETRIES && err.is_transient() {
                    let delay_secs = BASE_DELAY_SECS * 2u64.pow(attempt);
                    warn!(
                        operation = operation_name,
                        attempt,
                        delay_secs,
                        error = %err,
                        "transient error, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                } else {
                    return Err(err);
                }
            }
        }
    }

    // Unreachable: the loop always returns on the final attempt.
    Err(DocstewardError::validation("retry loop exhausted"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry("test_permanent", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DocstewardError::http(Some(404), "not found")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_error_retried_until_success() {
        let calls = AtomicU32::new(0);

        let fut = with_retry("test_transient", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(DocstewardError::http(Some(503), "unavailable"))
                } else {
                    Ok(42u32)
                }
            }
        });

        let result = fut.await;
        assert_eq!(result.expect("eventual success"), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = with_retry("test_exhausted", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DocstewardError::http(Some(429), "rate limited")) }
        })
        .await;

        assert!(result.is_err());
        // Initial attempt plus MAX_RETRIES retries.
        assert_eq!(calls.load(Ordering::SeqCst), MAX_RETRIES + 1);
    }
}
