//! Store retry logic
//!
//! Busy errors from the store are transient lock contention; everything
//! else fails immediately. Backoff starts at 10ms and doubles up to 1s,
//! bounded by a total wait budget.

use crate::db::{StoreError, StoreResult};
use std::time::{Duration, Instant};

/// Retry a store operation while it reports Busy, up to `max_wait_ms` total.
///
/// Non-busy errors are returned immediately without retrying.
pub async fn retry_busy<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = StoreResult<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = 10u64;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Store operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if err.is_busy() => {
                let elapsed = start_time.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        max_wait_ms,
                        "Store busy retries exhausted"
                    );
                    return Err(err);
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Store busy, retrying after backoff"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(1000);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let result = retry_busy("op", 1000, || async { Ok::<_, StoreError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_retries_until_busy_clears() {
        let attempts = AtomicU32::new(0);
        let result = retry_busy("op", 5000, || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StoreError::Busy("database is locked".to_string()))
            } else {
                Ok(99)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 99);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_busy_errors_fail_immediately() {
        let attempts = AtomicU32::new(0);
        let result: StoreResult<i32> = retry_busy("op", 5000, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Io("disk full".to_string()))
        })
        .await;
        assert!(matches!(result, Err(StoreError::Io(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let result: StoreResult<i32> = retry_busy("op", 30, || async {
            Err(StoreError::Busy("database is locked".to_string()))
        })
        .await;
        assert!(matches!(result, Err(StoreError::Busy(_))));
    }
}
