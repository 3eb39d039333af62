//! Store retry logic for transient failures
//!
//! Provides automatic retry with exponential backoff for store writes that
//! must not be dropped (settlement).

use crate::error::StoreError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

const BASE_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 2_000;

/// Execute a store operation with automatic retry on transient failures
///
/// # Example
/// ```ignore
/// use edgecast_core::store::retry::execute_with_retry;
///
/// execute_with_retry(|| store.atomic(ops.clone()), 3).await?;
/// ```
pub async fn execute_with_retry<F, Fut, T>(f: F, max_attempts: u32) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    execute_with_retry_custom(f, max_attempts, BASE_BACKOFF_MS, MAX_BACKOFF_MS).await
}

/// Execute with retry and custom backoff configuration
pub async fn execute_with_retry_custom<F, Fut, T>(
    mut f: F,
    max_attempts: u32,
    base_backoff_ms: u64,
    max_backoff_ms: u64,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < max_attempts && is_retriable_error(&e) => {
                let backoff_ms = (base_backoff_ms * 2_u64.pow(attempt - 1)).min(max_backoff_ms);
                warn!(
                    "Store operation failed (attempt {}/{}): {}. Retrying in {}ms",
                    attempt, max_attempts, e, backoff_ms
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Check if a store error is retriable
pub fn is_retriable_error(e: &StoreError) -> bool {
    match e {
        StoreError::Unavailable(_) => true,
        StoreError::Serialization(_) | StoreError::Conflict(_) => false,
        StoreError::Redis(err) => {
            err.is_io_error()
                || err.is_timeout()
                || err.is_connection_dropped()
                || err.is_connection_refusal()
                || matches!(
                    err.kind(),
                    redis::ErrorKind::BusyLoadingError | redis::ErrorKind::TryAgain
                )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn serialization_error() -> StoreError {
        StoreError::Serialization(serde_json::from_str::<u32>("nope").unwrap_err())
    }

    #[test]
    fn test_is_retriable_error() {
        assert!(is_retriable_error(&StoreError::Unavailable("down".to_string())));
        assert!(!is_retriable_error(&serialization_error()));
        assert!(!is_retriable_error(&StoreError::Conflict("m1".to_string())));

        let io = redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(is_retriable_error(&StoreError::Redis(io)));

        let wrong_type = redis::RedisError::from((redis::ErrorKind::TypeError, "wrong type"));
        assert!(!is_retriable_error(&StoreError::Redis(wrong_type)));
    }

    #[tokio::test]
    async fn test_retry_succeeds_eventually() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = attempt_count.clone();

        let result = execute_with_retry_custom(
            || {
                let count = attempt_count_clone.clone();
                async move {
                    let current = count.fetch_add(1, Ordering::SeqCst) + 1;
                    if current < 3 {
                        Err(StoreError::Unavailable("timeout".to_string()))
                    } else {
                        Ok(42)
                    }
                }
            },
            3,
            1,
            5,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_fails_after_max_attempts() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = attempt_count.clone();

        let result: Result<i32, StoreError> = execute_with_retry_custom(
            || {
                let count = attempt_count_clone.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Err(StoreError::Unavailable("timeout".to_string()))
                }
            },
            3,
            1,
            5,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_retry_on_non_retriable_error() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = attempt_count.clone();

        let result: Result<i32, StoreError> = execute_with_retry(
            || {
                let count = attempt_count_clone.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Err(serialization_error())
                }
            },
            3,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1); // Should not retry
    }

    /// Collects every `log` record so retry warnings can be asserted on
    struct CapturedLog(parking_lot::Mutex<Vec<String>>);

    impl log::Log for CapturedLog {
        fn enabled(&self, _: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            self.0.lock().push(record.args().to_string());
        }

        fn flush(&self) {}
    }

    static CAPTURED: CapturedLog = CapturedLog(parking_lot::const_mutex(Vec::new()));

    #[tokio::test]
    async fn test_retry_warnings_reach_log_backend() {
        // The service only installs a `log` backend (env_logger)
        let _ = log::set_logger(&CAPTURED);
        log::set_max_level(log::LevelFilter::Trace);

        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = attempt_count.clone();
        let result = execute_with_retry_custom(
            || {
                let count = attempt_count_clone.clone();
                async move {
                    if count.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(StoreError::Unavailable("redis restarting".to_string()))
                    } else {
                        Ok(())
                    }
                }
            },
            2,
            1,
            1,
        )
        .await;
        assert!(result.is_ok());

        let lines = CAPTURED.0.lock();
        assert!(lines
            .iter()
            .any(|l| l.contains("Store operation failed (attempt 1/2)") && l.contains("redis restarting")));
    }
}
