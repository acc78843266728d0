//! Backoff and read retry

use crate::config::RetryConfig;
use crate::error::{DevflowError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Delay before retry number `attempt` (1-based)
///
/// Exponential in `attempt`, capped at `max_backoff`, with full jitter so
/// that clients that collided do not collide again in lockstep.
#[must_use]
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.base_backoff_ms.max(1);
    let ceiling = base
        .saturating_mul(1u64 << attempt.saturating_sub(1).min(16))
        .min(config.max_backoff_ms.max(base));
    Duration::from_millis(rand::rng().random_range(0..=ceiling))
}

/// Run a read, retrying while the store is unavailable
///
/// Other errors, and the last `StoreUnavailable`, are returned unchanged.
pub async fn retry_read<T, F, Fut>(config: &RetryConfig, what: &str, mut read: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = config.max_read_attempts.max(1);
    let mut attempt = 1;
    loop {
        match read().await {
            Err(DevflowError::StoreUnavailable(reason)) if attempt < attempts => {
                tracing::debug!(what, attempt, %reason, "read failed, retrying");
                tokio::time::sleep(backoff_delay(config, attempt)).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> RetryConfig {
        RetryConfig {
            max_conflict_retries: 2,
            max_read_attempts: 3,
            base_backoff_ms: 1,
            max_backoff_ms: 4,
        }
    }

    #[test]
    fn delay_is_capped() {
        let config = config();
        for attempt in 1..40 {
            assert!(backoff_delay(&config, attempt) <= Duration::from_millis(4));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_reads_are_retried() {
        let calls = AtomicU32::new(0);
        let result = retry_read(&config(), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(DevflowError::StoreUnavailable("down".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_read(&config(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DevflowError::StoreUnavailable("down".into()))
        })
        .await;
        assert!(matches!(result, Err(DevflowError::StoreUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = tokio_test::block_on(retry_read(&config(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DevflowError::not_found("projects/p1"))
        }));
        assert!(matches!(result, Err(DevflowError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
