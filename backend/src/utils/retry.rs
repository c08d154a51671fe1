use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::constants::{RETRY_BASE_DELAY_MS, STORE_MAX_RETRIES, STORE_TIMEOUT_SECS};
use crate::error::{CoreError, StoreError};

/// Bounded timeout-and-retry for store calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: STORE_MAX_RETRIES,
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            timeout: Duration::from_secs(STORE_TIMEOUT_SECS),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        let jitter_ms = rand::rng().random_range(0..=self.base_delay.as_millis() as u64);
        exp + Duration::from_millis(jitter_ms)
    }
}

/// Runs `op` until it succeeds, fails permanently, or `max_attempts` transient
/// failures have happened. Exhaustion surfaces as `CoreError::Transient`.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        let result = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::Store(StoreError::Timeout(policy.timeout.as_secs()))),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                warn!("{} failed (attempt {}/{}): {}", label, attempt + 1, attempts, err);
                last_error = Some(err);
                if attempt + 1 < attempts {
                    tokio::time::sleep(policy.backoff(attempt)).await;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(CoreError::Transient(format!(
        "{} failed after {} attempts: {}",
        label,
        attempts,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(&fast_policy(), "flaky", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CoreError::Store(StoreError::Timeout(1)))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_transient() {
        let result: Result<(), _> = with_retry(&fast_policy(), "down", || async {
            Err(CoreError::Transient("store down".to_string()))
        })
        .await;
        assert!(matches!(result, Err(CoreError::Transient(_))));
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(&fast_policy(), "bad", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::Invalid("nope".to_string()))
        })
        .await;
        assert!(matches!(result, Err(CoreError::Invalid(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let result: Result<(), _> = with_retry(&fast_policy(), "slow", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(CoreError::Transient(_))));
    }
}
