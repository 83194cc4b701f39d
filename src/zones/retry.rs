//! Bounded timeout and retry for idempotent zone operations.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Classify;

use super::backend::{ZoneError, ZoneResult};

/// Calculate exponential backoff delay for a given attempt.
pub fn backoff_delay(attempt: u32, base_ms: u64) -> Duration {
    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay_ms.min(60_000))
}

/// Timeout and retry budget for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub base_delay: Duration,
    /// Applied to every attempt separately.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.base_delay.as_millis() as u64)
    }
}

/// Run `op` under the policy. Only storage failures and timeouts are
/// retried; `NotFound` and `Validation` return immediately.
///
/// Callers must only pass idempotent operations (reads, listings,
/// overwrite-by-key writes).
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> ZoneResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ZoneResult<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(ZoneError::Timeout {
                operation: operation.to_string(),
                timeout: policy.timeout,
            }),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.kind().is_transient() && attempt + 1 < attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    operation,
                    attempt + 1,
                    attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zones::Zone;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        assert_eq!(backoff_delay(0, 200), Duration::from_millis(200));
        assert_eq!(backoff_delay(3, 200), Duration::from_millis(1600));
        assert_eq!(backoff_delay(20, 200), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_retries_storage_errors_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(&fast_policy(3), "list", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ZoneError::Unavailable("down".to_string()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: ZoneResult<()> = with_retry(&fast_policy(2), "get", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ZoneError::Unavailable("down".to_string()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: ZoneResult<()> = with_retry(&fast_policy(5), "get", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ZoneError::NotFound {
                zone: Zone::Raw,
                key: "books/x.csv".to_string(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let policy = RetryPolicy {
            attempts: 1,
            base_delay: Duration::ZERO,
            timeout: Duration::from_millis(10),
        };
        let result: ZoneResult<()> = with_retry(&policy, "put", || async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ZoneError::Timeout { .. })));
    }
}
