//! Bounded exponential backoff for remote calls.
//!
//! Only errors classified as transient are retried. The delay doubles each
//! attempt from `base_delay`, is capped at `max_delay`, gets up to 25% jitter
//! and is raised to any `Retry-After` the server sent (capped at 60s).

use crate::error::Result;
use std::future::Future;
use std::time::{Duration, SystemTime};
use tracing::warn;

const MAX_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (0-based), without jitter.
    pub fn backoff(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        let computed = self.base_delay.saturating_mul(factor).min(self.max_delay);
        match retry_after_secs {
            Some(secs) => computed.max(Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS))),
            None => computed,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = with_jitter(self.backoff(attempt, e.retry_after()));
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {}ms: {}",
                        what,
                        attempt + 1,
                        attempts,
                        delay.as_millis(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Reconnect delay for long-lived connections; caps at five minutes.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let policy = RetryPolicy {
        max_attempts: u32::MAX,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(300),
    };
    with_jitter(policy.backoff(attempt, None))
}

fn with_jitter(delay: Duration) -> Duration {
    let range_ms = (delay.as_millis() / 4) as u64;
    if range_ms == 0 {
        return delay;
    }
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    delay + Duration::from_millis(nanos % (range_ms + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_backoff_is_bounded() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0, None), Duration::from_millis(500));
        assert_eq!(policy.backoff(1, None), Duration::from_millis(1000));
        assert_eq!(policy.backoff(10, None), Duration::from_secs(8));
        assert_eq!(policy.backoff(0, Some(5)), Duration::from_secs(5));
        assert_eq!(policy.backoff(0, Some(600)), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .run("flaky", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(RagError::transient("test", "timeout"))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast_policy(5)
            .run("auth", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RagError::permanent("test", "invalid_auth"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast_policy(2)
            .run("down", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RagError::transient("test", "503"))
            })
            .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
