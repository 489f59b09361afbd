//! Retry executor for the request/send primitives.
//!
//! Transient failures back off exponentially (`base_delay << attempt`), rate
//! limits wait the platform-provided cooldown, everything else returns at once.
//! The total number of attempts is `max_retries + 1`.

use std::future::Future;
use std::time::Duration;

use crate::errors::RelayError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound for one backoff sleep.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `op` under `policy`. `label` only feeds the logs.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, RelayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RelayError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let wait = match &e {
                    RelayError::RateLimit { retry_after } => *retry_after,
                    _ => policy.backoff(attempt),
                };
                tracing::warn!(
                    op = label,
                    attempt = attempt + 1,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(op = label, attempts = attempt + 1, error = %e, "all attempts failed");
                } else {
                    tracing::error!(op = label, error = %e, "non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RejectionKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
        };
        assert_eq!(p.backoff(0), Duration::from_secs(5));
        assert_eq!(p.backoff(1), Duration::from_secs(10));
        assert_eq!(p.backoff(2), Duration::from_secs(20));
        assert_eq!(p.backoff(3), Duration::from_secs(30));
        assert_eq!(p.backoff(40), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let p = RetryPolicy::new(2, Duration::ZERO);
        let out = with_retry(&p, "test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(RelayError::Transient("flaky".into()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(out.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rejections_are_not_retried() {
        let calls = AtomicU32::new(0);
        let p = RetryPolicy::new(3, Duration::ZERO);
        let out: Result<(), _> = with_retry(&p, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RelayError::PlatformRejection {
                kind: RejectionKind::ChatNotFound,
                detail: "chat not found".into(),
            })
        })
        .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_cooldown_then_resumes() {
        let calls = AtomicU32::new(0);
        let p = RetryPolicy::new(1, Duration::ZERO);
        let started = tokio::time::Instant::now();
        let out = with_retry(&p, "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RelayError::RateLimit {
                    retry_after: Duration::from_secs(7),
                })
            } else {
                Ok("sent")
            }
        })
        .await;
        assert_eq!(out.unwrap(), "sent");
        assert!(started.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let p = RetryPolicy::new(2, Duration::ZERO);
        let out: Result<(), _> = with_retry(&p, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RelayError::Transient("down".into()))
        })
        .await;
        assert!(matches!(out, Err(RelayError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
