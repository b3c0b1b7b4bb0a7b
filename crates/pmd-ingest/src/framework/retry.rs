//! Retry policy applied at adapter call sites
//!
//! The policy is a plain value: callers pass it in and wrap each upstream
//! call with [`RetryPolicy::run`]. Every wait observes the run's
//! cancellation token.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::SourceError;

/// Default maximum attempts per upstream call
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default delay before the first retry
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
/// Default backoff ceiling
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default jitter fraction applied to each computed delay
pub const DEFAULT_JITTER: f64 = 0.25;

/// Exponential backoff with jitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction in `0..=1`; each delay is scaled by `1 ± jitter`
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Policy that never waits, for tests and local fixtures
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based)
    ///
    /// An upstream hint wins over the computed backoff. Both are capped at
    /// `max_delay`.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint.min(self.max_delay);
        }

        let exp = attempt.saturating_sub(1).min(31);
        let backoff = self
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay);

        if self.jitter <= 0.0 || backoff.is_zero() {
            return backoff;
        }

        let jitter = self.jitter.min(1.0);
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        backoff.mul_f64(factor)
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out
    ///
    /// Only retryable errors are retried. Running out of attempts yields
    /// [`SourceError::Unavailable`]. When `cancel` fires during a backoff the
    /// last error is returned without another attempt.
    pub async fn run<T, F, Fut>(
        &self,
        op: &str,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    warn!(op, attempts = attempt, error = %e, "Giving up after retries");
                    return Err(SourceError::Unavailable {
                        attempts: attempt,
                        last: e.to_string(),
                    });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt, e.retry_after());
                    warn!(
                        "{} attempt {}/{} failed: {}. Retrying in {:?}...",
                        op, attempt, max_attempts, e, delay
                    );
                    if !wait(delay, cancel).await {
                        debug!(op, attempt, "Backoff interrupted by stop signal");
                        return Err(e);
                    }
                }
            }
        }
    }
}

/// Sleep for `delay` unless `cancel` fires first; returns false when cancelled
pub async fn wait(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for(1, None), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2, None), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3, None), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(4, None), Duration::from_secs(3));
        assert_eq!(policy.delay_for(40, None), Duration::from_secs(3));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy {
            jitter: 0.25,
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let d = policy.delay_for(1, None);
            assert!(d >= Duration::from_millis(375) && d <= Duration::from_millis(625));
        }
    }

    #[test]
    fn test_retry_after_hint_wins() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
    }

    #[test]
    fn test_retry_after_hint_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(86_400))),
            Duration::from_millis(DEFAULT_MAX_DELAY_MS)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::default()
            .run("fetch", &CancellationToken::new(), || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SourceError::Transient("HTTP 503".into()))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exhaustion_is_unavailable() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::default()
            .run("fetch", &CancellationToken::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SourceError::RateLimited { retry_after: None })
            })
            .await;
        assert!(matches!(result, Err(SourceError::Unavailable { attempts: 5, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_run_does_not_retry_rejections() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(5)
            .run("fetch", &CancellationToken::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SourceError::Rejected {
                    status: 404,
                    message: "not found".into(),
                })
            })
            .await;
        assert!(matches!(result, Err(SourceError::Rejected { status: 404, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_stops_waiting_when_cancelled() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(3600),
            max_delay: Duration::from_secs(3600),
            jitter: 0.0,
        };
        let calls = AtomicU32::new(0);

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let result: Result<(), _> = policy
            .run("fetch", &cancel, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SourceError::RateLimited {
                    retry_after: Some(Duration::from_secs(86_400)),
                })
            })
            .await;

        assert!(matches!(result, Err(SourceError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
