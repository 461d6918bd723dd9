//! Retry wrapper for whole runs.
//!
//! Provider fallback happens inside a run; this policy sits outside it and
//! re-runs the entire operation when it still fails. Delays are either
//! fixed or doubling (`delay`, `2×delay`, `4×delay`, ...), capped at 32×.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::{BackoffKind, RetryConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: BackoffKind,
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            delay: Duration::from_millis(cfg.delay_ms),
            backoff: cfg.backoff,
        }
    }

    /// Run exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
            backoff: BackoffKind::Fixed,
        }
    }

    /// Sleep before attempt `attempt` (1-based; attempt 1 never waits).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        match self.backoff {
            BackoffKind::Fixed => self.delay,
            BackoffKind::Exponential => self.delay * (1u32 << (attempt - 2).min(5)),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Call `op` until it succeeds or `policy.max_attempts` is used up.
/// Returns the last error.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let delay = policy.delay_for(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!(attempt, max_attempts = attempts, error = %e, "attempt failed, retrying");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32, backoff: BackoffKind) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(1),
            backoff,
        }
    }

    #[test]
    fn test_delays() {
        let p = RetryPolicy {
            max_attempts: 10,
            delay: Duration::from_millis(100),
            backoff: BackoffKind::Exponential,
        };
        assert_eq!(p.delay_for(1), Duration::ZERO);
        assert_eq!(p.delay_for(2), Duration::from_millis(100));
        assert_eq!(p.delay_for(3), Duration::from_millis(200));
        assert_eq!(p.delay_for(4), Duration::from_millis(400));
        assert_eq!(p.delay_for(9), Duration::from_millis(3200));

        let fixed = RetryPolicy {
            backoff: BackoffKind::Fixed,
            ..p
        };
        assert_eq!(fixed.delay_for(5), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let out: Result<&str, String> = with_retry(&policy(3, BackoffKind::Exponential), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(format!("boom {}", attempt))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(out.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_returns_last_error() {
        let calls = AtomicU32::new(0);
        let out: Result<(), String> = with_retry(&policy(2, BackoffKind::Fixed), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(format!("boom {}", attempt)) }
        })
        .await;
        assert_eq!(out.unwrap_err(), "boom 2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_from_config_clamps_attempts() {
        let cfg = RetryConfig {
            max_attempts: 0,
            delay_ms: 50,
            backoff: BackoffKind::Fixed,
        };
        let p = RetryPolicy::from_config(&cfg);
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.delay, Duration::from_millis(50));
    }
}
