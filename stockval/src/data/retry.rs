//! Exponential backoff policy shared by providers, the router and the notifier.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry schedule: `base_delay * multiplier^attempt`, clamped to `[min_delay, max_delay]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::provider(3)
    }
}

impl RetryPolicy {
    /// Router retries per provider: 0.5s, 1s, 2s ...
    pub fn provider(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            min_delay: Duration::ZERO,
            max_delay: Duration::from_secs(10),
        }
    }

    /// FMP HTTP calls: 3 attempts, waits between 4s and 10s.
    pub fn fmp_http() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            min_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
        }
    }

    /// Telegram sends: waits 2s, 4s, 8s ... between attempts.
    pub fn telegram(attempts: u32) -> Self {
        Self {
            max_retries: attempts.saturating_sub(1),
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            min_delay: Duration::ZERO,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Same attempt count with no waiting, for tests and local mocks.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Wait before retry number `attempt + 1` (0-based attempt that just failed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        let secs = secs
            .min(self.max_delay.as_secs_f64())
            .max(self.min_delay.as_secs_f64());
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or the
    /// retry budget is spent.
    pub async fn run<T, E, F, Fut, R>(&self, label: &str, mut op: F, retryable: R) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && retryable(&e) => {
                    let delay = self.delay_for(attempt);
                    debug!(
                        operation = label,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
