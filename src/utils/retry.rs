//! Exponential backoff for transient backend failures.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// Errors that may succeed when the same call is repeated.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Backoff policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, the first one included. At least 1.
    pub max_attempts: u32,
    /// Base delay before the first retry.
    pub initial_delay: Duration,
    /// Cap applied to every delay, jitter included.
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Base delay before retry number `retry` (1-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let nanos = self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.round() as u64)
    }

    /// Backoff plus up to 25% jitter, still capped at `max_delay`.
    fn jittered(&self, retry: u32) -> Duration {
        let base = self.backoff(retry);
        let spread = base.as_millis() as u64 / 4;
        (base + Duration::from_millis(jitter(spread))).min(self.max_delay)
    }
}

/// How a retried operation ended.
#[derive(Debug)]
pub enum RetryResult<T, E> {
    Success(T),
    /// `exhausted` is true when the last error was retryable and the
    /// attempt budget ran out, false when a permanent error stopped early.
    Failed {
        last_error: E,
        attempts: u32,
        exhausted: bool,
    },
}

/// Run `operation` until it succeeds, fails permanently, or runs out of attempts.
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, mut operation: F) -> RetryResult<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let error = match operation().await {
            Ok(value) => return RetryResult::Success(value),
            Err(error) => error,
        };

        let retryable = error.is_retryable();
        if !retryable || attempt >= max_attempts {
            return RetryResult::Failed {
                last_error: error,
                attempts: attempt,
                exhausted: retryable,
            };
        }

        let delay = config.jittered(attempt);
        tracing::warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            "transient failure, retrying: {error}"
        );
        sleep(delay).await;
        attempt += 1;
    }
}

/// Clock-derived value in `0..max`; spreads retries, not for anything secure.
fn jitter(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    nanos % max
}
