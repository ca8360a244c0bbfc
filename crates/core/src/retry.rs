//! Bounded retry with linear backoff for transient failures.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Classifies an error as worth retrying (network hiccup, 5xx, quota
/// pressure) or terminal (bad request, permission denied).
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// A bounded retry schedule. Attempt `n` failing transiently waits
/// `base_delay * n` before the next attempt, so the default policy of
/// 3 attempts with a 2000 ms base sleeps 2 s and then 4 s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    /// The policy used by the text-mode dialogue loop.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// A single-attempt policy. Transient failures surface immediately,
    /// which lets callers substitute an offline fallback instead of
    /// waiting out a backoff schedule.
    pub fn non_retryable() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Runs `operation` until it succeeds, fails terminally, or exhausts
    /// the attempt budget. The closure receives the 1-based attempt
    /// number. Terminal failures propagate without sleeping.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        E: Transient + Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < self.max_attempts => {
                    let delay = self.base_delay * attempt;
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %error,
                        "transient failure, backing off before retry");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
