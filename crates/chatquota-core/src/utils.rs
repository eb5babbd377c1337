//! Bounded retry for transient tracker failures
//!
//! One combinator, configured once from `TrackerConfig` and reused by every
//! `TrackerHandle` request.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// Default number of attempts (first try included)
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default delay between attempts
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts including the first, at least 1
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub delay: Duration,
    /// Delay multiplier per further attempt; 1.0 keeps it fixed
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            backoff_multiplier: 1.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Fixed-delay policy
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            ..Default::default()
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay after the given failed attempt (1-based)
    fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt as i32 - 1);
        let millis = (self.delay.as_millis() as f64 * factor).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

/// Error returned once retries are exhausted or the error is permanent
#[derive(Debug)]
pub struct RetryError<E> {
    /// The last error encountered
    pub last_error: E,
    /// Total number of attempts made
    pub attempts: u32,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Operation failed after {} attempts: {}",
            self.attempts, self.last_error
        )
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for RetryError<E> {}

/// Run `operation` until it succeeds, fails permanently, or runs out of attempts
///
/// ```ignore
/// let policy = RetryPolicy::default();
/// let record = retry_with_backoff(&policy, || handle.try_get_record("o3"), |e| e.is_transient()).await?;
/// ```
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: R,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    log::debug!("[quota:retry] Succeeded on attempt {}", attempt);
                }
                return Ok(result);
            }
            Err(e) if attempt < max_attempts && is_retryable(&e) => {
                let delay = policy.delay_after(attempt);
                log::warn!(
                    "[quota:retry] Attempt {}/{} failed: {}; retrying in {}ms",
                    attempt,
                    max_attempts,
                    e,
                    delay.as_millis()
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                log::debug!("[quota:retry] Giving up after attempt {}: {}", attempt, e);
                return Err(RetryError {
                    last_error: e,
                    attempts: attempt,
                });
            }
        }
    }
}
