//! Retry policy implementation

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Errors that know whether retrying the failed operation can help
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Configuration for retrying storage operations
///
/// Backoff grows linearly and is capped: the delay after the `n`-th failed
/// attempt (0-based) is `min(initial_interval + n * interval_step, max_interval)`.
///
/// # Example
///
/// ```
/// use taskvault_store::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default()
///     .with_max_retries(5)
///     .with_initial_interval(Duration::from_millis(100))
///     .with_interval_step(Duration::from_millis(200))
///     .with_max_interval(Duration::from_secs(1));
///
/// assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(300));
/// assert_eq!(policy.delay_for_attempt(9), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Total number of invocations before the last error is returned
    pub max_retries: u32,

    /// Delay after the first failure
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Added to the delay for every further failure
    #[serde(with = "duration_millis")]
    pub interval_step: Duration,

    /// Upper bound for any single delay
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    /// 3 invocations, 0s initial delay, +200ms per failure, at most 1s
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::ZERO,
            interval_step: Duration::from_millis(200),
            max_interval: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 1,
            initial_interval: Duration::ZERO,
            interval_step: Duration::ZERO,
            max_interval: Duration::ZERO,
        }
    }

    /// Set the number of invocations
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay after the first failure
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Set the linear backoff step
    pub fn with_interval_step(mut self, step: Duration) -> Self {
        self.interval_step = step;
        self
    }

    /// Set the delay cap
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Delay to wait after the failed attempt with the given 0-based index
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_interval
            .saturating_add(self.interval_step.saturating_mul(attempt));
        delay.min(self.max_interval)
    }

    /// Number of invocations this policy allows (never less than one)
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Run `op`, retrying it while it fails with a retryable error
    ///
    /// Returns the first success, the first non-retryable error, or the error
    /// of the final attempt once the attempts are exhausted. Errors are
    /// returned exactly as `op` produced them.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let attempts = self.attempts();
        let mut attempt = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    if attempt + 1 >= attempts {
                        return Err(err);
                    }

                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient storage error, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
