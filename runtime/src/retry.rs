//! Retry with backoff under an overall time budget.
//!
//! Used while bringing the service up, when dependencies such as the
//! database may not be accepting connections yet. Retries stop as soon as the
//! next attempt would start after the budget is spent, and the last error is
//! returned.
//!
//! # Example
//!
//! ```rust
//! use mnemosyne_runtime::retry::{RetryPolicy, retry_with_backoff};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::builder()
//!     .initial_delay(Duration::from_secs(1))
//!     .timeout(Duration::from_secs(10))
//!     .build();
//!
//! let value = retry_with_backoff(&policy, "database ping", || async {
//!     Ok::<_, String>(42)
//! })
//! .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Backoff configuration.
///
/// # Default Values
///
/// - `initial_delay`: 1 second
/// - `max_delay`: 10 seconds
/// - `multiplier`: 1.0 (fixed interval)
/// - `timeout`: 10 seconds
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Cap for any single delay
    pub max_delay: Duration,
    /// Growth factor applied to the delay after every failure
    pub multiplier: f64,
    /// Overall budget, measured from the first attempt
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 1.0,
            timeout: Duration::from_secs(10),
        }
    }

    /// Delay after the failed attempt number `attempt` (0-based), capped at
    /// `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        Duration::try_from_secs_f64(self.initial_delay.as_secs_f64() * factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    timeout: Duration,
}

impl RetryPolicyBuilder {
    /// Set the first delay.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Cap every delay at `delay`.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the growth factor; values below 1.0 act as 1.0.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the overall budget.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub const fn build(self) -> RetryPolicy {
        RetryPolicy {
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            multiplier: self.multiplier,
            timeout: self.timeout,
        }
    }
}

/// Run `operation` until it succeeds or the policy's budget is spent.
///
/// # Errors
///
/// Returns the error of the last attempt once no further attempt fits in the
/// budget.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let deadline = Instant::now() + policy.timeout;
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(operation = operation_name, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                let delay = policy.delay_for_attempt(attempt);
                if Instant::now() + delay >= deadline {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Operation failed, retry budget exhausted"
                    );
                    return Err(err);
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Operation failed, retrying..."
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
