//! Exponential backoff retry for commit conflicts.

use std::time::Duration;

use crate::error::ReconcileError;

/// Configuration for retry behavior.
///
/// The delay between retries increases exponentially up to a maximum value.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use subscription_reconciler::reliability::RetryPolicy;
///
/// // Default policy: 3 attempts, 50ms initial delay, 2s max delay
/// let policy = RetryPolicy::default();
///
/// let patient = RetryPolicy {
///     max_attempts: 5,
///     initial_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(5),
///     backoff_multiplier: 2.0,
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (default: 3).
    pub max_attempts: u32,
    /// Initial delay between attempts (default: 50ms).
    pub initial_delay: Duration,
    /// Maximum delay between attempts (default: 2s).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (default: 2.0).
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a policy with custom maximum attempts.
    ///
    /// # Examples
    ///
    /// ```
    /// use subscription_reconciler::reliability::RetryPolicy;
    ///
    /// let policy = RetryPolicy::with_max_attempts(5);
    /// assert_eq!(policy.max_attempts, 5);
    /// ```
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self { max_attempts, ..Self::default() }
    }

    /// Calculates delay for a specific attempt.
    ///
    /// delay = `initial_delay` * (multiplier ^ attempt), capped at `max_delay`.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        #[allow(
            clippy::cast_precision_loss,
            reason = "acceptable for duration calculations"
        )]
        let delay_ms = self.initial_delay.as_millis() as f64
            * self
                .backoff_multiplier
                .powi(attempt.try_into().unwrap_or(i32::MAX));
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "delay_ms is positive and bounded by max_delay below"
        )]
        let delay = Duration::from_millis(delay_ms as u64);
        delay.min(self.max_delay)
    }
}

/// Determines whether an error is worth retrying.
///
/// Only [`ReconcileError::PersistenceConflict`] is retryable: the losing
/// side of a commit race can reload current state and re-run. Every other
/// variant reports a condition a retry cannot change, including
/// [`ReconcileError::AlreadyConsumed`], which is the *terminal* outcome a
/// conflict resolves into.
#[must_use]
pub fn is_retryable(error: &ReconcileError) -> bool {
    matches!(error, ReconcileError::PersistenceConflict)
}

/// Executes an operation with exponential backoff retry.
///
/// Re-runs the operation up to `max_attempts` times while it fails with a
/// retryable error (see [`is_retryable`]); non-retryable errors are returned
/// immediately.
///
/// # Errors
///
/// Returns the first non-retryable error encountered, or the last retryable
/// error once attempts are exhausted.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, ReconcileError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ReconcileError>>,
{
    let mut last_error = None;

    for attempt in 0..policy.max_attempts.max(1) {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempt = attempt + 1, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if is_retryable(&error) => {
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    error = %error,
                    "retryable failure"
                );
                last_error = Some(error);

                // No sleep after the final attempt
                if attempt + 1 < policy.max_attempts {
                    let delay = policy.delay_for_attempt(attempt);
                    tracing::debug!(delay_ms = delay.as_millis(), "sleeping before retry");
                    tokio::time::sleep(delay).await;
                }
            }
            Err(error) => return Err(error),
        }
    }

    Err(last_error.unwrap_or(ReconcileError::PersistenceConflict))
}
