use crate::error::{AppError, Result};
use crate::observability::get_metrics;
use std::future::Future;
use std::time::Duration;

/// Bounded exponential backoff.
///
/// Only errors whose [`AppError::class`] is transient are retried. The
/// wrapped operation must be safe to repeat (a read, or a write keyed on a
/// unique business id); the policy cannot check that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Wait after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// How a retried call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Success,
    Exhausted,
    NonRetryable,
}

impl RetryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryOutcome::Success => "success",
            RetryOutcome::Exhausted => "exhausted",
            RetryOutcome::NonRetryable => "non_retryable",
        }
    }
}

/// One attempt of a retried call. `delay` is set when another attempt
/// follows; `outcome` is set on the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub delay: Option<Duration>,
    pub outcome: Option<RetryOutcome>,
}

/// Runs `operation` under `policy`.
///
/// Permanent errors are returned as-is after a single attempt. Running out
/// of attempts yields [`AppError::RetryExhausted`] wrapping the last error.
pub async fn with_retry<T, F, Fut>(label: &str, policy: &RetryPolicy, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_observed(label, policy, operation, |_| {}).await
}

/// [`with_retry`] that reports every attempt to `observe`.
pub async fn with_retry_observed<T, F, Fut, O>(
    label: &str,
    policy: &RetryPolicy,
    mut operation: F,
    mut observe: O,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    O: FnMut(&RetryAttempt),
{
    let max_attempts = policy.max_attempts.max(1);
    let metrics = get_metrics();
    let mut attempt = 0;

    loop {
        attempt += 1;
        metrics.record_retry_attempt(label);

        let error = match operation().await {
            Ok(value) => {
                finish(label, attempt, RetryOutcome::Success, &mut observe);
                return Ok(value);
            }
            Err(e) => e,
        };

        if !error.is_transient() {
            finish(label, attempt, RetryOutcome::NonRetryable, &mut observe);
            tracing::debug!(label = %label, attempt, error = %error, "Non-retryable failure");
            return Err(error);
        }

        if attempt >= max_attempts {
            finish(label, attempt, RetryOutcome::Exhausted, &mut observe);
            tracing::warn!(label = %label, attempts = attempt, error = %error, "Retry attempts exhausted");
            return Err(AppError::RetryExhausted {
                label: label.to_string(),
                attempts: attempt,
                source: Box::new(error),
            });
        }

        let delay = policy.delay_after(attempt);
        observe(&RetryAttempt {
            attempt,
            delay: Some(delay),
            outcome: None,
        });
        tracing::warn!(
            label = %label,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

fn finish<O: FnMut(&RetryAttempt)>(label: &str, attempt: u32, outcome: RetryOutcome, observe: &mut O) {
    observe(&RetryAttempt {
        attempt,
        delay: None,
        outcome: Some(outcome),
    });
    get_metrics().record_retry_outcome(label, outcome.as_str(), attempt);
}
