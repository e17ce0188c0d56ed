//! Time-bounded and retried calls to unreliable dependencies.

pub mod retry;
pub mod timeout;

pub use retry::{with_retry, with_retry_observed, RetryAttempt, RetryOutcome, RetryPolicy};
pub use timeout::{
    with_tier_timeout, with_timeout, TimeoutBudget, TimeoutTier, DATABASE_TIMEOUT, EXTERNAL_API_TIMEOUT,
    SHARED_STORE_TIMEOUT,
};
