use crate::error::{AppError, Result};
use crate::observability::get_metrics;
use anyhow::anyhow;
use std::future::Future;
use std::time::Duration;

/// Same-region database calls.
pub const DATABASE_TIMEOUT: Duration = Duration::from_secs(5);
/// Third-party HTTP APIs such as the payment provider.
pub const EXTERNAL_API_TIMEOUT: Duration = Duration::from_secs(15);
/// Dedup and cache round-trips to the shared store.
pub const SHARED_STORE_TIMEOUT: Duration = Duration::from_secs(1);

/// Operation classes with their own time budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutTier {
    Database,
    ExternalApi,
    SharedStore,
}

impl TimeoutTier {
    pub const fn default_limit(self) -> Duration {
        match self {
            TimeoutTier::Database => DATABASE_TIMEOUT,
            TimeoutTier::ExternalApi => EXTERNAL_API_TIMEOUT,
            TimeoutTier::SharedStore => SHARED_STORE_TIMEOUT,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutTier::Database => "database",
            TimeoutTier::ExternalApi => "external_api",
            TimeoutTier::SharedStore => "shared_store",
        }
    }
}

/// Configured limit for every tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutBudget {
    pub database: Duration,
    pub external_api: Duration,
    pub shared_store: Duration,
}

impl Default for TimeoutBudget {
    fn default() -> Self {
        Self {
            database: TimeoutTier::Database.default_limit(),
            external_api: TimeoutTier::ExternalApi.default_limit(),
            shared_store: TimeoutTier::SharedStore.default_limit(),
        }
    }
}

impl TimeoutBudget {
    pub fn limit(&self, tier: TimeoutTier) -> Duration {
        match tier {
            TimeoutTier::Database => self.database,
            TimeoutTier::ExternalApi => self.external_api,
            TimeoutTier::SharedStore => self.shared_store,
        }
    }
}

/// Races `operation` against `limit`.
///
/// The operation runs on its own task. If the deadline wins, the task is
/// detached and left to finish on its own; it is not aborted. A timeout
/// therefore means "outcome unknown", never "did not happen".
pub async fn with_timeout<T, Fut>(operation: Fut, limit: Duration, label: &str) -> Result<T>
where
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::spawn(operation);

    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(AppError::Internal(anyhow!(
            "Operation '{}' did not complete: {}",
            label,
            join_error
        ))),
        Err(_) => {
            get_metrics().record_timeout(label);
            tracing::warn!(
                label = %label,
                limit_ms = limit.as_millis() as u64,
                "Operation timed out; outcome unknown"
            );
            Err(AppError::Timeout {
                label: label.to_string(),
                limit_ms: limit.as_millis() as u64,
            })
        }
    }
}

/// [`with_timeout`] using the budget's limit for `tier`.
pub async fn with_tier_timeout<T, Fut>(
    operation: Fut,
    tier: TimeoutTier,
    budget: &TimeoutBudget,
    label: &str,
) -> Result<T>
where
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    with_timeout(operation, budget.limit(tier), label).await
}
