use crate::error::Result;
use crate::observability::LatencyTimer;
use crate::orders::OrderRepository;
use crate::reliability::{with_tier_timeout, TimeoutBudget, TimeoutTier};
use crate::store::SharedStore;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

const SLOW_DATABASE_MS: f64 = 100.0;
const SLOW_STORE_MS: f64 = 50.0;

/// Ordered by severity, so the worst dependency decides the overall status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub name: String,
    pub status: HealthStatus,
    pub latency_ms: Option<f64>,
    pub message: Option<String>,
}

impl DependencyHealth {
    pub fn healthy(name: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            latency_ms: Some(latency_ms),
            message: None,
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::failed(name, HealthStatus::Degraded, message)
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::failed(name, HealthStatus::Unhealthy, message)
    }

    fn failed(name: impl Into<String>, status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            latency_ms: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedHealth {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: Vec<DependencyHealth>,
}

impl AggregatedHealth {
    pub fn new(version: String, uptime_seconds: u64, dependencies: Vec<DependencyHealth>) -> Self {
        let status = dependencies
            .iter()
            .map(|d| d.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            version,
            uptime_seconds,
            dependencies,
        }
    }
}

/// Checks the order database and the shared store, each within its own
/// timeout tier.
pub struct HealthChecker {
    orders: Arc<dyn OrderRepository>,
    store: Arc<dyn SharedStore>,
    timeouts: TimeoutBudget,
    started: Instant,
}

impl HealthChecker {
    pub fn new(orders: Arc<dyn OrderRepository>, store: Arc<dyn SharedStore>, timeouts: TimeoutBudget) -> Self {
        Self {
            orders,
            store,
            timeouts,
            started: Instant::now(),
        }
    }

    pub async fn check_all(&self) -> AggregatedHealth {
        let (database, store) = tokio::join!(self.check_database(), self.check_store());

        AggregatedHealth::new(
            env!("CARGO_PKG_VERSION").to_string(),
            self.started.elapsed().as_secs(),
            vec![database, store],
        )
    }

    pub async fn check_database(&self) -> DependencyHealth {
        let orders = Arc::clone(&self.orders);
        self.check(
            "database".to_string(),
            TimeoutTier::Database,
            async move { orders.ping().await },
            SLOW_DATABASE_MS,
            HealthStatus::Unhealthy,
        )
        .await
    }

    /// A dead store only degrades the service: dedup fails open and the
    /// cache falls through to the database.
    pub async fn check_store(&self) -> DependencyHealth {
        let store = Arc::clone(&self.store);
        self.check(
            format!("shared_store:{}", self.store.backend()),
            TimeoutTier::SharedStore,
            async move { store.ping().await },
            SLOW_STORE_MS,
            HealthStatus::Degraded,
        )
        .await
    }

    async fn check<F>(
        &self,
        name: String,
        tier: TimeoutTier,
        ping: F,
        slow_ms: f64,
        on_failure: HealthStatus,
    ) -> DependencyHealth
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let timer = LatencyTimer::new();
        let label = format!("health.{}", tier.as_str());

        match with_tier_timeout(ping, tier, &self.timeouts, &label).await {
            Ok(()) => {
                let latency = timer.elapsed_ms();
                if latency > slow_ms {
                    DependencyHealth {
                        latency_ms: Some(latency),
                        ..DependencyHealth::degraded(name, format!("Slow response: {:.0}ms", latency))
                    }
                } else {
                    DependencyHealth::healthy(name, latency)
                }
            }
            Err(e) => DependencyHealth::failed(name, on_failure, e.to_string()),
        }
    }

    pub fn is_alive(&self) -> bool {
        true
    }

    /// Ready while the database answers, even slowly.
    pub async fn is_ready(&self) -> bool {
        self.check_database().await.status < HealthStatus::Unhealthy
    }
}
