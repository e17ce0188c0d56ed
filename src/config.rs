use serde::Deserialize;
use std::time::Duration;

use crate::idempotency::FailurePolicy;
use crate::reliability::{RetryPolicy, TimeoutBudget};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub application: ApplicationSettings,
    #[serde(default)]
    pub dedup: DedupSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    pub payments: PaymentSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    pub url: String,
    /// Upper bound on a single Redis round trip before the connection is dropped.
    #[serde(default = "default_redis_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

fn default_redis_response_timeout_ms() -> u64 {
    2000
}

impl RedisSettings {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    pub port: u16,
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Deduplication store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DedupSettings {
    pub default_ttl_secs: u64,
    pub key_prefix: String,
    pub failure_policy: FailurePolicy,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: 86400, // 24 hours
            key_prefix: "dedup".to_string(),
            failure_policy: FailurePolicy::FailOpen,
        }
    }
}

impl DedupSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// Read-through cache settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    pub enabled: bool,
    pub default_ttl_secs: u64,
    pub key_prefix: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: 60,
            key_prefix: "cache".to_string(),
        }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// Per-tier timeout overrides, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutSettings {
    pub database_ms: u64,
    pub external_api_ms: u64,
    pub shared_store_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        let budget = TimeoutBudget::default();
        Self {
            database_ms: budget.database.as_millis() as u64,
            external_api_ms: budget.external_api.as_millis() as u64,
            shared_store_ms: budget.shared_store.as_millis() as u64,
        }
    }
}

impl From<&TimeoutSettings> for TimeoutBudget {
    fn from(settings: &TimeoutSettings) -> Self {
        TimeoutBudget {
            database: Duration::from_millis(settings.database_ms),
            external_api: Duration::from_millis(settings.external_api_ms),
            shared_store: Duration::from_millis(settings.shared_store_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        RetryPolicy {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentSettings {
    pub api_base_url: String,
    pub secret_key: String,
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        builder.build()?.try_deserialize()
    }
}
