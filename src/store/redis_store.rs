use crate::error::{AppError, Result};
use crate::observability::{get_metrics, LatencyTimer};
use crate::store::{ttl_secs, SharedStore};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisError, RedisResult};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;

const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Redis-backed [`SharedStore`].
///
/// Keys are namespaced as `<prefix>:<key>`. One multiplexed connection is
/// opened lazily and shared by all callers. A multiplexed connection does not
/// reconnect on its own, so an I/O failure or an unanswered command drops it
/// and the next call dials again.
pub struct RedisStore {
    client: redis::Client,
    key_prefix: String,
    connection: Mutex<Option<MultiplexedConnection>>,
    response_timeout: Duration,
}

impl RedisStore {
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            connection: Mutex::new(None),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    /// Bounds connecting and every command round trip.
    pub fn with_response_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let conn = tokio::time::timeout(self.response_timeout, self.client.get_multiplexed_async_connection())
            .await
            .map_err(|_| self.timed_out("connect"))?
            .map_err(AppError::Redis)?;

        tracing::debug!(prefix = %self.key_prefix, "Opened redis connection");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn discard_connection(&self) {
        if self.connection.lock().await.take().is_some() {
            tracing::warn!(prefix = %self.key_prefix, "Dropped broken redis connection");
        }
    }

    fn timed_out(&self, operation: &str) -> AppError {
        AppError::StoreUnavailable(format!(
            "redis {} got no response within {}ms",
            operation,
            self.response_timeout.as_millis()
        ))
    }

    /// Runs one command on the shared connection, recording its latency.
    async fn run<T, F, Fut>(&self, operation: &'static str, command: F) -> Result<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.connection().await?;
        let timer = LatencyTimer::new();

        let result = match tokio::time::timeout(self.response_timeout, command(conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if breaks_connection(&e) {
                    self.discard_connection().await;
                }
                Err(AppError::Redis(e))
            }
            Err(_) => {
                self.discard_connection().await;
                Err(self.timed_out(operation))
            }
        };

        get_metrics().record_store_operation(self.backend(), operation, timer.elapsed_ms(), result.is_ok());
        result
    }
}

fn breaks_connection(error: &RedisError) -> bool {
    error.is_io_error() || error.is_connection_dropped()
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let key = self.make_key(key);
        let options = redis::SetOptions::default()
            .conditional_set(redis::ExistenceCheck::NX)
            .with_expiration(redis::SetExpiry::EX(ttl_secs(ttl) as usize));

        let stored: Option<String> = self
            .run("set_nx", |mut conn| async move { conn.set_options(&key, value, options).await })
            .await?;
        Ok(stored.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = self.make_key(key);
        self.run("get", |mut conn| async move { conn.get(&key).await }).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let key = self.make_key(key);
        self.run("set", |mut conn| async move { conn.set_ex(&key, value, ttl_secs(ttl)).await })
            .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let key = self.make_key(key);
        let removed: i64 = self.run("del", |mut conn| async move { conn.del(&key).await }).await?;
        Ok(removed > 0)
    }

    async fn ping(&self) -> Result<()> {
        self.run("ping", |mut conn| async move { redis::cmd("PING").query_async(&mut conn).await })
            .await
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
