//! Shared key-value store used by the deduplication store and the cache.
//!
//! Any backend offering atomic set-if-absent-with-expiry plus plain
//! get/set/delete satisfies [`SharedStore`]. Redis is the production backend;
//! [`MemoryStore`] keeps state in process memory and is only correct for a
//! single instance.

pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait SharedStore: Send + Sync {
    /// `SET key value NX EX ttl`. Returns true if the key was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// `SET key value EX ttl`, overwriting any existing value.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Returns true if a key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn ping(&self) -> Result<()>;

    /// Backend name for logs and metrics.
    fn backend(&self) -> &'static str;
}

/// Redis rejects `EX 0`; round sub-second TTLs up to one second.
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 || secs == 0 {
        secs + 1
    } else {
        secs
    }
}
