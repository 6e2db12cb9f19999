//! Key/value cache used for the aggregate value, the distributed locks and
//! the per-tenant entity caches that a finished run invalidates.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod keys;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_backend;

pub use keys::CacheKeys;
pub use memory::InMemoryCache;
#[cfg(feature = "redis")]
pub use redis_backend::RedisCache;

/// Result of one bounded scan-and-delete pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanDeleteReport {
    pub pattern: String,
    pub deleted: u64,
    pub iterations: usize,
    /// The iteration bound was hit before the cursor wrapped around.
    pub truncated: bool,
}

/// Values are opaque strings; callers own the encoding.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<()>;

    /// Stores `value` only when `key` is absent. Returns whether it did.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Removes `key` only while it still holds `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str)
    -> Result<bool>;

    /// Replaces `key` with `value` and a fresh TTL only while it still holds
    /// `expected`.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool>;

    /// Iteratively deletes keys matching a glob `pattern`, asking for about
    /// `count` keys per round-trip and stopping after `max_iterations`.
    async fn scan_delete(
        &self,
        pattern: &str,
        count: usize,
        max_iterations: usize,
    ) -> Result<ScanDeleteReport>;
}
