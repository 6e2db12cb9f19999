//! Redis-backed cache for standalone or sentinel-managed primaries.
//!
//! `scan_delete` walks a single keyspace, so Redis Cluster is refused at
//! connect time rather than silently invalidating one shard.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Script, aio::ConnectionManager};
use tracing::{debug, info};

use super::{CacheBackend, ScanDeleteReport};
use crate::error::{Result, SyncError};

const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const COMPARE_AND_SET: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    redis.call("SET", KEYS[1], ARGV[2], "PX", ARGV[3])
    return 1
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    release_script: Script,
    swap_script: Script,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisCache {
    pub async fn new(redis_url: &str) -> Result<Self> {
        info!("Connecting to Redis cache at {}", redis_url);

        let client = redis::Client::open(redis_url).map_err(|e| {
            SyncError::Cache(format!("Failed to create Redis client: {e}"))
        })?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            SyncError::Cache(format!("Failed to connect to Redis: {e}"))
        })?;

        let mut info_conn = conn.clone();
        let info: String = redis::cmd("INFO")
            .arg("cluster")
            .query_async(&mut info_conn)
            .await
            .map_err(|e| SyncError::Cache(format!("Redis INFO failed: {e}")))?;
        if cluster_enabled(&info) {
            return Err(SyncError::Cache(
                "Redis Cluster is not supported; point REDIS_URL at a standalone or sentinel-managed primary".into(),
            ));
        }

        info!("Successfully connected to Redis cache");

        Ok(Self::from_manager(conn))
    }

    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self {
            conn,
            release_script: Script::new(COMPARE_AND_DELETE),
            swap_script: Script::new(COMPARE_AND_SET),
        }
    }

    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

/// Reads `cluster_enabled` from an `INFO cluster` reply.
fn cluster_enabled(info: &str) -> bool {
    info.lines()
        .filter_map(|line| line.trim().split_once(':'))
        .any(|(field, value)| field == "cluster_enabled" && value == "1")
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.map_err(|e| {
            SyncError::Cache(format!("Redis GET failed: {e}"))
        })?;
        debug!(key, hit = value.is_some(), "Cache GET");
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        debug!("Cache SET: {} (TTL: {:?})", key, ttl);
        let mut conn = self.conn.clone();

        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        cmd.query_async::<()>(&mut conn).await.map_err(|e| {
            SyncError::Cache(format!("Redis SET failed: {e}"))
        })?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                SyncError::Cache(format!("Redis SET NX failed: {e}"))
            })?;
        let acquired = reply.is_some();
        debug!(key, acquired, "Cache SET NX");
        Ok(acquired)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        debug!("Cache DELETE: {}", key);
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(key).await.map_err(|e| {
            SyncError::Cache(format!("Redis DEL failed: {e}"))
        })?;
        Ok(removed > 0)
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        expected: &str,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .release_script
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                SyncError::Cache(format!("Redis compare-and-delete failed: {e}"))
            })?;
        debug!(key, released = removed > 0, "Cache compare-and-delete");
        Ok(removed > 0)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let swapped: i64 = self
            .swap_script
            .key(key)
            .arg(expected)
            .arg(value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                SyncError::Cache(format!("Redis compare-and-set failed: {e}"))
            })?;
        debug!(key, swapped = swapped > 0, "Cache compare-and-set");
        Ok(swapped > 0)
    }

    async fn scan_delete(
        &self,
        pattern: &str,
        count: usize,
        max_iterations: usize,
    ) -> Result<ScanDeleteReport> {
        debug!("Cache SCAN-DELETE pattern: {}", pattern);
        let mut conn = self.conn.clone();
        let mut report = ScanDeleteReport {
            pattern: pattern.to_string(),
            ..Default::default()
        };
        let mut cursor: u64 = 0;

        loop {
            if report.iterations >= max_iterations {
                report.truncated = true;
                break;
            }
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(count.max(1))
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    SyncError::Cache(format!("Redis SCAN failed: {e}"))
                })?;
            report.iterations += 1;

            // One key per DEL so sharded deployments never see a
            // cross-slot request.
            for key in &keys {
                let removed: u64 = conn.del(key).await.map_err(|e| {
                    SyncError::Cache(format!("Redis DEL failed: {e}"))
                })?;
                report.deleted += removed;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        debug!(
            pattern,
            deleted = report.deleted,
            iterations = report.iterations,
            "Cache SCAN-DELETE finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_mode_is_read_from_info() {
        assert!(cluster_enabled("# Cluster\r\ncluster_enabled:1\r\n"));
        assert!(!cluster_enabled("# Cluster\r\ncluster_enabled:0\r\n"));
        // Servers without the section report nothing.
        assert!(!cluster_enabled(""));
    }

    #[test]
    fn ttl_is_never_rounded_down_to_zero() {
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2_000);
    }
}
