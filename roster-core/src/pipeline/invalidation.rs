use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{CacheBackend, CacheKeys, ScanDeleteReport};
use crate::config::InvalidationConfig;
use crate::lock::AggregateLock;
use crate::ports::EntityFreshness;
use crate::types::{AggregateKey, ConsumerId, TenantId};

/// What one post-run invalidation pass did. Step failures are collected
/// rather than raised.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct InvalidationReport {
    pub aggregate_cleared: bool,
    pub stale_lock_purged: bool,
    pub entities_bumped: u64,
    pub scans: Vec<ScanDeleteReport>,
    pub errors: Vec<String>,
}

impl InvalidationReport {
    pub fn deleted_keys(&self) -> u64 {
        u64::from(self.aggregate_cleared)
            + u64::from(self.stale_lock_purged)
            + self.scans.iter().map(|s| s.deleted).sum::<u64>()
    }

    pub fn scan_iterations(&self) -> usize {
        self.scans.iter().map(|s| s.iterations).sum()
    }
}

/// Advisory cache invalidation after a run. Never fails the caller.
#[derive(Clone)]
pub struct CacheInvalidator {
    cache: Arc<dyn CacheBackend>,
    aggregate_lock: AggregateLock,
    freshness: Arc<dyn EntityFreshness>,
    config: InvalidationConfig,
}

impl fmt::Debug for CacheInvalidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheInvalidator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CacheInvalidator {
    pub fn new(
        cache: Arc<dyn CacheBackend>,
        aggregate_lock: AggregateLock,
        freshness: Arc<dyn EntityFreshness>,
        config: InvalidationConfig,
    ) -> Self {
        Self {
            cache,
            aggregate_lock,
            freshness,
            config,
        }
    }

    /// Drops the `(tenant, consumer)` aggregate entry (and its lock when the
    /// lock has outlived its expiry), marks local entities stale, then
    /// removes the tenant's record caches with bounded scans.
    pub async fn invalidate(
        &self,
        tenant_id: TenantId,
        consumer_id: Option<&ConsumerId>,
    ) -> InvalidationReport {
        let mut report = InvalidationReport::default();

        match consumer_id {
            Some(consumer_id) => {
                let key = AggregateKey::new(tenant_id, consumer_id.clone());
                match self.cache.delete(&CacheKeys::aggregate_count(&key)).await {
                    Ok(cleared) => report.aggregate_cleared = cleared,
                    Err(err) => report.errors.push(format!("aggregate key: {err}")),
                }
                match self.aggregate_lock.purge_if_stale(&key).await {
                    Ok(purged) => report.stale_lock_purged = purged,
                    Err(err) => report.errors.push(format!("aggregate lock: {err}")),
                }
            }
            None => debug!(
                tenant_id = %tenant_id,
                "no consumer identity, aggregate entry left alone"
            ),
        }

        match self.freshness.bump_tenant_entities(tenant_id).await {
            Ok(bumped) => report.entities_bumped = bumped,
            Err(err) => report.errors.push(format!("freshness: {err}")),
        }

        for pattern in self.config.patterns_for(&tenant_id.to_string()) {
            match self
                .cache
                .scan_delete(
                    &pattern,
                    self.config.scan_count,
                    self.config.max_iterations,
                )
                .await
            {
                Ok(scan) => {
                    if scan.truncated {
                        warn!(
                            tenant_id = %tenant_id,
                            pattern = %scan.pattern,
                            iterations = scan.iterations,
                            "cache scan hit its iteration bound"
                        );
                    }
                    report.scans.push(scan);
                }
                Err(err) => report.errors.push(format!("scan {pattern}: {err}")),
            }
        }

        if !report.errors.is_empty() {
            warn!(
                tenant_id = %tenant_id,
                errors = ?report.errors,
                "cache invalidation partially failed"
            );
        }
        info!(
            tenant_id = %tenant_id,
            deleted_keys = report.deleted_keys(),
            scan_iterations = report.scan_iterations(),
            entities_bumped = report.entities_bumped,
            "tenant caches invalidated"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::error::{Result, SyncError};
    use crate::lock::{DistributedLock, LockState, LockToken};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::time::Duration;

    struct Counting(u64);

    #[async_trait]
    impl EntityFreshness for Counting {
        async fn bump_tenant_entities(&self, _tenant_id: TenantId) -> Result<u64> {
            Ok(self.0)
        }
    }

    struct Broken;

    #[async_trait]
    impl EntityFreshness for Broken {
        async fn bump_tenant_entities(&self, _tenant_id: TenantId) -> Result<u64> {
            Err(SyncError::Database("entity store offline".into()))
        }
    }

    fn invalidator(
        cache: &InMemoryCache,
        freshness: Arc<dyn EntityFreshness>,
    ) -> CacheInvalidator {
        let cache: Arc<dyn CacheBackend> = Arc::new(cache.clone());
        let lock = AggregateLock::new(
            DistributedLock::new(Arc::clone(&cache)),
            Duration::from_secs(60),
        );
        CacheInvalidator::new(cache, lock, freshness, InvalidationConfig::default())
    }

    #[tokio::test]
    async fn clears_aggregate_stale_lock_and_tenant_records() {
        let cache = InMemoryCache::new();
        let tenant = TenantId::new();
        let other = TenantId::new();
        let consumer = ConsumerId::new("acme");
        let key = AggregateKey::new(tenant, consumer.clone());

        cache
            .set(&CacheKeys::aggregate_count(&key), "42", None)
            .await
            .unwrap();
        let stale = LockState {
            owner_token: LockToken::generate(),
            acquired_at: Utc::now() - chrono::Duration::hours(2),
            expires_at: Utc::now() - chrono::Duration::hours(1),
        };
        cache
            .set(
                &CacheKeys::aggregate_lock(&key),
                &serde_json::to_string(&stale).unwrap(),
                None,
            )
            .await
            .unwrap();
        for i in 0..3 {
            cache
                .set(&format!("employee:{tenant}:{i}"), "x", None)
                .await
                .unwrap();
        }
        cache
            .set(&format!("employees:{tenant}:list"), "x", None)
            .await
            .unwrap();
        cache
            .set(&format!("employee:{other}:1"), "x", None)
            .await
            .unwrap();

        let report = invalidator(&cache, Arc::new(Counting(7)))
            .invalidate(tenant, Some(&consumer))
            .await;

        assert!(report.aggregate_cleared);
        assert!(report.stale_lock_purged);
        assert_eq!(report.entities_bumped, 7);
        assert_eq!(report.deleted_keys(), 6);
        assert!(report.errors.is_empty());
        assert_eq!(cache.keys(), vec![format!("employee:{other}:1")]);
    }

    #[tokio::test]
    async fn live_aggregate_lock_is_kept() {
        let cache = InMemoryCache::new();
        let tenant = TenantId::new();
        let consumer = ConsumerId::new("acme");
        let inv = invalidator(&cache, Arc::new(Counting(0)));
        inv.aggregate_lock
            .try_acquire(&AggregateKey::new(tenant, consumer.clone()))
            .await
            .unwrap()
            .unwrap();

        let report = inv.invalidate(tenant, Some(&consumer)).await;
        assert!(!report.stale_lock_purged);
        assert_eq!(cache.keys().len(), 1);
    }

    #[tokio::test]
    async fn step_failures_are_reported_not_raised() {
        let cache = InMemoryCache::new();
        let tenant = TenantId::new();
        cache
            .set(&format!("employee:{tenant}:1"), "x", None)
            .await
            .unwrap();

        let report = invalidator(&cache, Arc::new(Broken))
            .invalidate(tenant, None)
            .await;
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.deleted_keys(), 1);
        assert!(cache.keys().is_empty());
    }
}
