//! TTL-bounded, owner-tokened mutex on top of a [`CacheBackend`].
//!
//! Acquisition is a single SET-if-absent carrying a JSON [`LockState`]; the
//! cache TTL is the safety net against a holder that dies. Release is a
//! compare-and-delete against the exact stored value, so a holder whose
//! lease lapsed can never remove a lock that someone else acquired since.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CacheBackend, CacheKeys};
use crate::error::{Result, SyncError};
use crate::types::{AggregateKey, SyncId, TenantId};

/// Identifies one acquisition of a lock.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockToken(String);

impl LockToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LockToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value stored under a lock key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LockState {
    pub owner_token: LockToken,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LockState {
    fn new(owner_token: LockToken, ttl: Duration) -> Self {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .unwrap_or(chrono::Duration::seconds(60));
        Self {
            owner_token,
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A successful acquisition.
#[derive(Clone, Debug, PartialEq)]
pub struct LockLease {
    pub key: String,
    pub token: LockToken,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct DistributedLock {
    cache: Arc<dyn CacheBackend>,
}

impl fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedLock").finish_non_exhaustive()
    }
}

impl DistributedLock {
    pub fn new(cache: Arc<dyn CacheBackend>) -> Self {
        Self { cache }
    }

    /// Returns `None` while another holder's lock is live.
    pub async fn try_acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<LockLease>> {
        self.try_acquire_as(key, LockToken::generate(), ttl).await
    }

    /// Same as [`DistributedLock::try_acquire`] with a caller-chosen token.
    pub async fn try_acquire_as(
        &self,
        key: &str,
        token: LockToken,
        ttl: Duration,
    ) -> Result<Option<LockLease>> {
        let state = LockState::new(token, ttl);
        let raw = serde_json::to_string(&state)?;
        if !self.cache.set_if_absent(key, &raw, ttl).await? {
            debug!(key, "lock already held");
            return Ok(None);
        }
        debug!(key, token = %state.owner_token, "lock acquired");
        Ok(Some(LockLease {
            key: key.to_string(),
            token: state.owner_token,
            expires_at: state.expires_at,
        }))
    }

    pub async fn inspect(&self, key: &str) -> Result<Option<LockState>> {
        match self.cache.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Releases `key` if and only if it is still held by `token`.
    pub async fn release(&self, key: &str, token: &LockToken) -> Result<bool> {
        let Some(raw) = self.cache.get(key).await? else {
            debug!(key, "lock already gone at release");
            return Ok(false);
        };
        let state: LockState = match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(err) => {
                warn!(key, error = %err, "unreadable lock value left in place");
                return Ok(false);
            }
        };
        if &state.owner_token != token {
            warn!(
                key,
                held_by = %state.owner_token,
                released_by = %token,
                "refusing to release a lock owned by another holder"
            );
            return Ok(false);
        }
        let released = self.cache.compare_and_delete(key, &raw).await?;
        debug!(key, released, "lock release");
        Ok(released)
    }

    /// Pushes the expiry of a lock still held by `token` to `ttl` from now.
    /// Returns `false` when the lock lapsed or changed hands.
    pub async fn extend(
        &self,
        key: &str,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool> {
        let Some(raw) = self.cache.get(key).await? else {
            return Ok(false);
        };
        let Ok(state) = serde_json::from_str::<LockState>(&raw) else {
            return Ok(false);
        };
        if &state.owner_token != token {
            return Ok(false);
        }
        let refreshed = LockState {
            acquired_at: state.acquired_at,
            ..LockState::new(state.owner_token, ttl)
        };
        let extended = self
            .cache
            .compare_and_set(key, &raw, &serde_json::to_string(&refreshed)?, ttl)
            .await?;
        debug!(key, extended, expires_at = %refreshed.expires_at, "lock extend");
        Ok(extended)
    }

    /// Removes the lock only when its recorded expiry has passed.
    pub async fn purge_if_stale(&self, key: &str) -> Result<bool> {
        let Some(raw) = self.cache.get(key).await? else {
            return Ok(false);
        };
        let stale = match serde_json::from_str::<LockState>(&raw) {
            Ok(state) => state.is_expired(Utc::now()),
            // Anything that is not a lock we wrote is treated as debris.
            Err(_) => true,
        };
        if !stale {
            return Ok(false);
        }
        let purged = self.cache.compare_and_delete(key, &raw).await?;
        if purged {
            info!(key, "purged stale lock");
        }
        Ok(purged)
    }
}

/// Guards the expensive aggregate computation per `(tenant, consumer)`.
#[derive(Clone, Debug)]
pub struct AggregateLock {
    lock: DistributedLock,
    ttl: Duration,
}

impl AggregateLock {
    pub fn new(lock: DistributedLock, ttl: Duration) -> Self {
        Self { lock, ttl }
    }

    pub async fn try_acquire(
        &self,
        key: &AggregateKey,
    ) -> Result<Option<LockLease>> {
        self.lock
            .try_acquire(&CacheKeys::aggregate_lock(key), self.ttl)
            .await
    }

    pub async fn release(
        &self,
        key: &AggregateKey,
        token: &LockToken,
    ) -> Result<bool> {
        self.lock
            .release(&CacheKeys::aggregate_lock(key), token)
            .await
    }

    pub async fn is_held(&self, key: &AggregateKey) -> Result<bool> {
        Ok(self
            .lock
            .inspect(&CacheKeys::aggregate_lock(key))
            .await?
            .is_some())
    }

    pub async fn purge_if_stale(&self, key: &AggregateKey) -> Result<bool> {
        self.lock
            .purge_if_stale(&CacheKeys::aggregate_lock(key))
            .await
    }
}

/// One active sync run per tenant. The owner token is the run's sync id, so
/// whoever finalizes a run can release its lock without extra bookkeeping.
#[derive(Clone, Debug)]
pub struct RunLock {
    lock: DistributedLock,
    ttl: Duration,
}

impl RunLock {
    pub fn new(lock: DistributedLock, ttl: Duration) -> Self {
        Self { lock, ttl }
    }

    /// Fails with [`SyncError::Conflict`] while a run holds the tenant.
    pub async fn acquire(
        &self,
        tenant_id: TenantId,
        sync_id: SyncId,
    ) -> Result<LockLease> {
        self.lock
            .try_acquire_as(
                &CacheKeys::run_lock(tenant_id),
                Self::token_for(sync_id),
                self.ttl,
            )
            .await?
            .ok_or_else(|| {
                SyncError::Conflict(format!(
                    "a sync run is already active for tenant {tenant_id}"
                ))
            })
    }

    pub async fn release(
        &self,
        tenant_id: TenantId,
        sync_id: SyncId,
    ) -> Result<bool> {
        self.lock
            .release(&CacheKeys::run_lock(tenant_id), &Self::token_for(sync_id))
            .await
    }

    /// Renews the tenant's lock for a run that is still making progress.
    pub async fn extend(
        &self,
        tenant_id: TenantId,
        sync_id: SyncId,
    ) -> Result<bool> {
        self.lock
            .extend(
                &CacheKeys::run_lock(tenant_id),
                &Self::token_for(sync_id),
                self.ttl,
            )
            .await
    }

    /// Sync id of the run holding the tenant, if any.
    pub async fn holder(&self, tenant_id: TenantId) -> Result<Option<String>> {
        Ok(self
            .lock
            .inspect(&CacheKeys::run_lock(tenant_id))
            .await?
            .map(|state| state.owner_token.0))
    }

    fn token_for(sync_id: SyncId) -> LockToken {
        LockToken(sync_id.to_string())
    }
}
