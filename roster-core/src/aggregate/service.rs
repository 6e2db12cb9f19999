use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::{CacheBackend, CacheKeys};
use crate::config::AggregateConfig;
use crate::error::{Result, SyncError};
use crate::lock::AggregateLock;
use crate::ports::ConsumerIdentityResolver;
use crate::queue::{
    AggregateComputeJob, EnqueueRequest, JobId, JobPayload, QueueService,
};
use crate::types::{AggregateKey, InitiatorId, TenantId};

/// What a trigger did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AggregateRequestOutcome {
    /// A fresh value was already cached.
    Cached { value: u64 },
    /// The lock was taken and a computation job queued.
    Queued { job_id: JobId },
    /// Another computation holds the lock; nothing was queued.
    AlreadyRunning,
}

/// Trigger side of the locked aggregate computation. Owns lock
/// acquisition; [`super::LockedAggregateJob`] owns release.
#[derive(Clone)]
pub struct AggregateService {
    cache: Arc<dyn CacheBackend>,
    lock: AggregateLock,
    queue: Arc<dyn QueueService>,
    identity: Arc<dyn ConsumerIdentityResolver>,
    config: AggregateConfig,
}

impl fmt::Debug for AggregateService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateService")
            .field("lock", &self.lock)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AggregateService {
    pub fn new(
        cache: Arc<dyn CacheBackend>,
        lock: AggregateLock,
        queue: Arc<dyn QueueService>,
        identity: Arc<dyn ConsumerIdentityResolver>,
        config: AggregateConfig,
    ) -> Self {
        Self {
            cache,
            lock,
            queue,
            identity,
            config,
        }
    }

    pub async fn request(
        &self,
        tenant_id: TenantId,
        initiator_id: Option<String>,
    ) -> Result<AggregateRequestOutcome> {
        let initiator_id = InitiatorId::from_optional(initiator_id);
        let consumer_id =
            self.identity.resolve_consumer_id(tenant_id).await.map_err(|err| {
                SyncError::Collaborator(format!(
                    "consumer identity unavailable for tenant {tenant_id}: {err}"
                ))
            })?;
        let key = AggregateKey::new(tenant_id, consumer_id.clone());

        if let Some(raw) = self.cache.get(&CacheKeys::aggregate_count(&key)).await? {
            match raw.parse::<u64>() {
                Ok(value) => return Ok(AggregateRequestOutcome::Cached { value }),
                Err(_) => warn!(scope = %key, raw = %raw, "ignoring unreadable cached aggregate"),
            }
        }

        let Some(lease) = self.lock.try_acquire(&key).await? else {
            info!(scope = %key, "aggregate computation already running");
            return Ok(AggregateRequestOutcome::AlreadyRunning);
        };

        let request = EnqueueRequest::new(
            JobPayload::AggregateCompute(AggregateComputeJob {
                tenant_id,
                consumer_id,
                initiator_id,
                lock_token: lease.token.clone(),
            }),
            self.config.max_attempts,
            self.config.timeout(),
        );
        match self.queue.enqueue(request).await {
            Ok(handle) => {
                info!(scope = %key, job_id = %handle.job_id, "aggregate computation queued");
                Ok(AggregateRequestOutcome::Queued {
                    job_id: handle.job_id,
                })
            }
            Err(err) => {
                if let Err(release_err) = self.lock.release(&key, &lease.token).await {
                    warn!(scope = %key, error = %release_err, "aggregate lock release failed");
                }
                Err(err)
            }
        }
    }
}
