use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::bus::{ProgressEvent, ProgressPayload, ProgressPublisher, announce};
use crate::cache::{CacheBackend, CacheKeys};
use crate::config::AggregateConfig;
use crate::error::Result;
use crate::lock::{AggregateLock, LockToken};
use crate::ports::AggregateSource;
use crate::queue::AggregateComputeJob;
use crate::types::{AggregateFailure, AggregateKey, AggregateResult};

/// Computes the aggregate while the trigger's lock is held. Both terminal
/// paths end by releasing that lock with the token carried in the job.
#[derive(Clone)]
pub struct LockedAggregateJob {
    source: Arc<dyn AggregateSource>,
    cache: Arc<dyn CacheBackend>,
    lock: AggregateLock,
    progress: Arc<dyn ProgressPublisher>,
    config: AggregateConfig,
}

impl fmt::Debug for LockedAggregateJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedAggregateJob")
            .field("lock", &self.lock)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LockedAggregateJob {
    pub fn new(
        source: Arc<dyn AggregateSource>,
        cache: Arc<dyn CacheBackend>,
        lock: AggregateLock,
        progress: Arc<dyn ProgressPublisher>,
        config: AggregateConfig,
    ) -> Self {
        Self {
            source,
            cache,
            lock,
            progress,
            config,
        }
    }

    /// One attempt. An error leaves the lock in place for the next attempt.
    pub async fn handle(&self, job: &AggregateComputeJob) -> Result<AggregateResult> {
        let key = AggregateKey::new(job.tenant_id, job.consumer_id.clone());
        let value = self.source.compute(job.tenant_id, &job.consumer_id).await?;
        let result = AggregateResult {
            tenant_id: job.tenant_id,
            consumer_id: job.consumer_id.clone(),
            initiator_id: job.initiator_id.clone(),
            value,
            computed_at: Utc::now(),
        };

        if let Err(err) = self
            .cache
            .set(
                &CacheKeys::aggregate_count(&key),
                &value.to_string(),
                Some(self.config.cache_ttl()),
            )
            .await
        {
            warn!(scope = %key, error = %err, "aggregate value not cached");
        }
        info!(
            scope = %key,
            initiator_id = %job.initiator_id,
            value,
            "aggregate computed"
        );
        announce(
            self.progress.as_ref(),
            ProgressEvent::new(
                job.tenant_id,
                ProgressPayload::AggregateComputed(result.clone()),
            ),
        )
        .await;
        self.release(&key, &job.lock_token).await;
        Ok(result)
    }

    /// Terminal failure path, run once the queue gave up on the job.
    pub async fn fail(&self, job: &AggregateComputeJob, error: &str) -> Result<()> {
        let key = AggregateKey::new(job.tenant_id, job.consumer_id.clone());
        let failure = AggregateFailure {
            tenant_id: job.tenant_id,
            consumer_id: job.consumer_id.clone(),
            initiator_id: job.initiator_id.clone(),
            error_message: error.to_string(),
            computed_at: Utc::now(),
        };
        warn!(scope = %key, error, "aggregate computation failed permanently");
        announce(
            self.progress.as_ref(),
            ProgressEvent::new(
                job.tenant_id,
                ProgressPayload::AggregateComputationFailed(failure),
            ),
        )
        .await;
        self.release(&key, &job.lock_token).await;
        Ok(())
    }

    async fn release(&self, key: &AggregateKey, token: &LockToken) {
        match self.lock.release(key, token).await {
            Ok(true) => debug!(scope = %key, "aggregate lock released"),
            Ok(false) => warn!(
                scope = %key,
                "aggregate lock no longer held by this job"
            ),
            Err(err) => warn!(
                scope = %key,
                error = %err,
                "aggregate lock release failed; TTL will reclaim it"
            ),
        }
    }
}
