//! The chained sync pipeline: coordinator, start/complete phases, batch
//! worker, post-run invalidation and the stall watchdog.

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::bus::ProgressPublisher;
use crate::cache::CacheBackend;
use crate::config::PipelineConfig;
use crate::lock::{AggregateLock, DistributedLock, RunLock};
use crate::ports::{
    AggregateSource, ConsumerIdentityResolver, EntityFreshness, RecordFetcher,
    Syncer,
};
use crate::queue::QueueService;
use crate::store::SyncRunRepository;
use crate::types::{SyncId, TenantId};

pub mod batch;
pub mod coordinator;
pub mod invalidation;
pub mod phase;
pub mod watchdog;

pub use batch::BatchWorker;
pub use coordinator::{SyncCoordinator, SyncRequest};
pub use invalidation::{CacheInvalidator, InvalidationReport};
pub use phase::PhaseRunner;
pub use watchdog::StallWatchdog;

/// Shared infrastructure every pipeline component works against.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<PipelineConfig>,
    pub runs: Arc<dyn SyncRunRepository>,
    pub queue: Arc<dyn QueueService>,
    pub progress: Arc<dyn ProgressPublisher>,
    pub cache: Arc<dyn CacheBackend>,
    pub run_lock: RunLock,
    pub aggregate_lock: AggregateLock,
}

impl fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext")
            .field("config", &self.config)
            .field("run_lock", &self.run_lock)
            .field("aggregate_lock", &self.aggregate_lock)
            .finish_non_exhaustive()
    }
}

impl PipelineContext {
    pub fn new(
        config: PipelineConfig,
        runs: Arc<dyn SyncRunRepository>,
        queue: Arc<dyn QueueService>,
        progress: Arc<dyn ProgressPublisher>,
        cache: Arc<dyn CacheBackend>,
    ) -> Self {
        let lock = DistributedLock::new(Arc::clone(&cache));
        let run_lock = RunLock::new(lock.clone(), config.run_lock_ttl());
        let aggregate_lock = AggregateLock::new(lock, config.aggregate.lock_ttl());
        Self {
            config: Arc::new(config),
            runs,
            queue,
            progress,
            cache,
            run_lock,
            aggregate_lock,
        }
    }

    /// Marks a live run as progressing: bumps its watchdog clock and renews
    /// the tenant's run lock so a long roster never loses exclusivity.
    pub async fn keep_alive(&self, tenant_id: TenantId, sync_id: SyncId) {
        if let Err(err) = self.runs.touch(sync_id).await {
            warn!(sync_id = %sync_id, error = %err, "run activity not recorded");
        }
        match self.run_lock.extend(tenant_id, sync_id).await {
            Ok(true) => {}
            Ok(false) => warn!(
                sync_id = %sync_id,
                tenant_id = %tenant_id,
                "run lock no longer held by this run"
            ),
            Err(err) => warn!(
                sync_id = %sync_id,
                error = %err,
                "run lock renewal failed"
            ),
        }
    }
}

/// The external systems the pipeline drives.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn RecordFetcher>,
    pub syncer: Arc<dyn Syncer>,
    pub identity: Arc<dyn ConsumerIdentityResolver>,
    pub aggregate_source: Arc<dyn AggregateSource>,
    pub freshness: Arc<dyn EntityFreshness>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("fetcher", &"RecordFetcher")
            .field("syncer", &"Syncer")
            .field("identity", &"ConsumerIdentityResolver")
            .field("aggregate_source", &"AggregateSource")
            .field("freshness", &"EntityFreshness")
            .finish()
    }
}
