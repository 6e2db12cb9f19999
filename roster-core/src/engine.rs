use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::aggregate::{AggregateService, LockedAggregateJob};
use crate::bus::ProgressPublisher;
use crate::cache::CacheBackend;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::pipeline::{
    BatchWorker, CacheInvalidator, Collaborators, PhaseRunner, PipelineContext,
    StallWatchdog, SyncCoordinator,
};
use crate::queue::{LeaseExpiryScanner, QueueService};
use crate::runtime::{RosterDispatcher, WorkerRuntime};
use crate::store::SyncRunRepository;

/// Everything wired together: the entry points callers use plus the
/// background workers and watchdog that carry runs to completion.
pub struct SyncEngine<Q>
where
    Q: QueueService + LeaseExpiryScanner + 'static,
{
    context: PipelineContext,
    coordinator: SyncCoordinator,
    aggregates: AggregateService,
    watchdog: Arc<StallWatchdog>,
    runtime: WorkerRuntime<Q>,
    watchdog_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<Q> fmt::Debug for SyncEngine<Q>
where
    Q: QueueService + LeaseExpiryScanner + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("queue_type", &type_name::<Q>())
            .field("context", &self.context)
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}

impl<Q> SyncEngine<Q>
where
    Q: QueueService + LeaseExpiryScanner + 'static,
{
    pub fn new(
        config: PipelineConfig,
        queue: Arc<Q>,
        runs: Arc<dyn SyncRunRepository>,
        cache: Arc<dyn CacheBackend>,
        progress: Arc<dyn ProgressPublisher>,
        collaborators: Collaborators,
    ) -> Self {
        let lease = config.lease;
        let context = PipelineContext::new(
            config,
            runs,
            Arc::clone(&queue) as Arc<dyn QueueService>,
            Arc::clone(&progress),
            Arc::clone(&cache),
        );
        let config = Arc::clone(&context.config);

        let invalidator = CacheInvalidator::new(
            Arc::clone(&cache),
            context.aggregate_lock.clone(),
            Arc::clone(&collaborators.freshness),
            config.invalidation.clone(),
        );
        let phases = PhaseRunner::new(
            context.clone(),
            invalidator,
            Arc::clone(&collaborators.identity),
        );
        let batches = BatchWorker::new(
            context.clone(),
            Arc::clone(&collaborators.syncer),
            Arc::clone(&collaborators.identity),
        );
        let aggregate_job = LockedAggregateJob::new(
            Arc::clone(&collaborators.aggregate_source),
            Arc::clone(&cache),
            context.aggregate_lock.clone(),
            progress,
            config.aggregate,
        );
        let aggregates = AggregateService::new(
            cache,
            context.aggregate_lock.clone(),
            Arc::clone(&context.queue),
            Arc::clone(&collaborators.identity),
            config.aggregate,
        );
        let coordinator = SyncCoordinator::new(
            context.clone(),
            Arc::clone(&collaborators.fetcher),
            Arc::clone(&collaborators.identity),
        );
        let watchdog = Arc::new(StallWatchdog::new(context.clone(), phases.clone()));
        let dispatcher = Arc::new(RosterDispatcher::new(phases, batches, aggregate_job));
        let runtime = WorkerRuntime::new(queue, dispatcher, lease);

        Self {
            context,
            coordinator,
            aggregates,
            watchdog,
            runtime,
            watchdog_handle: Mutex::new(None),
        }
    }

    /// Starts the worker pools, the lease housekeeper and the watchdog.
    pub async fn start(&self) {
        self.runtime.start(&self.context.config.workers).await;
        let handle = Arc::clone(&self.watchdog).spawn(self.runtime.shutdown_token());
        *self.watchdog_handle.lock().await = Some(handle);
        info!("sync engine started");
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.runtime.shutdown().await?;
        if let Some(handle) = self.watchdog_handle.lock().await.take()
            && let Err(err) = handle.await
        {
            warn!("watchdog task failed: {err:?}");
        }
        info!("sync engine stopped");
        Ok(())
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    pub fn aggregates(&self) -> &AggregateService {
        &self.aggregates
    }

    pub fn watchdog(&self) -> &StallWatchdog {
        &self.watchdog
    }

    pub fn runtime(&self) -> &WorkerRuntime<Q> {
        &self.runtime
    }

    pub fn runs(&self) -> Arc<dyn SyncRunRepository> {
        Arc::clone(&self.context.runs)
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }
}
