use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dispatcher::{DispatchStatus, JobDispatcher};
use crate::config::{LeaseConfig, WorkerConfig};
use crate::error::Result;
use crate::queue::{
    DequeueRequest, FailOutcome, JobKind, JobLease, LeaseExpiryScanner,
    QueueService,
};

/// Worker pools plus the lease housekeeper around one queue.
pub struct WorkerRuntime<Q>
where
    Q: QueueService + LeaseExpiryScanner + 'static,
{
    queue: Arc<Q>,
    dispatcher: Arc<dyn JobDispatcher>,
    lease: LeaseConfig,
    shutdown_token: CancellationToken,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<Q> fmt::Debug for WorkerRuntime<Q>
where
    Q: QueueService + LeaseExpiryScanner + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let worker_handle_count = self
            .worker_handles
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();
        f.debug_struct("WorkerRuntime")
            .field("queue_type", &type_name::<Q>())
            .field("lease", &self.lease)
            .field("worker_handle_count", &worker_handle_count)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl<Q> WorkerRuntime<Q>
where
    Q: QueueService + LeaseExpiryScanner + 'static,
{
    pub fn new(
        queue: Arc<Q>,
        dispatcher: Arc<dyn JobDispatcher>,
        lease: LeaseConfig,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            lease,
            shutdown_token: CancellationToken::new(),
            worker_handles: Mutex::new(Vec::new()),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Spawns the sync-chain and aggregate pools and the housekeeper.
    pub async fn start(&self, workers: &WorkerConfig) {
        self.spawn_worker_pool(&JobKind::SYNC_CHAIN, workers.sync_workers)
            .await;
        self.spawn_worker_pool(
            &[JobKind::AggregateCompute],
            workers.aggregate_workers,
        )
        .await;
        self.spawn_housekeeper().await;
        info!(
            sync_workers = workers.sync_workers,
            aggregate_workers = workers.aggregate_workers,
            "worker runtime started"
        );
    }

    async fn spawn_worker_pool(&self, kinds: &[JobKind], parallelism: usize) {
        let group = kinds
            .iter()
            .map(JobKind::as_str)
            .collect::<Vec<_>>()
            .join("+");
        let poll = Duration::from_millis(self.lease.poll_interval_ms);
        let lease_grace = chrono::Duration::seconds(self.lease.lease_grace_secs);

        for i in 0..parallelism {
            let worker_id = format!("{}-{}-w{}", group, std::process::id(), i);
            let q = Arc::clone(&self.queue);
            let d = Arc::clone(&self.dispatcher);
            let shutdown = self.shutdown_token.clone();
            let kinds = kinds.to_vec();

            let handle = tokio::spawn(async move {
                loop {
                    if shutdown.is_cancelled() {
                        info!("Worker {} shutting down", worker_id);
                        break;
                    }

                    let request = DequeueRequest {
                        kinds: kinds.clone(),
                        worker_id: worker_id.clone(),
                        lease_grace,
                    };
                    match q.dequeue(request).await {
                        Ok(Some(lease)) => {
                            process_lease(q.as_ref(), d.as_ref(), lease).await;
                        }
                        Ok(None) => {
                            tokio::select! {
                                _ = shutdown.cancelled() => {}
                                _ = tokio::time::sleep(poll) => {}
                            }
                        }
                        Err(err) => {
                            error!("dequeue error: {err}");
                            tokio::time::sleep(poll).await;
                        }
                    }
                }
            });

            self.worker_handles.lock().await.push(handle);
        }
    }

    async fn spawn_housekeeper(&self) {
        let q = Arc::clone(&self.queue);
        let interval = Duration::from_millis(self.lease.housekeeper_interval_ms);
        let shutdown = self.shutdown_token.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Housekeeper shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if let Err(err) = q.scan_expired_leases().await {
                            warn!("housekeeper scan_expired_leases error: {err}");
                        }
                    }
                }
            }
        });
        self.worker_handles.lock().await.push(handle);
    }

    /// Processes ready jobs on the calling task until none is available.
    /// Jobs whose retry delay has not elapsed are left alone.
    pub async fn run_until_idle(&self) -> Result<usize> {
        let mut processed = 0;
        while self.run_one().await? {
            processed += 1;
        }
        Ok(processed)
    }

    /// Leases and processes a single ready job on the calling task. Returns
    /// `false` when nothing was ready.
    pub async fn run_one(&self) -> Result<bool> {
        let request = DequeueRequest {
            kinds: vec![
                JobKind::SyncStart,
                JobKind::SyncBatch,
                JobKind::SyncComplete,
                JobKind::AggregateCompute,
            ],
            worker_id: "inline".to_string(),
            lease_grace: chrono::Duration::seconds(self.lease.lease_grace_secs),
        };
        let Some(lease) = self.queue.dequeue(request).await? else {
            return Ok(false);
        };
        process_lease(self.queue.as_ref(), self.dispatcher.as_ref(), lease).await;
        Ok(true)
    }

    pub async fn shutdown(&self) -> Result<()> {
        info!("Initiating graceful shutdown of worker runtime");
        self.shutdown_token.cancel();

        let handles = {
            let mut guard = self.worker_handles.lock().await;
            std::mem::take(&mut *guard)
        };

        for handle in handles {
            match tokio::time::timeout(Duration::from_secs(30), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Worker task failed: {:?}", e),
                Err(_) => warn!("Worker task timed out during shutdown"),
            }
        }

        info!("Worker runtime shutdown complete");
        Ok(())
    }
}

/// Runs one leased job under its timeout and settles the lease.
pub async fn process_lease<Q>(
    queue: &Q,
    dispatcher: &dyn JobDispatcher,
    lease: JobLease,
) where
    Q: QueueService + ?Sized,
{
    let job = &lease.job;
    let status =
        match tokio::time::timeout(job.timeout(), dispatcher.dispatch(&lease))
            .await
        {
            Ok(status) => status,
            Err(_) => DispatchStatus::Retry {
                error: format!("timed out after {}ms", job.timeout_ms),
            },
        };

    match status {
        DispatchStatus::Success => {
            if let Err(err) = queue.complete(lease.lease_id).await {
                error!("queue complete error: {err}");
            } else {
                debug!(job_id = %job.id, kind = %job.kind(), "job completed");
            }
        }
        DispatchStatus::Retry { error } => {
            match queue.fail(lease.lease_id, error.clone()).await {
                Ok(FailOutcome::Retrying { attempt, delay }) => {
                    warn!(
                        job_id = %job.id,
                        kind = %job.kind(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "job attempt failed, retrying"
                    );
                }
                Ok(FailOutcome::Exhausted { attempts }) => {
                    error!(
                        job_id = %job.id,
                        kind = %job.kind(),
                        attempts,
                        error = %error,
                        "job permanently failed"
                    );
                    settle_exhausted(dispatcher, &lease, &error).await;
                }
                Err(err) => error!("queue fail error: {err}"),
            }
        }
        DispatchStatus::DeadLetter { error } => {
            match queue.dead_letter(lease.lease_id, error.clone()).await {
                Ok(()) => settle_exhausted(dispatcher, &lease, &error).await,
                Err(err) => error!("queue dead-letter error: {err}"),
            }
        }
    }
}

async fn settle_exhausted(
    dispatcher: &dyn JobDispatcher,
    lease: &JobLease,
    error: &str,
) {
    if let Err(err) = dispatcher.on_exhausted(&lease.job, error).await {
        error!(
            job_id = %lease.job.id,
            kind = %lease.job.kind(),
            error = %err,
            "exhaustion handler failed"
        );
    }
}
