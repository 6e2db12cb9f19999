use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::{CacheInvalidator, PipelineContext};
use crate::bus::{
    ProgressEvent, ProgressPayload, SyncCompleted, SyncStarted, announce,
};
use crate::error::{Result, SyncError};
use crate::ports::ConsumerIdentityResolver;
use crate::queue::{SyncCompleteJob, SyncStartJob};
use crate::types::{ConsumerId, SyncId, SyncRun, SyncStatus};

/// The two jobs bracketing a run, plus the forced termination used when a
/// run can no longer finish on its own.
#[derive(Clone)]
pub struct PhaseRunner {
    ctx: PipelineContext,
    invalidator: CacheInvalidator,
    identity: Arc<dyn ConsumerIdentityResolver>,
}

impl fmt::Debug for PhaseRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseRunner")
            .field("invalidator", &self.invalidator)
            .finish_non_exhaustive()
    }
}

impl PhaseRunner {
    pub fn new(
        ctx: PipelineContext,
        invalidator: CacheInvalidator,
        identity: Arc<dyn ConsumerIdentityResolver>,
    ) -> Self {
        Self {
            ctx,
            invalidator,
            identity,
        }
    }

    async fn load(&self, sync_id: SyncId) -> Result<SyncRun> {
        self.ctx
            .runs
            .get(sync_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("sync run {sync_id}")))
    }

    /// Moves the run to `running` and announces its shape. A retried start
    /// re-announces without a second transition.
    pub async fn start(&self, job: &SyncStartJob) -> Result<()> {
        let run = self.load(job.sync_id).await?;
        let run = match run.status {
            SyncStatus::Pending => {
                self.ctx
                    .runs
                    .transition(job.sync_id, SyncStatus::Running, Utc::now())
                    .await?
            }
            SyncStatus::Running => run,
            status => {
                return Err(SyncError::InvalidState(format!(
                    "sync {} is already {status}",
                    job.sync_id
                )));
            }
        };
        self.ctx.keep_alive(run.tenant_id, run.id).await;

        info!(
            sync_id = %run.id,
            tenant_id = %run.tenant_id,
            initiator_id = %run.initiator_id,
            total_records = run.total_records,
            total_batches = run.total_batches,
            "sync run started"
        );
        let started_at = run.started_at.unwrap_or_else(Utc::now);
        announce(
            self.ctx.progress.as_ref(),
            ProgressEvent::new(
                run.tenant_id,
                ProgressPayload::SyncStarted(SyncStarted::from_run(&run, started_at)),
            ),
        )
        .await;
        Ok(())
    }

    /// Finalizes the run from its recorded outcomes, announces it, then
    /// invalidates caches and frees the tenant.
    pub async fn complete(&self, job: &SyncCompleteJob) -> Result<()> {
        let run = self.load(job.sync_id).await?;
        if run.status.is_terminal() {
            debug!(sync_id = %run.id, status = %run.status, "run already finalized");
            self.release_run_lock(&run).await;
            return Ok(());
        }

        let totals = self.ctx.runs.totals(run.id).await?;
        if totals.batches_reported != run.total_batches {
            warn!(
                sync_id = %run.id,
                reported = totals.batches_reported,
                expected = run.total_batches,
                "completing with missing batch outcomes"
            );
        }
        let handled = totals.processed_count + totals.failed_count;
        if handled != run.total_records {
            error!(
                sync_id = %run.id,
                handled,
                total_records = run.total_records,
                "batch outcomes do not account for every record"
            );
        }

        let status = SyncStatus::from_failures(totals.failed_count);
        let run = self.ctx.runs.transition(run.id, status, Utc::now()).await?;
        let completed =
            SyncCompleted::from_run(&run, totals.processed_count, totals.failed_count);
        info!(
            sync_id = %run.id,
            tenant_id = %run.tenant_id,
            status = %run.status,
            processed = totals.processed_count,
            failed = totals.failed_count,
            duration_seconds = completed.duration_seconds,
            "sync run completed"
        );
        announce(
            self.ctx.progress.as_ref(),
            ProgressEvent::new(run.tenant_id, ProgressPayload::SyncCompleted(completed)),
        )
        .await;

        let consumer_id = self.consumer_for(&run).await;
        self.invalidator
            .invalidate(run.tenant_id, consumer_id.as_ref())
            .await;
        self.release_run_lock(&run).await;
        Ok(())
    }

    /// Forces a non-terminal run to `failed`: announces the failure with the
    /// counters recorded so far, cancels the rest of its chain and frees the
    /// tenant. Returns `false` when the run had already finished.
    pub async fn abort(&self, sync_id: SyncId, reason: &str) -> Result<bool> {
        let run = self.load(sync_id).await?;
        if run.status.is_terminal() {
            debug!(sync_id = %sync_id, status = %run.status, "abort skipped");
            self.release_run_lock(&run).await;
            return Ok(false);
        }

        let run = self.ctx.runs.mark_failed(sync_id, reason, Utc::now()).await?;
        let totals = self.ctx.runs.totals(sync_id).await?;
        announce(
            self.ctx.progress.as_ref(),
            ProgressEvent::new(
                run.tenant_id,
                ProgressPayload::SyncCompleted(SyncCompleted::from_run(
                    &run,
                    totals.processed_count,
                    totals.failed_count,
                )),
            ),
        )
        .await;

        let cancelled = match self.ctx.queue.cancel_sync(sync_id).await {
            Ok(cancelled) => cancelled,
            Err(err) => {
                warn!(sync_id = %sync_id, error = %err, "could not cancel remaining jobs");
                0
            }
        };
        self.release_run_lock(&run).await;
        warn!(
            sync_id = %sync_id,
            tenant_id = %run.tenant_id,
            reason,
            cancelled_jobs = cancelled,
            "sync run aborted"
        );
        Ok(true)
    }

    async fn consumer_for(&self, run: &SyncRun) -> Option<ConsumerId> {
        if let Some(consumer_id) = &run.consumer_id {
            return Some(consumer_id.clone());
        }
        match self.identity.resolve_consumer_id(run.tenant_id).await {
            Ok(consumer_id) => Some(consumer_id),
            Err(err) => {
                warn!(
                    tenant_id = %run.tenant_id,
                    error = %err,
                    "consumer identity unavailable for invalidation"
                );
                None
            }
        }
    }

    async fn release_run_lock(&self, run: &SyncRun) {
        match self.ctx.run_lock.release(run.tenant_id, run.id).await {
            Ok(true) => debug!(sync_id = %run.id, "run lock released"),
            Ok(false) => {}
            Err(err) => warn!(
                sync_id = %run.id,
                error = %err,
                "run lock release failed; TTL will reclaim it"
            ),
        }
    }
}
