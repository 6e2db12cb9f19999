use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::PipelineContext;
use crate::bus::{ProgressEvent, ProgressPayload, announce};
use crate::error::{Result, SyncError};
use crate::ports::{ApplyError, ConsumerIdentityResolver, Syncer};
use crate::queue::SyncBatchJob;
use crate::types::{BatchOutcome, SyncStatus};

/// Applies one chunk of records. Record-level failures are counted and
/// never abort the batch; a fatal collaborator error fails the attempt so
/// the queue can retry it.
#[derive(Clone)]
pub struct BatchWorker {
    ctx: PipelineContext,
    syncer: Arc<dyn Syncer>,
    identity: Arc<dyn ConsumerIdentityResolver>,
}

impl fmt::Debug for BatchWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchWorker").finish_non_exhaustive()
    }
}

impl BatchWorker {
    pub fn new(
        ctx: PipelineContext,
        syncer: Arc<dyn Syncer>,
        identity: Arc<dyn ConsumerIdentityResolver>,
    ) -> Self {
        Self {
            ctx,
            syncer,
            identity,
        }
    }

    pub async fn handle(&self, job: &SyncBatchJob) -> Result<BatchOutcome> {
        let run = self.ctx.runs.get(job.sync_id).await?.ok_or_else(|| {
            SyncError::NotFound(format!("sync run {}", job.sync_id))
        })?;
        if run.status != SyncStatus::Running {
            return Err(SyncError::InvalidState(format!(
                "sync {} is {}, batch {} skipped",
                job.sync_id, run.status, job.batch_number
            )));
        }
        self.ctx.keep_alive(job.tenant_id, job.sync_id).await;

        // Sync context: the connector scopes every apply by this identity.
        let consumer_id = self
            .identity
            .resolve_consumer_id(job.tenant_id)
            .await
            .map_err(|err| {
                SyncError::Collaborator(format!(
                    "sync context unavailable for tenant {}: {err}",
                    job.tenant_id
                ))
            })?;
        debug!(
            sync_id = %job.sync_id,
            batch_number = job.batch_number,
            consumer_id = %consumer_id,
            records = job.records.len(),
            "batch started"
        );

        let mut outcome = BatchOutcome::new(job.sync_id, job.batch_number);
        for record in &job.records {
            match self.syncer.apply(record, job.tenant_id).await {
                Ok(true) => outcome.record_success(),
                Ok(false) => {
                    outcome.record_failure(record.clone(), "rejected by syncer")
                }
                Err(ApplyError::Record(reason)) => {
                    debug!(
                        sync_id = %job.sync_id,
                        batch_number = job.batch_number,
                        external_id = record.external_id().as_deref().unwrap_or("-"),
                        error = %reason,
                        "record failed"
                    );
                    outcome.record_failure(record.clone(), reason);
                }
                Err(ApplyError::Fatal(reason)) => {
                    return Err(SyncError::Collaborator(format!(
                        "batch {} of sync {} aborted: {reason}",
                        job.batch_number, job.sync_id
                    )));
                }
            }
        }

        self.report(job, outcome).await
    }

    /// Reports a batch whose retries ran out: every record failed with the
    /// batch-level error. The chain stays halted; the watchdog finalizes the
    /// run.
    pub async fn record_exhausted(
        &self,
        job: &SyncBatchJob,
        error: &str,
    ) -> Result<()> {
        let run = self.ctx.runs.get(job.sync_id).await?.ok_or_else(|| {
            SyncError::NotFound(format!("sync run {}", job.sync_id))
        })?;
        if run.status.is_terminal() {
            debug!(
                sync_id = %job.sync_id,
                batch_number = job.batch_number,
                "run already finalized, exhausted batch not reported"
            );
            return Ok(());
        }

        let outcome = BatchOutcome::exhausted(
            job.sync_id,
            job.batch_number,
            job.records.clone(),
            error,
        );
        self.report(job, outcome).await?;
        error!(
            sync_id = %job.sync_id,
            tenant_id = %job.tenant_id,
            batch_number = job.batch_number,
            error,
            "batch permanently failed, chain halted"
        );
        Ok(())
    }

    async fn report(
        &self,
        job: &SyncBatchJob,
        outcome: BatchOutcome,
    ) -> Result<BatchOutcome> {
        if !self.ctx.runs.record_outcome(&outcome).await? {
            warn!(
                sync_id = %outcome.sync_id,
                batch_number = outcome.batch_number,
                "batch already reported, duplicate outcome dropped"
            );
            return Ok(outcome);
        }

        info!(
            sync_id = %outcome.sync_id,
            batch_number = outcome.batch_number,
            processed = outcome.processed_count,
            failed = outcome.failed_count,
            "batch processed"
        );
        self.ctx.keep_alive(job.tenant_id, job.sync_id).await;
        announce(
            self.ctx.progress.as_ref(),
            ProgressEvent::new(
                job.tenant_id,
                ProgressPayload::BatchProcessed(outcome.clone()),
            ),
        )
        .await;
        Ok(outcome)
    }
}
