use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::PipelineContext;
use crate::bus::{ProgressEvent, ProgressPayload, SyncCompleted, announce};
use crate::error::{Result, SyncError};
use crate::ports::{ConsumerIdentityResolver, RecordFetcher};
use crate::queue::{
    EnqueueRequest, JobPayload, SyncBatchJob, SyncCompleteJob, SyncStartJob,
};
use crate::types::{
    ConsumerId, InitiatorId, RawRecord, SyncId, SyncRun, SyncStatus, TenantId,
};

/// What a caller asks for when triggering a run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncRequest {
    pub tenant_id: TenantId,
    pub initiator_id: InitiatorId,
    #[serde(default)]
    pub scope_id: Option<String>,
}

impl SyncRequest {
    pub fn new(tenant_id: TenantId, initiator_id: InitiatorId) -> Self {
        Self {
            tenant_id,
            initiator_id,
            scope_id: None,
        }
    }

    pub fn with_scope(mut self, scope_id: Option<String>) -> Self {
        self.scope_id = scope_id;
        self
    }
}

enum Dispatched {
    /// Nothing to sync; the run was finalized on the spot.
    Empty,
    Chained { total_batches: u32 },
}

/// Entry point of a run: fetches, partitions and hands the ordered chain
/// `[start, batch 1..n, complete]` to the queue.
#[derive(Clone)]
pub struct SyncCoordinator {
    ctx: PipelineContext,
    fetcher: Arc<dyn RecordFetcher>,
    identity: Arc<dyn ConsumerIdentityResolver>,
}

impl fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("batch_size", &self.ctx.config.batch.batch_size)
            .finish_non_exhaustive()
    }
}

impl SyncCoordinator {
    pub fn new(
        ctx: PipelineContext,
        fetcher: Arc<dyn RecordFetcher>,
        identity: Arc<dyn ConsumerIdentityResolver>,
    ) -> Self {
        Self {
            ctx,
            fetcher,
            identity,
        }
    }

    /// Returns as soon as the chain is queued. Fails with
    /// [`SyncError::Conflict`] while another run holds the tenant.
    pub async fn execute(&self, request: SyncRequest) -> Result<SyncId> {
        let sync_id = SyncId::new();
        let tenant_id = request.tenant_id;
        self.ctx.run_lock.acquire(tenant_id, sync_id).await?;

        match self.dispatch(sync_id, request).await {
            Ok(Dispatched::Chained { total_batches }) => {
                info!(
                    sync_id = %sync_id,
                    tenant_id = %tenant_id,
                    total_batches,
                    "sync run queued"
                );
                Ok(sync_id)
            }
            Ok(Dispatched::Empty) => {
                self.release_run_lock(tenant_id, sync_id).await;
                Ok(sync_id)
            }
            Err(err) => {
                self.release_run_lock(tenant_id, sync_id).await;
                Err(err)
            }
        }
    }

    async fn dispatch(
        &self,
        sync_id: SyncId,
        request: SyncRequest,
    ) -> Result<Dispatched> {
        let tenant_id = request.tenant_id;
        let records =
            self.fetcher.fetch_all_records(tenant_id).await.map_err(|err| {
                SyncError::Collaborator(format!(
                    "record fetch failed for tenant {tenant_id}: {err}"
                ))
            })?;
        let consumer_id = self.resolve_consumer(tenant_id).await;

        if records.is_empty() {
            self.finish_empty(sync_id, request, consumer_id).await?;
            return Ok(Dispatched::Empty);
        }

        let total_records = records.len() as u64;
        let batches = partition(records, self.ctx.config.batch.batch_size);
        let total_batches = u32::try_from(batches.len()).map_err(|_| {
            SyncError::InvalidState(format!(
                "{} batches exceed the per-run limit",
                batches.len()
            ))
        })?;

        let run = SyncRun::new(
            sync_id,
            tenant_id,
            request.initiator_id.clone(),
            total_records,
            total_batches,
        )
        .with_consumer(consumer_id)
        .with_scope(request.scope_id);
        self.ctx.runs.create(&run).await?;

        let chain = self.build_chain(&run, batches);
        if let Err(err) = self.ctx.queue.enqueue_chain(chain).await {
            error!(sync_id = %sync_id, error = %err, "failed to queue sync chain");
            if let Err(mark_err) = self
                .ctx
                .runs
                .mark_failed(sync_id, &format!("dispatch failed: {err}"), Utc::now())
                .await
            {
                warn!(sync_id = %sync_id, error = %mark_err, "could not mark run failed");
            }
            return Err(err);
        }

        Ok(Dispatched::Chained { total_batches })
    }

    fn build_chain(
        &self,
        run: &SyncRun,
        batches: Vec<Vec<RawRecord>>,
    ) -> Vec<EnqueueRequest> {
        let batch_cfg = &self.ctx.config.batch;
        let attempts = self.ctx.config.retry.max_attempts;
        let mut chain = Vec::with_capacity(batches.len() + 2);

        chain.push(EnqueueRequest::new(
            JobPayload::SyncStart(SyncStartJob {
                sync_id: run.id,
                tenant_id: run.tenant_id,
                initiator_id: run.initiator_id.clone(),
            }),
            attempts,
            batch_cfg.phase_timeout(),
        ));
        for (index, records) in batches.into_iter().enumerate() {
            let timeout = batch_cfg.batch_timeout(records.len());
            chain.push(EnqueueRequest::new(
                JobPayload::SyncBatch(SyncBatchJob {
                    sync_id: run.id,
                    tenant_id: run.tenant_id,
                    initiator_id: run.initiator_id.clone(),
                    batch_number: index as u32 + 1,
                    records,
                }),
                attempts,
                timeout,
            ));
        }
        chain.push(EnqueueRequest::new(
            JobPayload::SyncComplete(SyncCompleteJob {
                sync_id: run.id,
                tenant_id: run.tenant_id,
                initiator_id: run.initiator_id.clone(),
            }),
            attempts,
            batch_cfg.phase_timeout(),
        ));
        chain
    }

    async fn finish_empty(
        &self,
        sync_id: SyncId,
        request: SyncRequest,
        consumer_id: Option<ConsumerId>,
    ) -> Result<()> {
        let run = SyncRun::new(sync_id, request.tenant_id, request.initiator_id, 0, 0)
            .with_consumer(consumer_id)
            .with_scope(request.scope_id);
        self.ctx.runs.create(&run).await?;
        let run = self
            .ctx
            .runs
            .transition(sync_id, SyncStatus::Completed, Utc::now())
            .await?;

        info!(
            sync_id = %sync_id,
            tenant_id = %run.tenant_id,
            "no records to sync, run completed immediately"
        );
        announce(
            self.ctx.progress.as_ref(),
            ProgressEvent::new(
                run.tenant_id,
                ProgressPayload::SyncCompleted(SyncCompleted::from_run(&run, 0, 0)),
            ),
        )
        .await;
        Ok(())
    }

    async fn resolve_consumer(&self, tenant_id: TenantId) -> Option<ConsumerId> {
        match self.identity.resolve_consumer_id(tenant_id).await {
            Ok(consumer_id) => Some(consumer_id),
            Err(err) => {
                warn!(
                    tenant_id = %tenant_id,
                    error = %err,
                    "consumer identity unavailable at dispatch"
                );
                None
            }
        }
    }

    async fn release_run_lock(&self, tenant_id: TenantId, sync_id: SyncId) {
        if let Err(err) = self.ctx.run_lock.release(tenant_id, sync_id).await {
            warn!(
                tenant_id = %tenant_id,
                sync_id = %sync_id,
                error = %err,
                "run lock release failed; TTL will reclaim it"
            );
        }
    }
}

/// Splits records into chunks of `batch_size`, keeping source order.
pub fn partition(records: Vec<RawRecord>, batch_size: usize) -> Vec<Vec<RawRecord>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(records.len().div_ceil(batch_size));
    let mut remaining = records.into_iter().peekable();
    while remaining.peek().is_some() {
        batches.push(remaining.by_ref().take(batch_size).collect());
    }
    batches
}
