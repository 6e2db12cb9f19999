use std::fmt;

use async_trait::async_trait;
use tracing::{Instrument, debug_span, warn};

use crate::aggregate::LockedAggregateJob;
use crate::error::{Result, SyncError};
use crate::pipeline::{BatchWorker, PhaseRunner};
use crate::queue::{JobLease, JobPayload, JobRecord};

/// Outcome of dispatcher execution for a single job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DispatchStatus {
    Success,
    Retry { error: String },
    DeadLetter { error: String },
}

impl DispatchStatus {
    pub fn needs_retry(&self) -> bool {
        matches!(self, DispatchStatus::Retry { .. })
    }

    /// Missing or contradictory state will not heal on retry; everything
    /// else (cache, database, collaborators, timeouts) might.
    pub fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => DispatchStatus::Success,
            Err(
                err @ (SyncError::NotFound(_)
                | SyncError::InvalidState(_)
                | SyncError::Serialization(_)),
            ) => DispatchStatus::DeadLetter {
                error: err.to_string(),
            },
            Err(err) => DispatchStatus::Retry {
                error: err.to_string(),
            },
        }
    }
}

/// Primary contract exposed to worker loops for executing leased jobs.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, lease: &JobLease) -> DispatchStatus;

    /// Runs once a job has been given up on, either because its attempts
    /// ran out or because it was dead-lettered outright.
    async fn on_exhausted(&self, job: &JobRecord, error: &str) -> Result<()>;
}

/// Routes each job kind to its handler.
pub struct RosterDispatcher {
    phases: PhaseRunner,
    batches: BatchWorker,
    aggregates: LockedAggregateJob,
}

impl fmt::Debug for RosterDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RosterDispatcher")
            .field("phases", &"PhaseRunner")
            .field("batches", &"BatchWorker")
            .field("aggregates", &"LockedAggregateJob")
            .finish()
    }
}

impl RosterDispatcher {
    pub fn new(
        phases: PhaseRunner,
        batches: BatchWorker,
        aggregates: LockedAggregateJob,
    ) -> Self {
        Self {
            phases,
            batches,
            aggregates,
        }
    }
}

#[async_trait]
impl JobDispatcher for RosterDispatcher {
    async fn dispatch(&self, lease: &JobLease) -> DispatchStatus {
        let job = &lease.job;
        let span = debug_span!(
            "dispatch",
            job_id = %job.id,
            kind = %job.kind(),
            attempt = job.attempts,
            tenant_id = %job.payload.tenant_id()
        );
        let result = async {
            match &job.payload {
                JobPayload::SyncStart(payload) => self.phases.start(payload).await,
                JobPayload::SyncBatch(payload) => {
                    self.batches.handle(payload).await.map(|_| ())
                }
                JobPayload::SyncComplete(payload) => {
                    self.phases.complete(payload).await
                }
                JobPayload::AggregateCompute(payload) => {
                    self.aggregates.handle(payload).await.map(|_| ())
                }
            }
        }
        .instrument(span)
        .await;

        let status = DispatchStatus::from_result(result);
        if let DispatchStatus::DeadLetter { error } = &status {
            warn!(job_id = %job.id, kind = %job.kind(), error = %error, "job cannot succeed");
        }
        status
    }

    async fn on_exhausted(&self, job: &JobRecord, error: &str) -> Result<()> {
        match &job.payload {
            JobPayload::SyncStart(payload) => {
                self.phases
                    .abort(
                        payload.sync_id,
                        &format!("start phase failed: {error}"),
                    )
                    .await
                    .map(|_| ())
            }
            JobPayload::SyncBatch(payload) => {
                self.batches.record_exhausted(payload, error).await
            }
            JobPayload::SyncComplete(payload) => {
                self.phases
                    .abort(
                        payload.sync_id,
                        &format!("complete phase failed: {error}"),
                    )
                    .await
                    .map(|_| ())
            }
            JobPayload::AggregateCompute(payload) => {
                self.aggregates.fail(payload, error).await
            }
        }
    }
}
