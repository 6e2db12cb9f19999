//! Lease-based job queue with ordered chains.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod backoff;
pub mod job;
pub mod lease;
pub mod memory;

pub use backoff::RetryPolicy;
pub use job::{
    AggregateComputeJob, ChainId, ChainLink, EnqueueRequest, JobHandle, JobId,
    JobKind, JobPayload, JobRecord, JobState, SyncBatchJob, SyncCompleteJob,
    SyncStartJob,
};
pub use lease::{DequeueRequest, FailOutcome, JobLease, LeaseId};
pub use memory::InMemoryJobQueue;

/// Abstracts the queue backend consumed by the worker runtime and the
/// producers (sync coordinator, aggregate trigger).
#[async_trait]
pub trait QueueService: Send + Sync {
    async fn enqueue(&self, request: EnqueueRequest) -> Result<JobHandle>;

    /// Enqueues an ordered chain: the first job is ready, every later job
    /// stays blocked until its predecessor completes.
    async fn enqueue_chain(
        &self,
        requests: Vec<EnqueueRequest>,
    ) -> Result<Vec<JobHandle>>;

    async fn dequeue(&self, request: DequeueRequest)
    -> Result<Option<JobLease>>;

    /// Marks the leased job done and unblocks the next link of its chain.
    async fn complete(&self, lease_id: LeaseId) -> Result<()>;

    /// Records a failed attempt; retries with backoff while attempts remain.
    async fn fail(&self, lease_id: LeaseId, error: String)
    -> Result<FailOutcome>;

    /// Gives up on the job immediately, halting its chain.
    async fn dead_letter(&self, lease_id: LeaseId, error: String) -> Result<()>;

    /// Cancels the not-yet-running jobs that belong to a sync run.
    async fn cancel_sync(&self, sync_id: crate::types::SyncId) -> Result<u64>;

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>>;

    async fn snapshot(&self) -> Result<QueueSnapshot>;
}

/// Capability to resurrect jobs whose worker vanished mid-lease.
#[async_trait]
pub trait LeaseExpiryScanner: Send + Sync {
    /// Returns number of jobs transitioned back to ready.
    async fn scan_expired_leases(&self) -> Result<u64>;
}

/// Job counts per kind and state at a specific instant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub sampled_at: DateTime<Utc>,
    pub queues: HashMap<JobKind, QueueSnapshotEntry>,
}

impl QueueSnapshot {
    pub fn new(sampled_at: DateTime<Utc>) -> Self {
        Self {
            sampled_at,
            queues: HashMap::new(),
        }
    }

    pub fn entry_mut(&mut self, kind: JobKind) -> &mut QueueSnapshotEntry {
        self.queues.entry(kind).or_default()
    }

    pub fn entry(&self, kind: JobKind) -> QueueSnapshotEntry {
        self.queues.get(&kind).cloned().unwrap_or_default()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshotEntry {
    pub ready: usize,
    pub blocked: usize,
    pub leased: usize,
    pub completed: usize,
    pub dead_letter: usize,
    pub cancelled: usize,
}

impl QueueSnapshotEntry {
    pub fn total(&self) -> usize {
        self.ready
            + self.blocked
            + self.leased
            + self.completed
            + self.dead_letter
            + self.cancelled
    }
}
