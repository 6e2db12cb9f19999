use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::lock::LockToken;
use crate::types::{ConsumerId, InitiatorId, RawRecord, SyncId, TenantId};

/// Unique identifier for queued jobs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies an ordered group of jobs that run strictly one after another.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ChainId(pub Uuid);

impl ChainId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ChainId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a job inside its chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChainLink {
    pub chain_id: ChainId,
    pub position: u32,
}

/// Scheduler-visible job states.
///
/// `Blocked` jobs wait for the previous chain link to complete; `Cancelled`
/// links belong to a chain that halted before reaching them.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum JobState {
    Ready,
    Blocked,
    Leased,
    Completed,
    DeadLetter,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::DeadLetter | JobState::Cancelled
        )
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    SyncStart,
    SyncBatch,
    SyncComplete,
    AggregateCompute,
}

impl JobKind {
    pub const SYNC_CHAIN: [JobKind; 3] =
        [JobKind::SyncStart, JobKind::SyncBatch, JobKind::SyncComplete];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::SyncStart => "sync_start",
            JobKind::SyncBatch => "sync_batch",
            JobKind::SyncComplete => "sync_complete",
            JobKind::AggregateCompute => "aggregate_compute",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured payload per job kind.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum JobPayload {
    SyncStart(SyncStartJob),
    SyncBatch(SyncBatchJob),
    SyncComplete(SyncCompleteJob),
    AggregateCompute(AggregateComputeJob),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::SyncStart(_) => JobKind::SyncStart,
            JobPayload::SyncBatch(_) => JobKind::SyncBatch,
            JobPayload::SyncComplete(_) => JobKind::SyncComplete,
            JobPayload::AggregateCompute(_) => JobKind::AggregateCompute,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        match self {
            JobPayload::SyncStart(job) => job.tenant_id,
            JobPayload::SyncBatch(job) => job.tenant_id,
            JobPayload::SyncComplete(job) => job.tenant_id,
            JobPayload::AggregateCompute(job) => job.tenant_id,
        }
    }

    pub fn sync_id(&self) -> Option<SyncId> {
        match self {
            JobPayload::SyncStart(job) => Some(job.sync_id),
            JobPayload::SyncBatch(job) => Some(job.sync_id),
            JobPayload::SyncComplete(job) => Some(job.sync_id),
            JobPayload::AggregateCompute(_) => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncStartJob {
    pub sync_id: SyncId,
    pub tenant_id: TenantId,
    pub initiator_id: InitiatorId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncBatchJob {
    pub sync_id: SyncId,
    pub tenant_id: TenantId,
    pub initiator_id: InitiatorId,
    /// 1-based.
    pub batch_number: u32,
    pub records: Vec<RawRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncCompleteJob {
    pub sync_id: SyncId,
    pub tenant_id: TenantId,
    pub initiator_id: InitiatorId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AggregateComputeJob {
    pub tenant_id: TenantId,
    pub consumer_id: ConsumerId,
    pub initiator_id: InitiatorId,
    /// Owner token of the aggregate lock acquired by the trigger; every
    /// attempt of this job releases with it.
    pub lock_token: LockToken,
}

/// Envelope stored for each job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub payload: JobPayload,
    pub state: JobState,
    pub attempts: u16,
    pub max_attempts: u16,
    pub timeout_ms: u64,
    pub available_at: DateTime<Utc>,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub chain: Option<ChainLink>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(request: EnqueueRequest, chain: Option<ChainLink>) -> Self {
        let now = Utc::now();
        let state = match chain {
            Some(link) if link.position > 0 => JobState::Blocked,
            _ => JobState::Ready,
        };
        Self {
            id: JobId::new(),
            payload: request.payload,
            state,
            attempts: 0,
            max_attempts: request.max_attempts.max(1),
            timeout_ms: request.timeout_ms,
            available_at: now,
            lease_owner: None,
            lease_expires_at: None,
            last_error: None,
            chain,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Lightweight summary returned to callers after enqueue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: JobId,
    pub kind: JobKind,
    pub chain: Option<ChainLink>,
}

impl JobHandle {
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            job_id: record.id,
            kind: record.kind(),
            chain: record.chain,
        }
    }
}

/// Enqueue request used by producers: the payload plus its execution
/// policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub payload: JobPayload,
    pub max_attempts: u16,
    pub timeout_ms: u64,
    pub requested_at: DateTime<Utc>,
}

impl EnqueueRequest {
    pub fn new(payload: JobPayload, max_attempts: u16, timeout: Duration) -> Self {
        Self {
            payload,
            max_attempts,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            requested_at: Utc::now(),
        }
    }
}
