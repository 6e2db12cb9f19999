use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::job::{JobKind, JobRecord};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub Uuid);

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaseId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lease metadata returned when a worker dequeues a job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobLease {
    pub lease_id: LeaseId,
    pub job: JobRecord,
    pub lease_owner: String,
    pub expires_at: DateTime<Utc>,
}

impl JobLease {
    pub fn new(job: JobRecord, owner: String, ttl: chrono::Duration) -> Self {
        Self {
            lease_id: LeaseId::new(),
            expires_at: Utc::now() + ttl,
            lease_owner: owner,
            job,
        }
    }
}

/// Request object to dequeue work from a set of job kinds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DequeueRequest {
    pub kinds: Vec<JobKind>,
    pub worker_id: String,
    /// Lease length on top of the job's own timeout.
    pub lease_grace: chrono::Duration,
}

/// What the queue did with a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailOutcome {
    /// The job went back to `Ready` and becomes available after `delay`.
    Retrying {
        attempt: u16,
        delay: std::time::Duration,
    },
    /// No attempts left; the job is dead-lettered and its chain halted.
    Exhausted { attempts: u16 },
}
