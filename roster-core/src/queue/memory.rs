use std::collections::{HashMap, HashSet};
use std::fmt;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::backoff::RetryPolicy;
use super::job::{
    ChainId, ChainLink, EnqueueRequest, JobHandle, JobId, JobRecord, JobState,
};
use super::lease::{DequeueRequest, FailOutcome, JobLease, LeaseId};
use super::{LeaseExpiryScanner, QueueService, QueueSnapshot};
use crate::config::RetryConfig;
use crate::error::{Result, SyncError};
use crate::types::SyncId;

#[derive(Default)]
struct QueueState {
    jobs: HashMap<JobId, JobRecord>,
    /// Insertion order; dequeue is FIFO among eligible jobs.
    order: Vec<JobId>,
    leases: HashMap<LeaseId, JobId>,
    chains: HashMap<ChainId, Vec<JobId>>,
}

impl QueueState {
    fn insert(&mut self, record: JobRecord) -> JobHandle {
        let handle = JobHandle::from_record(&record);
        if let Some(link) = record.chain {
            self.chains.entry(link.chain_id).or_default().push(record.id);
        }
        self.order.push(record.id);
        self.jobs.insert(record.id, record);
        handle
    }

    fn leased_job(&mut self, lease_id: LeaseId) -> Result<&mut JobRecord> {
        let job_id = self.leases.remove(&lease_id).ok_or_else(|| {
            SyncError::NotFound(format!("lease {lease_id} is not active"))
        })?;
        let job = self.jobs.get_mut(&job_id).ok_or_else(|| {
            SyncError::NotFound(format!("job {job_id} not found"))
        })?;
        if job.state != JobState::Leased {
            return Err(SyncError::InvalidState(format!(
                "job {job_id} is {:?}, not leased",
                job.state
            )));
        }
        Ok(job)
    }

    /// Cancels the not-yet-started links of a chain, optionally only those
    /// after `after_position`.
    fn cancel_links(
        &mut self,
        chain_id: ChainId,
        after_position: Option<u32>,
    ) -> u64 {
        let Some(members) = self.chains.get(&chain_id) else {
            return 0;
        };
        let mut cancelled = 0;
        let now = Utc::now();
        for id in members {
            let Some(job) = self.jobs.get_mut(id) else {
                continue;
            };
            let in_scope = match (job.chain, after_position) {
                (Some(link), Some(after)) => link.position > after,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if in_scope
                && matches!(job.state, JobState::Ready | JobState::Blocked)
            {
                job.state = JobState::Cancelled;
                job.updated_at = now;
                cancelled += 1;
            }
        }
        cancelled
    }

    fn unblock_next(&mut self, link: ChainLink) -> Option<JobId> {
        let members = self.chains.get(&link.chain_id)?;
        let now = Utc::now();
        for id in members {
            if let Some(job) = self.jobs.get_mut(id)
                && job.chain.is_some_and(|l| l.position == link.position + 1)
                && job.state == JobState::Blocked
            {
                job.state = JobState::Ready;
                job.available_at = now;
                job.updated_at = now;
                return Some(job.id);
            }
        }
        None
    }

    fn dead_letter(&mut self, job_id: JobId, error: String) -> u64 {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return 0;
        };
        job.state = JobState::DeadLetter;
        job.last_error = Some(error);
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.updated_at = Utc::now();
        let chain = job.chain;
        match chain {
            Some(link) => self.cancel_links(link.chain_id, Some(link.position)),
            None => 0,
        }
    }

    fn prune_finished(&mut self, retention: chrono::Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let before = self.jobs.len();
        self.jobs.retain(|_, job| {
            !(job.state.is_terminal() && job.updated_at < cutoff)
        });
        let jobs = &self.jobs;
        self.order.retain(|id| jobs.contains_key(id));
        self.chains.retain(|_, members| {
            members.retain(|id| jobs.contains_key(id));
            !members.is_empty()
        });
        before - self.jobs.len()
    }
}

/// Process-local queue. Jobs do not survive a restart; runs left behind are
/// reconciled by the stall watchdog.
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    retry: RetryPolicy,
    finished_retention: chrono::Duration,
}

impl fmt::Debug for InMemoryJobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let jobs = self
            .state
            .try_lock()
            .map(|state| state.jobs.len())
            .unwrap_or_default();
        f.debug_struct("InMemoryJobQueue")
            .field("jobs", &jobs)
            .field("retry", &self.retry)
            .field("finished_retention", &self.finished_retention)
            .finish()
    }
}

impl InMemoryJobQueue {
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            retry: RetryPolicy::new(retry),
            finished_retention: chrono::Duration::hours(1),
        }
    }

    pub fn with_finished_retention(mut self, retention: chrono::Duration) -> Self {
        self.finished_retention = retention;
        self
    }

    /// Jobs in insertion order. Test helper.
    pub async fn jobs(&self) -> Vec<JobRecord> {
        let state = self.state.lock().await;
        state
            .order
            .iter()
            .filter_map(|id| state.jobs.get(id).cloned())
            .collect()
    }
}

#[async_trait]
impl QueueService for InMemoryJobQueue {
    async fn enqueue(&self, request: EnqueueRequest) -> Result<JobHandle> {
        let record = JobRecord::new(request, None);
        debug!(job_id = %record.id, kind = %record.kind(), "job enqueued");
        Ok(self.state.lock().await.insert(record))
    }

    async fn enqueue_chain(
        &self,
        requests: Vec<EnqueueRequest>,
    ) -> Result<Vec<JobHandle>> {
        let chain_id = ChainId::new();
        let mut state = self.state.lock().await;
        let handles: Vec<JobHandle> = requests
            .into_iter()
            .enumerate()
            .map(|(position, request)| {
                let link = ChainLink {
                    chain_id,
                    position: position as u32,
                };
                state.insert(JobRecord::new(request, Some(link)))
            })
            .collect();
        debug!(chain_id = %chain_id, links = handles.len(), "chain enqueued");
        Ok(handles)
    }

    async fn dequeue(
        &self,
        request: DequeueRequest,
    ) -> Result<Option<JobLease>> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let candidate = state.order.iter().copied().find(|id| {
            state.jobs.get(id).is_some_and(|job| {
                job.state == JobState::Ready
                    && job.available_at <= now
                    && request.kinds.contains(&job.kind())
            })
        });
        let Some(job_id) = candidate else {
            return Ok(None);
        };

        let job = state.jobs.get_mut(&job_id).ok_or_else(|| {
            SyncError::Internal(format!("job {job_id} vanished during dequeue"))
        })?;
        let ttl = chrono::Duration::from_std(job.timeout())
            .unwrap_or(chrono::Duration::days(1))
            + request.lease_grace;
        job.state = JobState::Leased;
        job.attempts += 1;
        job.lease_owner = Some(request.worker_id.clone());
        job.lease_expires_at = Some(now + ttl);
        job.updated_at = now;

        let lease = JobLease::new(job.clone(), request.worker_id, ttl);
        state.leases.insert(lease.lease_id, job_id);
        Ok(Some(lease))
    }

    async fn complete(&self, lease_id: LeaseId) -> Result<()> {
        let mut state = self.state.lock().await;
        let job = state.leased_job(lease_id)?;
        job.state = JobState::Completed;
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.updated_at = Utc::now();
        let (job_id, chain) = (job.id, job.chain);

        if let Some(link) = chain
            && let Some(next) = state.unblock_next(link)
        {
            debug!(job_id = %job_id, next = %next, "chain advanced");
        }
        Ok(())
    }

    async fn fail(
        &self,
        lease_id: LeaseId,
        error: String,
    ) -> Result<FailOutcome> {
        let mut state = self.state.lock().await;
        let job = state.leased_job(lease_id)?;

        if job.attempts_exhausted() {
            let (job_id, attempts) = (job.id, job.attempts);
            let cancelled = state.dead_letter(job_id, error);
            warn!(
                job_id = %job_id,
                attempts,
                cancelled_links = cancelled,
                "job exhausted its attempts"
            );
            return Ok(FailOutcome::Exhausted { attempts });
        }

        let delay = self.retry.delay(job.id, job.attempts);
        let now = Utc::now();
        job.state = JobState::Ready;
        job.available_at =
            now + chrono::Duration::from_std(delay).unwrap_or_default();
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.last_error = Some(error);
        job.updated_at = now;
        debug!(
            job_id = %job.id,
            attempt = job.attempts,
            delay_ms = delay.as_millis() as u64,
            "job scheduled for retry"
        );
        Ok(FailOutcome::Retrying {
            attempt: job.attempts,
            delay,
        })
    }

    async fn dead_letter(&self, lease_id: LeaseId, error: String) -> Result<()> {
        let mut state = self.state.lock().await;
        let job_id = state.leased_job(lease_id)?.id;
        let cancelled = state.dead_letter(job_id, error);
        warn!(job_id = %job_id, cancelled_links = cancelled, "job dead-lettered");
        Ok(())
    }

    async fn cancel_sync(&self, sync_id: SyncId) -> Result<u64> {
        let mut state = self.state.lock().await;
        let chains: HashSet<ChainId> = state
            .jobs
            .values()
            .filter(|job| job.payload.sync_id() == Some(sync_id))
            .filter_map(|job| job.chain.map(|l| l.chain_id))
            .collect();
        Ok(chains
            .into_iter()
            .map(|chain_id| state.cancel_links(chain_id, None))
            .sum())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>> {
        Ok(self.state.lock().await.jobs.get(&job_id).cloned())
    }

    async fn snapshot(&self) -> Result<QueueSnapshot> {
        let state = self.state.lock().await;
        let mut snapshot = QueueSnapshot::new(Utc::now());
        for job in state.jobs.values() {
            let entry = snapshot.entry_mut(job.kind());
            match job.state {
                JobState::Ready => entry.ready += 1,
                JobState::Blocked => entry.blocked += 1,
                JobState::Leased => entry.leased += 1,
                JobState::Completed => entry.completed += 1,
                JobState::DeadLetter => entry.dead_letter += 1,
                JobState::Cancelled => entry.cancelled += 1,
            }
        }
        Ok(snapshot)
    }
}

#[async_trait]
impl LeaseExpiryScanner for InMemoryJobQueue {
    async fn scan_expired_leases(&self) -> Result<u64> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let expired: Vec<JobId> = state
            .jobs
            .values()
            .filter(|job| {
                job.state == JobState::Leased
                    && job.lease_expires_at.is_some_and(|at| at <= now)
            })
            .map(|job| job.id)
            .collect();

        let mut resurrected = 0;
        for job_id in expired {
            state.leases.retain(|_, id| *id != job_id);
            let exhausted = state
                .jobs
                .get(&job_id)
                .is_some_and(|job| job.attempts_exhausted());
            if exhausted {
                state.dead_letter(job_id, "lease expired".to_string());
                warn!(job_id = %job_id, "expired lease on final attempt");
                continue;
            }
            if let Some(job) = state.jobs.get_mut(&job_id) {
                job.state = JobState::Ready;
                job.available_at = now;
                job.lease_owner = None;
                job.lease_expires_at = None;
                job.updated_at = now;
                resurrected += 1;
            }
        }

        let pruned = state.prune_finished(self.finished_retention);
        if resurrected > 0 || pruned > 0 {
            info!(resurrected, pruned, "queue housekeeping");
        }
        Ok(resurrected)
    }
}
