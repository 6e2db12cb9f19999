use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SyncError};

use super::ids::{ConsumerId, InitiatorId, SyncId, TenantId};
use super::record::RawRecord;

/// Lifecycle of a [`SyncRun`].
///
/// `pending -> running -> completed | completed_with_errors`, the empty-run
/// shortcut `pending -> completed`, and `pending | running -> failed` when a
/// stalled run is reconciled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::CompletedWithErrors => "completed_with_errors",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Completed
                | SyncStatus::CompletedWithErrors
                | SyncStatus::Failed
        )
    }

    pub fn can_transition_to(&self, next: SyncStatus) -> bool {
        use SyncStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, CompletedWithErrors)
                | (Running, Failed)
        )
    }

    /// Final status for a run that reached its completion phase.
    pub fn from_failures(failed_count: u64) -> SyncStatus {
        if failed_count == 0 {
            SyncStatus::Completed
        } else {
            SyncStatus::CompletedWithErrors
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "running" => Ok(SyncStatus::Running),
            "completed" => Ok(SyncStatus::Completed),
            "completed_with_errors" => Ok(SyncStatus::CompletedWithErrors),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(SyncError::InvalidState(format!(
                "unknown sync status '{other}'"
            ))),
        }
    }
}

/// Durable record of one synchronization execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: SyncId,
    pub tenant_id: TenantId,
    pub consumer_id: Option<ConsumerId>,
    pub initiator_id: InitiatorId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    pub total_records: u64,
    pub total_batches: u32,
    pub status: SyncStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SyncRun {
    pub fn new(
        id: SyncId,
        tenant_id: TenantId,
        initiator_id: InitiatorId,
        total_records: u64,
        total_batches: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            tenant_id,
            consumer_id: None,
            initiator_id,
            scope_id: None,
            total_records,
            total_batches,
            status: SyncStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            last_activity_at: now,
            failure_reason: None,
        }
    }

    pub fn with_consumer(mut self, consumer_id: Option<ConsumerId>) -> Self {
        self.consumer_id = consumer_id;
        self
    }

    pub fn with_scope(mut self, scope_id: Option<String>) -> Self {
        self.scope_id = scope_id;
        self
    }

    /// Apply a status change, stamping the lifecycle timestamps.
    pub fn transition(
        &mut self,
        next: SyncStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(SyncError::InvalidState(format!(
                "sync {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        if self.status == SyncStatus::Pending
            && next == SyncStatus::Completed
            && self.total_records != 0
        {
            return Err(SyncError::InvalidState(format!(
                "sync {} has {} records and must run before completing",
                self.id, self.total_records
            )));
        }

        match next {
            SyncStatus::Running => self.started_at = Some(at),
            s if s.is_terminal() => {
                self.started_at.get_or_insert(at);
                self.completed_at = Some(at);
            }
            _ => {}
        }
        self.status = next;
        self.last_activity_at = at;
        Ok(())
    }
}

/// A record the syncer did not apply, with the reason.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailedRecord {
    pub record: RawRecord,
    pub error: String,
}

/// Per-chunk report produced once per batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub sync_id: SyncId,
    pub batch_number: u32,
    pub processed_count: u64,
    pub failed_count: u64,
    pub failed_records: Vec<FailedRecord>,
    /// Set when the whole batch was given up on after its retries ran out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl BatchOutcome {
    pub fn new(sync_id: SyncId, batch_number: u32) -> Self {
        Self {
            sync_id,
            batch_number,
            processed_count: 0,
            failed_count: 0,
            failed_records: Vec::new(),
            batch_error: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn record_success(&mut self) {
        self.processed_count += 1;
    }

    pub fn record_failure(&mut self, record: RawRecord, error: impl Into<String>) {
        self.failed_count += 1;
        self.failed_records.push(FailedRecord {
            record,
            error: error.into(),
        });
    }

    /// Outcome for a batch whose job exhausted its retries: every record
    /// counts as failed and carries the batch-level error.
    pub fn exhausted(
        sync_id: SyncId,
        batch_number: u32,
        records: Vec<RawRecord>,
        error: impl Into<String>,
    ) -> Self {
        let error = error.into();
        let mut outcome = Self::new(sync_id, batch_number);
        for record in records {
            outcome.record_failure(record, error.clone());
        }
        outcome.batch_error = Some(error);
        outcome
    }

    pub fn handled(&self) -> u64 {
        self.processed_count + self.failed_count
    }
}

/// Sum of all recorded outcomes for a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub processed_count: u64,
    pub failed_count: u64,
    pub batches_reported: u32,
}

impl RunTotals {
    pub fn from_outcomes<'a>(
        outcomes: impl IntoIterator<Item = &'a BatchOutcome>,
    ) -> Self {
        outcomes.into_iter().fold(Self::default(), |mut acc, o| {
            acc.processed_count += o.processed_count;
            acc.failed_count += o.failed_count;
            acc.batches_reported += 1;
            acc
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(total_records: u64) -> SyncRun {
        SyncRun::new(
            SyncId::new(),
            TenantId::new(),
            InitiatorId::system(),
            total_records,
            1,
        )
    }

    #[test]
    fn happy_path_transitions_stamp_timestamps() {
        let mut run = run(3);
        let t0 = Utc::now();
        run.transition(SyncStatus::Running, t0).unwrap();
        assert_eq!(run.started_at, Some(t0));

        let t1 = t0 + chrono::Duration::seconds(5);
        run.transition(SyncStatus::CompletedWithErrors, t1).unwrap();
        assert_eq!(run.completed_at, Some(t1));
        assert!(run.status.is_terminal());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut run = run(1);
        run.transition(SyncStatus::Running, Utc::now()).unwrap();
        run.transition(SyncStatus::Completed, Utc::now()).unwrap();
        let err = run.transition(SyncStatus::Running, Utc::now());
        assert!(matches!(err, Err(SyncError::InvalidState(_))));
    }

    #[test]
    fn only_empty_runs_complete_without_running() {
        let mut empty = run(0);
        empty.transition(SyncStatus::Completed, Utc::now()).unwrap();

        let mut populated = run(4);
        assert!(
            populated
                .transition(SyncStatus::Completed, Utc::now())
                .is_err()
        );
        assert_eq!(populated.status, SyncStatus::Pending);
    }

    #[test]
    fn status_round_trips_through_its_text_form() {
        for status in [
            SyncStatus::Pending,
            SyncStatus::Running,
            SyncStatus::Completed,
            SyncStatus::CompletedWithErrors,
            SyncStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
    }

    #[test]
    fn exhausted_outcome_fails_every_record() {
        let sync_id = SyncId::new();
        let records = vec![
            RawRecord::new(json!({"id": 1})),
            RawRecord::new(json!({"id": 2})),
        ];
        let outcome =
            BatchOutcome::exhausted(sync_id, 2, records, "connector down");
        assert_eq!(outcome.processed_count, 0);
        assert_eq!(outcome.failed_count, 2);
        assert_eq!(outcome.batch_error.as_deref(), Some("connector down"));
        assert!(
            outcome
                .failed_records
                .iter()
                .all(|f| f.error == "connector down")
        );
    }

    #[test]
    fn totals_sum_outcomes() {
        let sync_id = SyncId::new();
        let mut a = BatchOutcome::new(sync_id, 1);
        a.record_success();
        a.record_success();
        let mut b = BatchOutcome::new(sync_id, 2);
        b.record_success();
        b.record_failure(RawRecord::new(json!({"id": 9})), "rejected");

        let totals = RunTotals::from_outcomes([&a, &b]);
        assert_eq!(totals.processed_count, 3);
        assert_eq!(totals.failed_count, 1);
        assert_eq!(totals.batches_reported, 2);
    }
}
