use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{
    AggregateFailure, AggregateResult, BatchOutcome, InitiatorId, SyncId,
    SyncRun, SyncStatus, TenantId,
};

/// Envelope for everything published on the progress bus.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub version: u16,
    pub event_id: Uuid,
    pub tenant_id: TenantId,
    pub emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: ProgressPayload,
}

impl ProgressEvent {
    pub fn new(tenant_id: TenantId, payload: ProgressPayload) -> Self {
        Self {
            version: 1,
            event_id: Uuid::now_v7(),
            tenant_id,
            emitted_at: Utc::now(),
            payload,
        }
    }

    pub fn name(&self) -> &'static str {
        self.payload.name()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ProgressPayload {
    #[serde(rename = "sync.started")]
    SyncStarted(SyncStarted),
    #[serde(rename = "sync.batch_processed")]
    BatchProcessed(BatchOutcome),
    #[serde(rename = "sync.completed")]
    SyncCompleted(SyncCompleted),
    #[serde(rename = "aggregate.computed")]
    AggregateComputed(AggregateResult),
    #[serde(rename = "aggregate.failed")]
    AggregateComputationFailed(AggregateFailure),
}

impl ProgressPayload {
    pub fn name(&self) -> &'static str {
        match self {
            ProgressPayload::SyncStarted(_) => "sync.started",
            ProgressPayload::BatchProcessed(_) => "sync.batch_processed",
            ProgressPayload::SyncCompleted(_) => "sync.completed",
            ProgressPayload::AggregateComputed(_) => "aggregate.computed",
            ProgressPayload::AggregateComputationFailed(_) => {
                "aggregate.failed"
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncStarted {
    pub sync_id: SyncId,
    pub tenant_id: TenantId,
    pub initiator_id: InitiatorId,
    pub total_records: u64,
    pub total_batches: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl SyncStarted {
    pub fn from_run(run: &SyncRun, started_at: DateTime<Utc>) -> Self {
        Self {
            sync_id: run.id,
            tenant_id: run.tenant_id,
            initiator_id: run.initiator_id.clone(),
            total_records: run.total_records,
            total_batches: run.total_batches,
            scope_id: run.scope_id.clone(),
            started_at,
        }
    }
}

/// Notification class of a finished run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionKind {
    #[serde(rename = "sync.no_changes")]
    NoChanges,
    #[serde(rename = "sync.success")]
    Success,
    #[serde(rename = "sync.partial")]
    Partial,
    #[serde(rename = "sync.error")]
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl CompletionKind {
    pub fn classify(
        status: SyncStatus,
        total_records: u64,
        failed_count: u64,
    ) -> Self {
        if status == SyncStatus::Failed {
            CompletionKind::Error
        } else if total_records == 0 {
            CompletionKind::NoChanges
        } else if failed_count == 0 {
            CompletionKind::Success
        } else {
            CompletionKind::Partial
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            CompletionKind::NoChanges => Severity::Info,
            CompletionKind::Success => Severity::Success,
            CompletionKind::Partial => Severity::Warning,
            CompletionKind::Error => Severity::Error,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncCompleted {
    pub sync_id: SyncId,
    pub tenant_id: TenantId,
    pub initiator_id: InitiatorId,
    pub total_records: u64,
    pub processed_count: u64,
    pub failed_count: u64,
    pub status: SyncStatus,
    pub kind: CompletionKind,
    pub severity: Severity,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SyncCompleted {
    /// Builds the completion notice for a run already in a terminal state.
    pub fn from_run(
        run: &SyncRun,
        processed_count: u64,
        failed_count: u64,
    ) -> Self {
        let completed_at = run.completed_at.unwrap_or_else(Utc::now);
        let duration_seconds = run
            .started_at
            .map(|started| (completed_at - started).num_seconds().max(0))
            .unwrap_or(0);
        let kind =
            CompletionKind::classify(run.status, run.total_records, failed_count);
        Self {
            sync_id: run.id,
            tenant_id: run.tenant_id,
            initiator_id: run.initiator_id.clone(),
            total_records: run.total_records,
            processed_count,
            failed_count,
            status: run.status,
            kind,
            severity: kind.severity(),
            started_at: run.started_at,
            completed_at,
            duration_seconds,
            scope_id: run.scope_id.clone(),
            failure_reason: run.failure_reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_covers_every_outcome() {
        use CompletionKind::*;
        assert_eq!(
            CompletionKind::classify(SyncStatus::Completed, 0, 0),
            NoChanges
        );
        assert_eq!(
            CompletionKind::classify(SyncStatus::Completed, 10, 0),
            Success
        );
        assert_eq!(
            CompletionKind::classify(SyncStatus::CompletedWithErrors, 10, 2),
            Partial
        );
        assert_eq!(CompletionKind::classify(SyncStatus::Failed, 10, 0), Error);

        assert_eq!(NoChanges.severity(), Severity::Info);
        assert_eq!(Success.severity(), Severity::Success);
        assert_eq!(Partial.severity(), Severity::Warning);
        assert_eq!(Error.severity(), Severity::Error);
    }

    #[test]
    fn envelope_serializes_name_and_data_side_by_side() {
        let mut run = SyncRun::new(
            SyncId::new(),
            TenantId::new(),
            InitiatorId::system(),
            0,
            0,
        );
        run.transition(SyncStatus::Completed, Utc::now()).unwrap();
        let event = ProgressEvent::new(
            run.tenant_id,
            ProgressPayload::SyncCompleted(SyncCompleted::from_run(&run, 0, 0)),
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "sync.completed");
        assert_eq!(json["data"]["kind"], "sync.no_changes");
        assert_eq!(json["data"]["severity"], "info");
        assert_eq!(json["data"]["status"], "completed");
        assert_eq!(json["data"]["processed_count"], 0);
        assert_eq!(json["version"], 1);
        assert_eq!(event.name(), "sync.completed");
    }
}
