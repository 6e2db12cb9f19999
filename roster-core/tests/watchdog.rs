mod common;

use chrono::{Duration, Utc};
use common::{CountingAggregate, Harness, ScriptedSyncer, records};
use roster_core::bus::{CompletionKind, ProgressPayload};
use roster_core::pipeline::SyncRequest;
use roster_core::store::SyncRunRepository;
use roster_core::types::{InitiatorId, SyncStatus, TenantId};

#[tokio::test]
async fn exhausted_batch_halts_the_chain_until_the_watchdog_fails_the_run() {
    let mut h = Harness::new(
        records(120),
        ScriptedSyncer::failing_fatally_on(&["75"], None),
        CountingAggregate::succeeding(1),
    );
    let tenant = TenantId::new();

    let sync_id = h
        .engine
        .coordinator()
        .execute(SyncRequest::new(tenant, InitiatorId::system()))
        .await
        .unwrap();
    // start, batch 1, three attempts of batch 2; batch 3 and complete never run
    assert_eq!(h.drain().await, 5);

    let outcomes = h.runs.outcomes(sync_id).await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[1].failed_count, 50);
    assert!(outcomes[1].batch_error.is_some());
    assert_eq!(
        h.runs.get(sync_id).await.unwrap().unwrap().status,
        SyncStatus::Running
    );
    assert!(h.engine.context().run_lock.holder(tenant).await.unwrap().is_some());

    // Fresh activity is not a stall.
    assert_eq!(h.engine.watchdog().sweep().await.unwrap(), 0);

    h.runs
        .set_last_activity(sync_id, Utc::now() - Duration::hours(1))
        .await
        .unwrap();
    h.take_events();
    assert_eq!(h.engine.watchdog().sweep().await.unwrap(), 1);

    let run = h.runs.get(sync_id).await.unwrap().unwrap();
    assert_eq!(run.status, SyncStatus::Failed);
    assert!(run.failure_reason.as_deref().unwrap().starts_with("stalled in running"));

    let events = h.take_events();
    assert_eq!(events.len(), 1);
    match &events[0].payload {
        ProgressPayload::SyncCompleted(done) => {
            assert_eq!(done.kind, CompletionKind::Error);
            assert_eq!(done.processed_count, 50);
            assert_eq!(done.failed_count, 50);
            assert_eq!(done.total_records, 120);
        }
        other => panic!("unexpected event {}", other.name()),
    }
    assert_eq!(h.engine.context().run_lock.holder(tenant).await.unwrap(), None);

    // Already terminal: a second sweep leaves it alone.
    h.runs
        .set_last_activity(sync_id, Utc::now() - Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(h.engine.watchdog().sweep().await.unwrap(), 0);
    assert_eq!(h.drain().await, 0);
}

#[tokio::test]
async fn completed_runs_are_never_reconciled() {
    let h = Harness::new(
        records(5),
        ScriptedSyncer::default(),
        CountingAggregate::succeeding(1),
    );
    let sync_id = h
        .engine
        .coordinator()
        .execute(SyncRequest::new(TenantId::new(), InitiatorId::system()))
        .await
        .unwrap();
    h.drain().await;
    h.runs
        .set_last_activity(sync_id, Utc::now() - Duration::days(1))
        .await
        .unwrap();

    assert_eq!(h.engine.watchdog().sweep().await.unwrap(), 0);
    assert_eq!(
        h.runs.get(sync_id).await.unwrap().unwrap().status,
        SyncStatus::Completed
    );
}

#[tokio::test]
async fn slow_batch_retries_keep_the_run_out_of_the_sweep() {
    let h = Harness::new(
        records(10),
        ScriptedSyncer::failing_fatally_on(&["1"], None),
        CountingAggregate::succeeding(1),
    );
    let sync_id = h
        .engine
        .coordinator()
        .execute(SyncRequest::new(TenantId::new(), InitiatorId::system()))
        .await
        .unwrap();
    assert!(h.step().await, "start phase");

    let quiet_since = Utc::now() - Duration::hours(1);
    h.runs.set_last_activity(sync_id, quiet_since).await.unwrap();
    // First attempt fails and is queued for retry; picking it up is activity.
    assert!(h.step().await);
    assert!(h.runs.outcomes(sync_id).await.unwrap().is_empty());

    let run = h.runs.get(sync_id).await.unwrap().unwrap();
    assert!(run.last_activity_at > quiet_since);
    assert_eq!(h.engine.watchdog().sweep().await.unwrap(), 0);
    assert_eq!(
        h.runs.get(sync_id).await.unwrap().unwrap().status,
        SyncStatus::Running
    );
}
