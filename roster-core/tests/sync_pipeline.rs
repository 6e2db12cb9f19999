mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{
    CountingAggregate, Harness, ScriptedSyncer, UnreachablePublisher, fast_config, records,
};
use roster_core::bus::{CompletionKind, ProgressEvent, ProgressPayload, Severity, SyncCompleted};
use roster_core::error::SyncError;
use roster_core::pipeline::SyncRequest;
use roster_core::queue::{JobKind, QueueService};
use roster_core::store::SyncRunRepository;
use roster_core::types::{BatchOutcome, InitiatorId, SyncStatus, TenantId};

fn batches(events: &[ProgressEvent]) -> Vec<BatchOutcome> {
    events
        .iter()
        .filter_map(|e| match &e.payload {
            ProgressPayload::BatchProcessed(outcome) => Some(outcome.clone()),
            _ => None,
        })
        .collect()
}

fn completions(events: &[ProgressEvent]) -> Vec<SyncCompleted> {
    events
        .iter()
        .filter_map(|e| match &e.payload {
            ProgressPayload::SyncCompleted(done) => Some(done.clone()),
            _ => None,
        })
        .collect()
}

fn request(tenant: TenantId) -> SyncRequest {
    SyncRequest::new(tenant, InitiatorId::new("user-17"))
}

#[tokio::test]
async fn full_run_processes_every_record_in_batch_order() {
    let mut h = Harness::new(
        records(120),
        ScriptedSyncer::default(),
        CountingAggregate::succeeding(1),
    );
    let tenant = TenantId::new();

    let sync_id = h.engine.coordinator().execute(request(tenant)).await.unwrap();
    assert_eq!(h.drain().await, 5);

    let events = h.take_events();
    let names: Vec<&str> = events.iter().map(ProgressEvent::name).collect();
    assert_eq!(
        names,
        vec![
            "sync.started",
            "sync.batch_processed",
            "sync.batch_processed",
            "sync.batch_processed",
            "sync.completed",
        ]
    );
    assert!(events.iter().all(|e| e.tenant_id == tenant));

    let outcomes = batches(&events);
    let numbers: Vec<u32> = outcomes.iter().map(|o| o.batch_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    let sizes: Vec<u64> = outcomes.iter().map(BatchOutcome::handled).collect();
    assert_eq!(sizes, vec![50, 50, 20]);

    let done = &completions(&events)[0];
    assert_eq!(done.sync_id, sync_id);
    assert_eq!(done.total_records, 120);
    assert_eq!(done.processed_count, 120);
    assert_eq!(done.failed_count, 0);
    assert_eq!(done.status, SyncStatus::Completed);
    assert_eq!(done.kind, CompletionKind::Success);
    assert_eq!(done.severity, Severity::Success);

    let run = h.runs.get(sync_id).await.unwrap().unwrap();
    assert_eq!(run.status, SyncStatus::Completed);
    assert_eq!(run.total_batches, 3);
    assert!(run.started_at.is_some() && run.completed_at.is_some());
    assert_eq!(h.engine.context().run_lock.holder(tenant).await.unwrap(), None);
}

#[tokio::test]
async fn rejected_record_marks_run_completed_with_errors() {
    let mut h = Harness::new(
        records(120),
        ScriptedSyncer::rejecting(&["75"]),
        CountingAggregate::succeeding(1),
    );
    let tenant = TenantId::new();

    let sync_id = h.engine.coordinator().execute(request(tenant)).await.unwrap();
    h.drain().await;
    let events = h.take_events();

    let outcomes = batches(&events);
    assert_eq!(outcomes[0].failed_count, 0);
    assert_eq!(outcomes[1].failed_count, 1);
    assert_eq!(outcomes[1].processed_count, 49);
    assert_eq!(outcomes[1].failed_records.len(), 1);
    assert_eq!(
        outcomes[1].failed_records[0].record.external_id().as_deref(),
        Some("75")
    );
    assert_eq!(outcomes[2].failed_count, 0);

    let done = &completions(&events)[0];
    assert_eq!(done.status, SyncStatus::CompletedWithErrors);
    assert_eq!(done.kind, CompletionKind::Partial);
    assert_eq!(done.processed_count + done.failed_count, 120);
    assert_eq!(
        h.runs.get(sync_id).await.unwrap().unwrap().status,
        SyncStatus::CompletedWithErrors
    );
}

#[tokio::test]
async fn record_level_errors_never_abort_the_batch() {
    let mut syncer = ScriptedSyncer::default();
    syncer.record_errors.insert("2".into());
    let mut h = Harness::new(records(3), syncer, CountingAggregate::succeeding(1));

    h.engine
        .coordinator()
        .execute(request(TenantId::new()))
        .await
        .unwrap();
    h.drain().await;

    let outcome = &batches(&h.take_events())[0];
    assert_eq!(outcome.processed_count, 2);
    assert_eq!(outcome.failed_count, 1);
    assert_eq!(outcome.failed_records[0].error, "record 2 failed validation");
    assert!(outcome.batch_error.is_none());
}

#[tokio::test]
async fn empty_fetch_completes_immediately_without_jobs() {
    let mut h = Harness::new(
        Vec::new(),
        ScriptedSyncer::default(),
        CountingAggregate::succeeding(1),
    );
    let tenant = TenantId::new();

    let sync_id = h.engine.coordinator().execute(request(tenant)).await.unwrap();

    let events = h.take_events();
    assert_eq!(events.len(), 1);
    let done = &completions(&events)[0];
    assert_eq!(done.sync_id, sync_id);
    assert_eq!(done.total_records, 0);
    assert_eq!(done.processed_count, 0);
    assert_eq!(done.failed_count, 0);
    assert_eq!(done.status, SyncStatus::Completed);
    assert_eq!(done.kind, CompletionKind::NoChanges);

    let snapshot = h.queue.snapshot().await.unwrap();
    for kind in JobKind::SYNC_CHAIN {
        assert_eq!(snapshot.entry(kind).total(), 0);
    }
    assert_eq!(h.drain().await, 0);
    assert_eq!(h.engine.context().run_lock.holder(tenant).await.unwrap(), None);
}

#[tokio::test]
async fn second_run_for_a_tenant_conflicts_until_the_first_finishes() {
    let h = Harness::new(
        records(10),
        ScriptedSyncer::default(),
        CountingAggregate::succeeding(1),
    );
    let tenant = TenantId::new();

    let first = h.engine.coordinator().execute(request(tenant)).await.unwrap();
    assert!(matches!(
        h.engine.coordinator().execute(request(tenant)).await,
        Err(SyncError::Conflict(_))
    ));
    // Other tenants are unaffected.
    h.engine
        .coordinator()
        .execute(request(TenantId::new()))
        .await
        .unwrap();

    h.drain().await;
    assert_eq!(
        h.runs.get(first).await.unwrap().unwrap().status,
        SyncStatus::Completed
    );
    assert!(h.engine.coordinator().execute(request(tenant)).await.is_ok());
}

#[tokio::test]
async fn transient_batch_failure_is_retried_and_reported_once() {
    let mut h = Harness::new(
        records(60),
        ScriptedSyncer::failing_fatally_on(&["55"], Some(1)),
        CountingAggregate::succeeding(1),
    );

    let sync_id = h
        .engine
        .coordinator()
        .execute(request(TenantId::new()))
        .await
        .unwrap();
    // start, batch 1, batch 2 (twice), complete
    assert_eq!(h.drain().await, 5);

    let events = h.take_events();
    let numbers: Vec<u32> = batches(&events).iter().map(|o| o.batch_number).collect();
    assert_eq!(numbers, vec![1, 2]);
    let done = &completions(&events)[0];
    assert_eq!(done.processed_count, 60);
    assert_eq!(done.status, SyncStatus::Completed);
    assert_eq!(h.runs.outcomes(sync_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn scope_is_echoed_in_start_and_completion() {
    let mut h = Harness::new(
        records(2),
        ScriptedSyncer::default(),
        CountingAggregate::succeeding(1),
    );
    let req = request(TenantId::new()).with_scope(Some("department-9".into()));

    h.engine.coordinator().execute(req).await.unwrap();
    h.drain().await;

    let events = h.take_events();
    match &events[0].payload {
        ProgressPayload::SyncStarted(started) => {
            assert_eq!(started.scope_id.as_deref(), Some("department-9"));
            assert_eq!(started.total_batches, 1);
        }
        other => panic!("expected start event, got {}", other.name()),
    }
    assert_eq!(
        completions(&events)[0].scope_id.as_deref(),
        Some("department-9")
    );
}

#[tokio::test(start_paused = true)]
async fn run_lock_is_renewed_while_batches_progress() {
    let mut config = fast_config();
    config.run_lock_ttl_secs = 60;
    config.batch.batch_size = 5;
    let h = Harness::with_config(
        records(20),
        ScriptedSyncer::slow(Duration::from_secs(4)),
        CountingAggregate::succeeding(1),
        config,
    );
    let tenant = TenantId::new();

    let sync_id = h.engine.coordinator().execute(request(tenant)).await.unwrap();
    assert!(h.step().await, "start phase");
    // Four batches of 20s each: well past the 60s the lock was taken for.
    for _ in 0..4 {
        assert!(h.step().await);
    }
    assert_eq!(h.syncer.applied.load(Ordering::SeqCst), 20);
    assert_eq!(
        h.engine.context().run_lock.holder(tenant).await.unwrap(),
        Some(sync_id.to_string())
    );
    assert!(matches!(
        h.engine.coordinator().execute(request(tenant)).await,
        Err(SyncError::Conflict(_))
    ));

    assert!(h.step().await, "complete phase");
    assert!(!h.step().await);
    assert_eq!(
        h.runs.get(sync_id).await.unwrap().unwrap().status,
        SyncStatus::Completed
    );
    assert_eq!(h.engine.context().run_lock.holder(tenant).await.unwrap(), None);
    assert!(h.engine.coordinator().execute(request(tenant)).await.is_ok());
}

#[tokio::test]
async fn unreachable_progress_bus_never_fails_the_run() {
    let publisher = Arc::new(UnreachablePublisher::new());
    let h = Harness::with_publisher(records(120), ScriptedSyncer::default(), publisher.clone());
    let tenant = TenantId::new();

    let sync_id = h.engine.coordinator().execute(request(tenant)).await.unwrap();
    // start, three batches, complete; no retries
    assert_eq!(h.drain().await, 5);
    assert_eq!(h.drain().await, 0);

    let run = h.runs.get(sync_id).await.unwrap().unwrap();
    assert_eq!(run.status, SyncStatus::Completed);
    let outcomes = h.runs.outcomes(sync_id).await.unwrap();
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes.iter().map(|o| o.processed_count).sum::<u64>(), 120);
    assert_eq!(h.engine.context().run_lock.holder(tenant).await.unwrap(), None);
    // started, one per batch, completed
    assert!(publisher.attempts.load(Ordering::SeqCst) >= 5);
}
