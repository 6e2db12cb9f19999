#![cfg(feature = "postgres")]

use chrono::{Duration, Utc};
use roster_core::error::SyncError;
use roster_core::store::{PostgresSyncRunRepository, SyncRunRepository};
use roster_core::types::{
    BatchOutcome, ConsumerId, InitiatorId, RawRecord, SyncId, SyncRun, SyncStatus,
    TenantId,
};
use serde_json::json;
use sqlx::PgPool;

async fn repo(pool: PgPool) -> PostgresSyncRunRepository {
    PostgresSyncRunRepository::new(pool).await.unwrap()
}

fn run(total_records: u64, total_batches: u32) -> SyncRun {
    SyncRun::new(
        SyncId::new(),
        TenantId::new(),
        InitiatorId::new("user-1"),
        total_records,
        total_batches,
    )
    .with_consumer(Some(ConsumerId::new("payroll")))
    .with_scope(Some("department-3".into()))
}

#[sqlx::test(migrator = "roster_core::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn run_lifecycle_round_trips_through_postgres(pool: PgPool) {
    let repo = repo(pool).await;
    let run = run(3, 2);
    repo.create(&run).await.unwrap();
    assert!(matches!(repo.create(&run).await, Err(SyncError::Conflict(_))));

    let stored = repo.get(run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SyncStatus::Pending);
    assert_eq!(stored.consumer_id, Some(ConsumerId::new("payroll")));
    assert_eq!(stored.scope_id.as_deref(), Some("department-3"));

    let running = repo
        .transition(run.id, SyncStatus::Running, Utc::now())
        .await
        .unwrap();
    assert!(running.started_at.is_some());
    assert!(matches!(
        repo.transition(run.id, SyncStatus::Pending, Utc::now()).await,
        Err(SyncError::InvalidState(_))
    ));

    let mut second = BatchOutcome::new(run.id, 2);
    second.record_failure(RawRecord::new(json!({"id": 3})), "rejected by syncer");
    let mut first = BatchOutcome::new(run.id, 1);
    first.record_success();
    first.record_success();

    assert!(repo.record_outcome(&second).await.unwrap());
    assert!(repo.record_outcome(&first).await.unwrap());
    assert!(!repo.record_outcome(&first).await.unwrap());
    assert!(matches!(
        repo.record_outcome(&BatchOutcome::new(run.id, 3)).await,
        Err(SyncError::InvalidState(_))
    ));

    let outcomes = repo.outcomes(run.id).await.unwrap();
    let numbers: Vec<u32> = outcomes.iter().map(|o| o.batch_number).collect();
    assert_eq!(numbers, vec![1, 2]);
    assert_eq!(outcomes[1].failed_records[0].error, "rejected by syncer");

    let totals = repo.totals(run.id).await.unwrap();
    assert_eq!(totals.processed_count, 2);
    assert_eq!(totals.failed_count, 1);
    assert_eq!(totals.batches_reported, 2);

    let done = repo
        .transition(run.id, SyncStatus::CompletedWithErrors, Utc::now())
        .await
        .unwrap();
    assert!(done.completed_at.is_some());
}

#[sqlx::test(migrator = "roster_core::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn stalled_runs_are_listed_and_failed(pool: PgPool) {
    let repo = repo(pool).await;
    let run = run(10, 1);
    repo.create(&run).await.unwrap();

    let future = Utc::now() + Duration::minutes(1);
    let stalled = repo.list_stalled(future).await.unwrap();
    assert_eq!(stalled.len(), 1);
    assert!(repo.list_stalled(Utc::now() - Duration::hours(1)).await.unwrap().is_empty());

    let failed = repo.mark_failed(run.id, "stalled", Utc::now()).await.unwrap();
    assert_eq!(failed.status, SyncStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("stalled"));
    assert!(repo.list_stalled(future).await.unwrap().is_empty());

    assert!(matches!(
        repo.touch(SyncId::new()).await,
        Err(SyncError::NotFound(_))
    ));
}
