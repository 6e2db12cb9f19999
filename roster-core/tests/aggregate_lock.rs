mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{CountingAggregate, Harness, ScriptedSyncer};
use roster_core::aggregate::AggregateRequestOutcome;
use roster_core::bus::ProgressPayload;
use roster_core::types::{AggregateKey, ConsumerId, TenantId};

fn key(tenant: TenantId) -> AggregateKey {
    AggregateKey::new(tenant, ConsumerId::new("acme-payroll"))
}

#[tokio::test]
async fn computation_runs_once_and_later_requests_hit_the_cache() {
    let mut h = Harness::new(
        Vec::new(),
        ScriptedSyncer::default(),
        CountingAggregate::succeeding(42),
    );
    let tenant = TenantId::new();
    let aggregates = h.engine.aggregates();

    let first = aggregates.request(tenant, Some("user-3".into())).await.unwrap();
    assert!(matches!(first, AggregateRequestOutcome::Queued { .. }));
    assert!(h.engine.context().aggregate_lock.is_held(&key(tenant)).await.unwrap());

    assert_eq!(
        aggregates.request(tenant, None).await.unwrap(),
        AggregateRequestOutcome::AlreadyRunning
    );

    assert_eq!(h.drain().await, 1);
    assert_eq!(h.aggregate.calls.load(Ordering::SeqCst), 1);
    assert!(!h.engine.context().aggregate_lock.is_held(&key(tenant)).await.unwrap());

    let events = h.take_events();
    assert_eq!(events.len(), 1);
    match &events[0].payload {
        ProgressPayload::AggregateComputed(result) => {
            assert_eq!(result.value, 42);
            assert_eq!(result.initiator_id.as_str(), "user-3");
        }
        other => panic!("unexpected event {}", other.name()),
    }

    assert_eq!(
        h.engine.aggregates().request(tenant, None).await.unwrap(),
        AggregateRequestOutcome::Cached { value: 42 }
    );
    assert_eq!(h.drain().await, 0);
}

#[tokio::test]
async fn exhausted_computation_announces_failure_and_frees_the_lock() {
    let mut h = Harness::new(
        Vec::new(),
        ScriptedSyncer::default(),
        CountingAggregate::failing(),
    );
    let tenant = TenantId::new();

    let first = h.engine.aggregates().request(tenant, None).await.unwrap();
    assert!(matches!(first, AggregateRequestOutcome::Queued { .. }));

    assert_eq!(h.drain().await, 3);
    assert_eq!(h.aggregate.calls.load(Ordering::SeqCst), 3);

    let events = h.take_events();
    assert_eq!(events.len(), 1);
    match &events[0].payload {
        ProgressPayload::AggregateComputationFailed(failure) => {
            assert_eq!(failure.tenant_id, tenant);
            assert!(failure.error_message.contains("aggregate query timed out"));
        }
        other => panic!("unexpected event {}", other.name()),
    }
    assert!(!h.engine.context().aggregate_lock.is_held(&key(tenant)).await.unwrap());

    let again = h.engine.aggregates().request(tenant, None).await.unwrap();
    assert!(matches!(again, AggregateRequestOutcome::Queued { .. }));
}

#[tokio::test(start_paused = true)]
async fn hung_query_is_cut_off_per_attempt_and_releases_the_lock() {
    let mut h = Harness::new(
        Vec::new(),
        ScriptedSyncer::default(),
        // Longer than the 300s attempt budget.
        CountingAggregate::hanging(7, Duration::from_secs(301)),
    );
    let tenant = TenantId::new();

    let first = h.engine.aggregates().request(tenant, None).await.unwrap();
    assert!(matches!(first, AggregateRequestOutcome::Queued { .. }));

    assert_eq!(h.drain().await, 3);
    assert_eq!(h.aggregate.calls.load(Ordering::SeqCst), 3);

    let events = h.take_events();
    assert_eq!(events.len(), 1);
    match &events[0].payload {
        ProgressPayload::AggregateComputationFailed(failure) => {
            assert_eq!(failure.tenant_id, tenant);
            assert!(failure.error_message.contains("timed out after 300000ms"));
        }
        other => panic!("unexpected event {}", other.name()),
    }
    // Released by the failure path, not by TTL expiry.
    assert!(!h.engine.context().aggregate_lock.is_held(&key(tenant)).await.unwrap());
    let again = h.engine.aggregates().request(tenant, None).await.unwrap();
    assert!(matches!(again, AggregateRequestOutcome::Queued { .. }));
}

#[tokio::test]
async fn locks_are_scoped_per_tenant() {
    let h = Harness::new(
        Vec::new(),
        ScriptedSyncer::default(),
        CountingAggregate::succeeding(1),
    );
    let aggregates = h.engine.aggregates();

    let a = aggregates.request(TenantId::new(), None).await.unwrap();
    let b = aggregates.request(TenantId::new(), None).await.unwrap();
    assert!(matches!(a, AggregateRequestOutcome::Queued { .. }));
    assert!(matches!(b, AggregateRequestOutcome::Queued { .. }));
}

#[test]
fn outcome_serializes_with_a_status_tag() {
    let json = serde_json::to_value(AggregateRequestOutcome::AlreadyRunning).unwrap();
    assert_eq!(json, serde_json::json!({ "status": "already_running" }));
    let json = serde_json::to_value(AggregateRequestOutcome::Cached { value: 9 }).unwrap();
    assert_eq!(json, serde_json::json!({ "status": "cached", "value": 9 }));
}
