#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use roster_core::bus::{
    InProcProgressBus, ProgressEvent, ProgressMessage, ProgressPublisher,
};
use roster_core::cache::InMemoryCache;
use roster_core::config::{PipelineConfig, RetryConfig};
use roster_core::error::{Result, SyncError};
use roster_core::pipeline::Collaborators;
use roster_core::ports::{
    AggregateSource, ApplyError, ConsumerIdentityResolver, NoopFreshness,
    RecordFetcher, Syncer,
};
use roster_core::queue::InMemoryJobQueue;
use roster_core::store::InMemorySyncRunRepository;
use roster_core::types::{ConsumerId, RawRecord, TenantId};
use roster_core::SyncEngine;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

pub fn records(n: usize) -> Vec<RawRecord> {
    (1..=n).map(|i| RawRecord::new(json!({ "id": i, "name": format!("employee {i}") }))).collect()
}

pub struct StaticFetcher {
    records: Vec<RawRecord>,
}

impl StaticFetcher {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl RecordFetcher for StaticFetcher {
    async fn fetch_all_records(&self, _tenant_id: TenantId) -> Result<Vec<RawRecord>> {
        Ok(self.records.clone())
    }
}

/// Rejects or blows up on specific record ids; everything else applies.
#[derive(Default)]
pub struct ScriptedSyncer {
    pub rejected: HashSet<String>,
    pub record_errors: HashSet<String>,
    pub fatal: HashSet<String>,
    /// Fatal ids only fail this many times, then apply.
    pub fatal_budget: Option<usize>,
    fatal_hits: AtomicUsize,
    pub applied: AtomicUsize,
    /// Time spent on every record, on the tokio clock.
    pub per_record: Option<Duration>,
}

impl ScriptedSyncer {
    pub fn rejecting(ids: &[&str]) -> Self {
        Self {
            rejected: ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn failing_fatally_on(ids: &[&str], budget: Option<usize>) -> Self {
        Self {
            fatal: ids.iter().map(|s| s.to_string()).collect(),
            fatal_budget: budget,
            ..Default::default()
        }
    }

    pub fn slow(per_record: Duration) -> Self {
        Self {
            per_record: Some(per_record),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Syncer for ScriptedSyncer {
    async fn apply(
        &self,
        record: &RawRecord,
        _tenant_id: TenantId,
    ) -> std::result::Result<bool, ApplyError> {
        if let Some(delay) = self.per_record {
            tokio::time::sleep(delay).await;
        }
        let id = record.external_id().unwrap_or_default();
        if self.fatal.contains(&id) {
            let hits = self.fatal_hits.fetch_add(1, Ordering::SeqCst);
            if self.fatal_budget.is_none_or(|budget| hits < budget) {
                return Err(ApplyError::Fatal("connector unavailable".into()));
            }
        }
        if self.record_errors.contains(&id) {
            return Err(ApplyError::Record(format!("record {id} failed validation")));
        }
        if self.rejected.contains(&id) {
            return Ok(false);
        }
        self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

pub struct FixedIdentity(pub &'static str);

#[async_trait]
impl ConsumerIdentityResolver for FixedIdentity {
    async fn resolve_consumer_id(&self, _tenant_id: TenantId) -> Result<ConsumerId> {
        Ok(ConsumerId::new(self.0))
    }
}

pub struct CountingAggregate {
    pub value: Option<u64>,
    pub calls: AtomicUsize,
    /// Query latency, on the tokio clock.
    pub latency: Option<Duration>,
}

impl CountingAggregate {
    pub fn succeeding(value: u64) -> Self {
        Self {
            value: Some(value),
            calls: AtomicUsize::new(0),
            latency: None,
        }
    }

    pub fn failing() -> Self {
        Self {
            value: None,
            calls: AtomicUsize::new(0),
            latency: None,
        }
    }

    /// Answers with `value`, but only after `latency`.
    pub fn hanging(value: u64, latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::succeeding(value)
        }
    }
}

#[async_trait]
impl AggregateSource for CountingAggregate {
    async fn compute(&self, _tenant_id: TenantId, _consumer_id: &ConsumerId) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.value
            .ok_or_else(|| SyncError::Collaborator("aggregate query timed out".into()))
    }
}

/// Transport that is always down.
pub struct UnreachablePublisher {
    pub attempts: AtomicUsize,
}

impl UnreachablePublisher {
    pub fn new() -> Self {
        Self {
            attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ProgressPublisher for UnreachablePublisher {
    async fn publish(&self, _channel: &str, _event: &ProgressEvent) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SyncError::Cache("pub/sub connection refused".into()))
    }
}

/// Retries without delay so `run_until_idle` drains every attempt.
pub fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.retry = RetryConfig {
        max_attempts: 3,
        backoff_base_ms: 0,
        backoff_max_ms: 0,
        jitter_ratio: 0.0,
        jitter_min_ms: 0,
    };
    config
}

pub struct Harness {
    pub engine: SyncEngine<InMemoryJobQueue>,
    pub queue: Arc<InMemoryJobQueue>,
    pub runs: Arc<InMemorySyncRunRepository>,
    pub cache: InMemoryCache,
    pub syncer: Arc<ScriptedSyncer>,
    pub aggregate: Arc<CountingAggregate>,
    events: broadcast::Receiver<ProgressMessage>,
}

impl Harness {
    pub fn new(
        records: Vec<RawRecord>,
        syncer: ScriptedSyncer,
        aggregate: CountingAggregate,
    ) -> Self {
        Self::build(records, syncer, aggregate, fast_config(), None)
    }

    pub fn with_config(
        records: Vec<RawRecord>,
        syncer: ScriptedSyncer,
        aggregate: CountingAggregate,
        config: PipelineConfig,
    ) -> Self {
        Self::build(records, syncer, aggregate, config, None)
    }

    /// Progress goes to `publisher` only; `take_events` stays empty.
    pub fn with_publisher(
        records: Vec<RawRecord>,
        syncer: ScriptedSyncer,
        publisher: Arc<dyn ProgressPublisher>,
    ) -> Self {
        Self::build(
            records,
            syncer,
            CountingAggregate::succeeding(1),
            fast_config(),
            Some(publisher),
        )
    }

    fn build(
        records: Vec<RawRecord>,
        syncer: ScriptedSyncer,
        aggregate: CountingAggregate,
        config: PipelineConfig,
        publisher: Option<Arc<dyn ProgressPublisher>>,
    ) -> Self {
        let queue = Arc::new(InMemoryJobQueue::new(config.retry));
        let runs = Arc::new(InMemorySyncRunRepository::new());
        let cache = InMemoryCache::new();
        let bus = Arc::new(InProcProgressBus::default());
        let events = bus.subscribe();
        let publisher: Arc<dyn ProgressPublisher> = publisher.unwrap_or(bus);
        let syncer = Arc::new(syncer);
        let aggregate = Arc::new(aggregate);

        let collaborators = Collaborators {
            fetcher: Arc::new(StaticFetcher::new(records)),
            syncer: syncer.clone(),
            identity: Arc::new(FixedIdentity("acme-payroll")),
            aggregate_source: aggregate.clone(),
            freshness: Arc::new(NoopFreshness),
        };
        let engine = SyncEngine::new(
            config,
            Arc::clone(&queue),
            runs.clone(),
            Arc::new(cache.clone()),
            publisher,
            collaborators,
        );

        Self {
            engine,
            queue,
            runs,
            cache,
            syncer,
            aggregate,
            events,
        }
    }

    /// Runs queued jobs inline until nothing is ready.
    pub async fn drain(&self) -> usize {
        self.engine.runtime().run_until_idle().await.expect("queue drains")
    }

    /// Processes exactly one ready job; `false` when none was ready.
    pub async fn step(&self) -> bool {
        self.engine.runtime().run_one().await.expect("job processed")
    }

    /// Events published since the last call, in order.
    pub fn take_events(&mut self) -> Vec<ProgressEvent> {
        let mut out = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(message) => out.push(message.event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => return out,
            }
        }
    }
}
