use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Knobs for the sync pipeline and the aggregate job.
///
/// All fields carry defaults so a deployment only needs to spell out what it
/// changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Chunking of fetched records and the per-batch job timeout.
    pub batch: BatchConfig,
    /// Retry/backoff policy shared by the chain jobs.
    pub retry: RetryConfig,
    /// Locked aggregate computation.
    pub aggregate: AggregateConfig,
    /// Lease defaults (TTL, housekeeping cadence).
    pub lease: LeaseConfig,
    /// Worker pool sizes per job kind.
    pub workers: WorkerConfig,
    /// Post-run cache invalidation.
    pub invalidation: InvalidationConfig,
    /// Reconciliation of runs whose chain stopped moving.
    pub watchdog: WatchdogConfig,
    /// Safety-net TTL for the per-tenant run lock (seconds).
    pub run_lock_ttl_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            retry: RetryConfig::default(),
            aggregate: AggregateConfig::default(),
            lease: LeaseConfig::default(),
            workers: WorkerConfig::default(),
            invalidation: InvalidationConfig::default(),
            watchdog: WatchdogConfig::default(),
            run_lock_ttl_secs: 7_200,
        }
    }
}

impl PipelineConfig {
    pub fn run_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.run_lock_ttl_secs)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub batch_size: usize,
    /// Budget per record; the batch timeout scales with the batch size.
    pub per_record_timeout_ms: u64,
    /// Floor for the batch job timeout (ms).
    pub min_batch_timeout_ms: u64,
    /// Timeout of the start and complete phases of a chain (ms).
    pub phase_timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            per_record_timeout_ms: 2_000,
            min_batch_timeout_ms: 30_000,
            phase_timeout_ms: 60_000,
        }
    }
}

impl BatchConfig {
    pub fn batch_timeout(&self, records: usize) -> Duration {
        let scaled =
            self.per_record_timeout_ms.saturating_mul(records as u64);
        Duration::from_millis(scaled.max(self.min_batch_timeout_ms))
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_millis(self.phase_timeout_ms)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u16,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Percentage-based jitter to spread out retries.
    pub jitter_ratio: f32,
    /// Minimum jitter window applied when the percentage would be too small.
    pub jitter_min_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 2_000,
            backoff_max_ms: 300_000,
            jitter_ratio: 0.25,
            jitter_min_ms: 250,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    pub timeout_secs: u64,
    pub max_attempts: u16,
    /// Must outlive every attempt plus backoff so the lock only lapses when
    /// the worker died.
    pub lock_ttl_secs: u64,
    pub cache_ttl_secs: u64,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            max_attempts: 3,
            lock_ttl_secs: 960,
            cache_ttl_secs: 3_600,
        }
    }
}

impl AggregateConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Lease/heartbeat tuning for worker tasks.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// Extra lease time granted on top of the job timeout (seconds)
    pub lease_grace_secs: i64,
    /// Housekeeping cadence for scanning expired leases (ms)
    pub housekeeper_interval_ms: u64,
    /// Idle poll interval when no job is ready (ms)
    pub poll_interval_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            lease_grace_secs: 30,
            housekeeper_interval_ms: 15_000,
            poll_interval_ms: 250,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Workers serving the sync chain (start, batch, complete).
    pub sync_workers: usize,
    pub aggregate_workers: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            sync_workers: 4,
            aggregate_workers: 1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct InvalidationConfig {
    /// COUNT hint passed to each SCAN call.
    pub scan_count: usize,
    /// Upper bound on SCAN round-trips per pattern.
    pub max_iterations: usize,
    /// Glob patterns; `{tenant}` is replaced with the tenant id.
    pub patterns: Vec<String>,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            scan_count: 100,
            max_iterations: 1_000,
            patterns: vec![
                "employee:{tenant}:*".to_string(),
                "employees:{tenant}:*".to_string(),
            ],
        }
    }
}

impl InvalidationConfig {
    pub fn patterns_for(&self, tenant: &str) -> Vec<String> {
        self.patterns
            .iter()
            .map(|p| p.replace("{tenant}", tenant))
            .collect()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub stall_threshold_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            stall_threshold_secs: 900,
            sweep_interval_secs: 60,
        }
    }
}

impl WatchdogConfig {
    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.stall_threshold_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
