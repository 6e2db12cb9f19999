use std::fmt;

use thiserror::Error;

use super::models::Config;

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push(&mut self, message: impl Into<String>) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint(
        &mut self,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hint {
            Some(hint) => write!(f, "{} ({hint})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigGuardRailError {
    #[error("batch_size must be at least 1")]
    ZeroBatchSize,
    #[error("retry.max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("at least one sync worker is required")]
    NoSyncWorkers,
}

/// Rejects settings the pipeline cannot run with and warns about ones that
/// defeat its safety nets.
pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let pipeline = &config.pipeline;
    if pipeline.batch.batch_size == 0 {
        return Err(ConfigGuardRailError::ZeroBatchSize);
    }
    if pipeline.retry.max_attempts == 0 || pipeline.aggregate.max_attempts == 0
    {
        return Err(ConfigGuardRailError::ZeroAttempts);
    }
    if pipeline.workers.sync_workers == 0 {
        return Err(ConfigGuardRailError::NoSyncWorkers);
    }

    let mut warnings = ConfigWarnings::default();

    let aggregate = &pipeline.aggregate;
    let worst_case =
        aggregate.timeout_secs.saturating_mul(u64::from(aggregate.max_attempts));
    if aggregate.lock_ttl_secs <= worst_case {
        warnings.push_with_hint(
            format!(
                "aggregate lock TTL {}s does not outlive {} attempts of {}s",
                aggregate.lock_ttl_secs,
                aggregate.max_attempts,
                aggregate.timeout_secs
            ),
            "raise pipeline.aggregate.lock_ttl_secs or a second computation may start mid-retry",
        );
    }

    if pipeline.watchdog.stall_threshold_secs.saturating_mul(1_000)
        <= pipeline.batch.min_batch_timeout_ms
    {
        warnings.push_with_hint(
            "watchdog stall threshold is shorter than the batch timeout",
            "healthy runs will be failed while a batch is still executing",
        );
    }

    if pipeline.workers.aggregate_workers == 0 {
        warnings.push("no aggregate workers configured; aggregate requests will queue forever");
    }

    if config.database.url.is_none() {
        warnings.push_with_hint(
            "DATABASE_URL not set; sync runs are kept in memory",
            "run state is lost on restart",
        );
    }

    Ok(warnings)
}
