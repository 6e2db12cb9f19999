use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Duration;

use crate::config::RetryConfig;

use super::job::JobId;

/// Exponential backoff with deterministic jitter: the same job and attempt
/// always yield the same delay.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before `attempt` + 1 runs, given `attempt` just failed.
    pub fn delay(&self, job_id: JobId, attempt: u16) -> Duration {
        let anchor = self.anchor_delay_ms(attempt);
        Duration::from_millis(self.jittered(anchor, job_id, attempt))
    }

    fn anchor_delay_ms(&self, attempt: u16) -> u64 {
        if attempt == 0 {
            return 0;
        }
        let exponent = u32::from(attempt - 1).min(32);
        self.config
            .backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.config.backoff_max_ms)
    }

    fn jittered(&self, anchor_ms: u64, job_id: JobId, attempt: u16) -> u64 {
        if anchor_ms == 0 {
            return 0;
        }

        let jitter_ratio = f64::from(self.config.jitter_ratio.max(0.0));
        let jitter_span = ((anchor_ms as f64) * jitter_ratio)
            .max(self.config.jitter_min_ms as f64)
            .min(self.config.backoff_max_ms as f64);

        let lower = 0f64.max(anchor_ms as f64 - jitter_span);
        let upper = (anchor_ms as f64 + jitter_span)
            .min(self.config.backoff_max_ms as f64);
        if upper <= lower {
            return lower.round() as u64;
        }

        let unit = deterministic_unit(job_id, attempt);
        (lower + (upper - lower) * unit).round() as u64
    }
}

fn deterministic_unit(job_id: JobId, attempt: u16) -> f64 {
    let mut hasher = DefaultHasher::default();
    job_id.hash(&mut hasher);
    attempt.hash(&mut hasher);
    (hasher.finish() as f64) / (u64::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(RetryConfig::default())
    }

    #[test]
    fn delay_grows_and_stays_within_jitter_window() {
        let job = JobId(Uuid::from_u128(11));
        let first = policy().delay(job, 1).as_millis() as u64;
        let second = policy().delay(job, 2).as_millis() as u64;

        assert!((1_500..=2_500).contains(&first), "first={first}");
        assert!((3_000..=5_000).contains(&second), "second={second}");
    }

    #[test]
    fn delay_is_deterministic_per_job_and_attempt() {
        let job = JobId(Uuid::from_u128(42));
        assert_eq!(policy().delay(job, 2), policy().delay(job, 2));
    }

    #[test]
    fn delay_is_capped() {
        let job = JobId(Uuid::from_u128(5));
        let capped = policy().delay(job, 30);
        assert!(capped <= Duration::from_millis(300_000));
    }
}
