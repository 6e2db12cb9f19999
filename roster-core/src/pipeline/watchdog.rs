use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{PhaseRunner, PipelineContext};
use crate::config::WatchdogConfig;
use crate::error::Result;

/// Dead-man's switch for chains that stopped moving: a run with no recorded
/// activity for longer than the stall threshold is forced to `failed`.
pub struct StallWatchdog {
    ctx: PipelineContext,
    phases: PhaseRunner,
    config: WatchdogConfig,
}

impl fmt::Debug for StallWatchdog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StallWatchdog")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StallWatchdog {
    pub fn new(ctx: PipelineContext, phases: PhaseRunner) -> Self {
        let config = ctx.config.watchdog;
        Self {
            ctx,
            phases,
            config,
        }
    }

    /// One reconciliation pass. Returns how many runs were failed.
    pub async fn sweep(&self) -> Result<usize> {
        let now = Utc::now();
        let threshold = chrono::Duration::from_std(self.config.stall_threshold())
            .unwrap_or(chrono::Duration::minutes(15));
        let stalled = self.ctx.runs.list_stalled(now - threshold).await?;
        if stalled.is_empty() {
            debug!("watchdog sweep found no stalled runs");
            return Ok(0);
        }

        let mut reconciled = 0;
        for run in stalled {
            let idle = (now - run.last_activity_at).num_seconds();
            let reason = format!(
                "stalled in {} with no progress for {idle}s",
                run.status
            );
            match self.phases.abort(run.id, &reason).await {
                Ok(true) => reconciled += 1,
                Ok(false) => {}
                Err(err) => warn!(
                    sync_id = %run.id,
                    tenant_id = %run.tenant_id,
                    error = %err,
                    "watchdog could not reconcile run"
                ),
            }
        }

        info!(reconciled, "watchdog reconciled stalled runs");
        Ok(reconciled)
    }

    /// Sweeps on an interval until `shutdown` fires.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let interval = self.config.sweep_interval();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Watchdog shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if let Err(err) = self.sweep().await {
                            warn!("watchdog sweep error: {err}");
                        }
                    }
                }
            }
        })
    }
}
