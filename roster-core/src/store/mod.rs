//! Durable run state: one [`SyncRun`] per execution plus its insert-once
//! batch outcomes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{BatchOutcome, RunTotals, SyncId, SyncRun, SyncStatus};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemorySyncRunRepository;
#[cfg(feature = "postgres")]
pub use postgres::PostgresSyncRunRepository;

#[async_trait]
pub trait SyncRunRepository: Send + Sync {
    async fn create(&self, run: &SyncRun) -> Result<()>;

    async fn get(&self, sync_id: SyncId) -> Result<Option<SyncRun>>;

    /// Applies a validated status change and returns the updated run.
    async fn transition(
        &self,
        sync_id: SyncId,
        to: SyncStatus,
        at: DateTime<Utc>,
    ) -> Result<SyncRun>;

    /// Moves a non-terminal run to `failed` with a reason.
    async fn mark_failed(
        &self,
        sync_id: SyncId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<SyncRun>;

    /// Stores an outcome once per `(sync_id, batch_number)`. Returns `false`
    /// when that batch already reported.
    async fn record_outcome(&self, outcome: &BatchOutcome) -> Result<bool>;

    /// Outcomes ordered by batch number.
    async fn outcomes(&self, sync_id: SyncId) -> Result<Vec<BatchOutcome>>;

    async fn totals(&self, sync_id: SyncId) -> Result<RunTotals>;

    /// Pending or running runs with no activity since `older_than`.
    async fn list_stalled(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<SyncRun>>;

    async fn touch(&self, sync_id: SyncId) -> Result<()>;
}
