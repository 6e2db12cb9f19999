use std::collections::{BTreeMap, HashMap};
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::SyncRunRepository;
use crate::error::{Result, SyncError};
use crate::types::{BatchOutcome, RunTotals, SyncId, SyncRun, SyncStatus};

#[derive(Default)]
struct Arena {
    runs: HashMap<SyncId, SyncRun>,
    /// Outcomes per run keyed by batch number.
    outcomes: HashMap<SyncId, BTreeMap<u32, BatchOutcome>>,
}

impl Arena {
    fn run_mut(&mut self, sync_id: SyncId) -> Result<&mut SyncRun> {
        self.runs
            .get_mut(&sync_id)
            .ok_or_else(|| SyncError::NotFound(format!("sync run {sync_id}")))
    }
}

#[derive(Default)]
pub struct InMemorySyncRunRepository {
    arena: RwLock<Arena>,
}

impl fmt::Debug for InMemorySyncRunRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let runs = self
            .arena
            .try_read()
            .map(|arena| arena.runs.len())
            .unwrap_or_default();
        f.debug_struct("InMemorySyncRunRepository")
            .field("runs", &runs)
            .finish()
    }
}

impl InMemorySyncRunRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook for simulating a run that stopped moving.
    pub async fn set_last_activity(
        &self,
        sync_id: SyncId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.arena.write().await.run_mut(sync_id)?.last_activity_at = at;
        Ok(())
    }
}

#[async_trait]
impl SyncRunRepository for InMemorySyncRunRepository {
    async fn create(&self, run: &SyncRun) -> Result<()> {
        let mut arena = self.arena.write().await;
        if arena.runs.contains_key(&run.id) {
            return Err(SyncError::Conflict(format!(
                "sync run {} already exists",
                run.id
            )));
        }
        arena.runs.insert(run.id, run.clone());
        arena.outcomes.insert(run.id, BTreeMap::new());
        Ok(())
    }

    async fn get(&self, sync_id: SyncId) -> Result<Option<SyncRun>> {
        Ok(self.arena.read().await.runs.get(&sync_id).cloned())
    }

    async fn transition(
        &self,
        sync_id: SyncId,
        to: SyncStatus,
        at: DateTime<Utc>,
    ) -> Result<SyncRun> {
        let mut arena = self.arena.write().await;
        let run = arena.run_mut(sync_id)?;
        run.transition(to, at)?;
        Ok(run.clone())
    }

    async fn mark_failed(
        &self,
        sync_id: SyncId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<SyncRun> {
        let mut arena = self.arena.write().await;
        let run = arena.run_mut(sync_id)?;
        run.transition(SyncStatus::Failed, at)?;
        run.failure_reason = Some(reason.to_string());
        Ok(run.clone())
    }

    async fn record_outcome(&self, outcome: &BatchOutcome) -> Result<bool> {
        let mut arena = self.arena.write().await;
        let total_batches = arena.run_mut(outcome.sync_id)?.total_batches;
        if outcome.batch_number == 0 || outcome.batch_number > total_batches {
            return Err(SyncError::InvalidState(format!(
                "batch {} outside 1..={} for sync {}",
                outcome.batch_number, total_batches, outcome.sync_id
            )));
        }

        let per_run = arena.outcomes.entry(outcome.sync_id).or_default();
        if per_run.contains_key(&outcome.batch_number) {
            return Ok(false);
        }
        per_run.insert(outcome.batch_number, outcome.clone());
        arena.run_mut(outcome.sync_id)?.last_activity_at = Utc::now();
        Ok(true)
    }

    async fn outcomes(&self, sync_id: SyncId) -> Result<Vec<BatchOutcome>> {
        let arena = self.arena.read().await;
        Ok(arena
            .outcomes
            .get(&sync_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn totals(&self, sync_id: SyncId) -> Result<RunTotals> {
        let arena = self.arena.read().await;
        Ok(arena
            .outcomes
            .get(&sync_id)
            .map(|m| RunTotals::from_outcomes(m.values()))
            .unwrap_or_default())
    }

    async fn list_stalled(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<SyncRun>> {
        let arena = self.arena.read().await;
        let mut stalled: Vec<SyncRun> = arena
            .runs
            .values()
            .filter(|run| !run.status.is_terminal())
            .filter(|run| run.last_activity_at < older_than)
            .cloned()
            .collect();
        stalled.sort_by_key(|run| run.last_activity_at);
        Ok(stalled)
    }

    async fn touch(&self, sync_id: SyncId) -> Result<()> {
        self.arena.write().await.run_mut(sync_id)?.last_activity_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InitiatorId, RawRecord, TenantId};
    use serde_json::json;

    async fn seeded(batches: u32) -> (InMemorySyncRunRepository, SyncId) {
        let repo = InMemorySyncRunRepository::new();
        let run = SyncRun::new(
            SyncId::new(),
            TenantId::new(),
            InitiatorId::system(),
            u64::from(batches) * 2,
            batches,
        );
        repo.create(&run).await.unwrap();
        (repo, run.id)
    }

    #[tokio::test]
    async fn outcomes_are_insert_once_and_ordered() {
        let (repo, sync_id) = seeded(3).await;

        let mut second = BatchOutcome::new(sync_id, 2);
        second.record_success();
        let mut first = BatchOutcome::new(sync_id, 1);
        first.record_failure(RawRecord::new(json!({"id": 1})), "rejected");

        assert!(repo.record_outcome(&second).await.unwrap());
        assert!(repo.record_outcome(&first).await.unwrap());
        assert!(!repo.record_outcome(&second).await.unwrap());

        let numbers: Vec<u32> = repo
            .outcomes(sync_id)
            .await
            .unwrap()
            .iter()
            .map(|o| o.batch_number)
            .collect();
        assert_eq!(numbers, vec![1, 2]);

        let totals = repo.totals(sync_id).await.unwrap();
        assert_eq!(totals.processed_count, 1);
        assert_eq!(totals.failed_count, 1);
    }

    #[tokio::test]
    async fn out_of_range_batches_are_rejected() {
        let (repo, sync_id) = seeded(2).await;
        let outcome = BatchOutcome::new(sync_id, 3);
        assert!(matches!(
            repo.record_outcome(&outcome).await,
            Err(SyncError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn stalled_runs_exclude_terminal_and_recent() {
        let (repo, stuck) = seeded(1).await;
        let long_ago = Utc::now() - chrono::Duration::hours(1);
        repo.set_last_activity(stuck, long_ago).await.unwrap();

        let (repo_done, done) = seeded(1).await;
        repo_done
            .transition(done, SyncStatus::Running, Utc::now())
            .await
            .unwrap();
        repo_done
            .transition(done, SyncStatus::Completed, Utc::now())
            .await
            .unwrap();
        repo_done.set_last_activity(done, long_ago).await.unwrap();

        let threshold = Utc::now() - chrono::Duration::minutes(15);
        let stalled = repo.list_stalled(threshold).await.unwrap();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].id, stuck);
        assert!(repo_done.list_stalled(threshold).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_failed_records_reason_and_rejects_terminal_runs() {
        let (repo, sync_id) = seeded(1).await;
        let run = repo
            .mark_failed(sync_id, "stalled", Utc::now())
            .await
            .unwrap();
        assert_eq!(run.status, SyncStatus::Failed);
        assert_eq!(run.failure_reason.as_deref(), Some("stalled"));
        assert!(repo.mark_failed(sync_id, "again", Utc::now()).await.is_err());
    }
}
