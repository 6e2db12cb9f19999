use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, info};

use super::SyncRunRepository;
use crate::error::{Result, SyncError};
use crate::types::{
    BatchOutcome, ConsumerId, FailedRecord, InitiatorId, RunTotals, SyncId,
    SyncRun, SyncStatus, TenantId,
};

const RUN_COLUMNS: &str = r#"
    id, tenant_id, consumer_id, initiator_id, scope_id, total_records,
    total_batches, status, created_at, started_at, completed_at,
    last_activity_at, failure_reason
"#;

/// Postgres-backed run store.
#[derive(Clone)]
pub struct PostgresSyncRunRepository {
    pool: PgPool,
}

impl fmt::Debug for PostgresSyncRunRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresSyncRunRepository")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresSyncRunRepository {
    /// Wraps `pool` after a health check.
    pub async fn new(pool: PgPool) -> Result<Self> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| {
                SyncError::Database(format!(
                    "run store failed Postgres health check: {e}"
                ))
            })?;
        info!("Run store connected to Postgres");
        Ok(Self { pool })
    }

    /// Applies the embedded migrations.
    pub async fn migrate(&self) -> Result<()> {
        crate::MIGRATOR.run(&self.pool).await.map_err(|e| {
            SyncError::Database(format!("migration failed: {e}"))
        })?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_run(
        tx: &mut Transaction<'_, Postgres>,
        sync_id: SyncId,
    ) -> Result<SyncRun> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM sync_runs WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(sync_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("sync run {sync_id}")))?;
        run_from_row(&row)
    }

    async fn write_lifecycle(
        tx: &mut Transaction<'_, Postgres>,
        run: &SyncRun,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_runs
            SET status = $2,
                started_at = $3,
                completed_at = $4,
                last_activity_at = $5,
                failure_reason = $6
            WHERE id = $1
            "#,
        )
        .bind(run.id.as_uuid())
        .bind(run.status.as_str())
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(run.last_activity_at)
        .bind(run.failure_reason.as_deref())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

fn run_from_row(row: &PgRow) -> Result<SyncRun> {
    let status: String = row.try_get("status")?;
    let total_batches: i32 = row.try_get("total_batches")?;
    Ok(SyncRun {
        id: SyncId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        consumer_id: row
            .try_get::<Option<String>, _>("consumer_id")?
            .map(ConsumerId::new),
        initiator_id: InitiatorId::new(row.try_get::<String, _>("initiator_id")?),
        scope_id: row.try_get("scope_id")?,
        total_records: to_u64(row.try_get("total_records")?),
        total_batches: u32::try_from(total_batches).unwrap_or_default(),
        status: status.parse()?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        last_activity_at: row.try_get("last_activity_at")?,
        failure_reason: row.try_get("failure_reason")?,
    })
}

fn outcome_from_row(row: &PgRow) -> Result<BatchOutcome> {
    let batch_number: i32 = row.try_get("batch_number")?;
    let Json(failed_records): Json<Vec<FailedRecord>> =
        row.try_get("failed_records")?;
    Ok(BatchOutcome {
        sync_id: SyncId(row.try_get("sync_id")?),
        batch_number: u32::try_from(batch_number).unwrap_or_default(),
        processed_count: to_u64(row.try_get("processed_count")?),
        failed_count: to_u64(row.try_get("failed_count")?),
        failed_records,
        batch_error: row.try_get("batch_error")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

#[async_trait]
impl SyncRunRepository for PostgresSyncRunRepository {
    async fn create(&self, run: &SyncRun) -> Result<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO sync_runs (
                id, tenant_id, consumer_id, initiator_id, scope_id,
                total_records, total_batches, status, created_at,
                started_at, completed_at, last_activity_at, failure_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(run.id.as_uuid())
        .bind(run.tenant_id.as_uuid())
        .bind(run.consumer_id.as_ref().map(|c| c.as_str().to_string()))
        .bind(run.initiator_id.as_str())
        .bind(run.scope_id.as_deref())
        .bind(to_i64(run.total_records))
        .bind(i32::try_from(run.total_batches).unwrap_or(i32::MAX))
        .bind(run.status.as_str())
        .bind(run.created_at)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(run.last_activity_at)
        .bind(run.failure_reason.as_deref())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(SyncError::Conflict(format!(
                "sync run {} already exists",
                run.id
            )));
        }
        Ok(())
    }

    async fn get(&self, sync_id: SyncId) -> Result<Option<SyncRun>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM sync_runs WHERE id = $1");
        sqlx::query(&sql)
            .bind(sync_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(run_from_row)
            .transpose()
    }

    async fn transition(
        &self,
        sync_id: SyncId,
        to: SyncStatus,
        at: DateTime<Utc>,
    ) -> Result<SyncRun> {
        let mut tx = self.pool.begin().await?;
        let mut run = Self::lock_run(&mut tx, sync_id).await?;
        run.transition(to, at)?;
        Self::write_lifecycle(&mut tx, &run).await?;
        tx.commit().await?;
        debug!(sync_id = %sync_id, status = %to, "run transitioned");
        Ok(run)
    }

    async fn mark_failed(
        &self,
        sync_id: SyncId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<SyncRun> {
        let mut tx = self.pool.begin().await?;
        let mut run = Self::lock_run(&mut tx, sync_id).await?;
        run.transition(SyncStatus::Failed, at)?;
        run.failure_reason = Some(reason.to_string());
        Self::write_lifecycle(&mut tx, &run).await?;
        tx.commit().await?;
        Ok(run)
    }

    async fn record_outcome(&self, outcome: &BatchOutcome) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let total_batches = sqlx::query_scalar::<_, i32>(
            "SELECT total_batches FROM sync_runs WHERE id = $1",
        )
        .bind(outcome.sync_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            SyncError::NotFound(format!("sync run {}", outcome.sync_id))
        })?;

        let batch_number = i32::try_from(outcome.batch_number).unwrap_or(i32::MAX);
        if batch_number < 1 || batch_number > total_batches {
            return Err(SyncError::InvalidState(format!(
                "batch {} outside 1..={} for sync {}",
                outcome.batch_number, total_batches, outcome.sync_id
            )));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO sync_batch_outcomes (
                sync_id, batch_number, processed_count, failed_count,
                failed_records, batch_error, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (sync_id, batch_number) DO NOTHING
            "#,
        )
        .bind(outcome.sync_id.as_uuid())
        .bind(batch_number)
        .bind(to_i64(outcome.processed_count))
        .bind(to_i64(outcome.failed_count))
        .bind(Json(&outcome.failed_records))
        .bind(outcome.batch_error.as_deref())
        .bind(outcome.recorded_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE sync_runs SET last_activity_at = NOW() WHERE id = $1")
            .bind(outcome.sync_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn outcomes(&self, sync_id: SyncId) -> Result<Vec<BatchOutcome>> {
        let rows = sqlx::query(
            r#"
            SELECT sync_id, batch_number, processed_count, failed_count,
                   failed_records, batch_error, recorded_at
            FROM sync_batch_outcomes
            WHERE sync_id = $1
            ORDER BY batch_number ASC
            "#,
        )
        .bind(sync_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(outcome_from_row).collect()
    }

    async fn totals(&self, sync_id: SyncId) -> Result<RunTotals> {
        let (processed, failed, batches) =
            sqlx::query_as::<_, (i64, i64, i64)>(
                r#"
                SELECT COALESCE(SUM(processed_count), 0)::BIGINT,
                       COALESCE(SUM(failed_count), 0)::BIGINT,
                       COUNT(*)
                FROM sync_batch_outcomes
                WHERE sync_id = $1
                "#,
            )
            .bind(sync_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
        Ok(RunTotals {
            processed_count: to_u64(processed),
            failed_count: to_u64(failed),
            batches_reported: u32::try_from(batches).unwrap_or(u32::MAX),
        })
    }

    async fn list_stalled(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<SyncRun>> {
        let sql = format!(
            r#"
            SELECT {RUN_COLUMNS}
            FROM sync_runs
            WHERE status IN ('pending', 'running')
              AND last_activity_at < $1
            ORDER BY last_activity_at ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(older_than)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(run_from_row).collect()
    }

    async fn touch(&self, sync_id: SyncId) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE sync_runs SET last_activity_at = NOW() WHERE id = $1",
        )
        .bind(sync_id.as_uuid())
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(SyncError::NotFound(format!("sync run {sync_id}")));
        }
        Ok(())
    }
}
