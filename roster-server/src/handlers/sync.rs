use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use roster_core::{
    pipeline::SyncRequest,
    types::{BatchOutcome, InitiatorId, RunTotals, SyncId, SyncRun, TenantId},
};

use crate::api::ApiResponse;
use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct TriggerSyncRequest {
    pub initiator_id: Option<String>,
    pub scope_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncAccepted {
    pub sync_id: SyncId,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRunView {
    pub run: SyncRun,
    pub totals: RunTotals,
    pub outcomes: Vec<BatchOutcome>,
}

/// `POST /api/v1/tenants/{tenant}/sync`
pub async fn trigger_sync_handler(
    State(state): State<AppState>,
    Path(tenant_id): Path<TenantId>,
    Json(body): Json<TriggerSyncRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<SyncAccepted>>)> {
    let request = SyncRequest::new(
        tenant_id,
        InitiatorId::from_optional(body.initiator_id),
    )
    .with_scope(body.scope_id);

    let sync_id = state.coordinator().execute(request).await?;
    info!(tenant_id = %tenant_id, sync_id = %sync_id, "sync accepted");

    let accepted = SyncAccepted {
        sync_id,
        status: "queued".to_string(),
        message: "Synchronization started; progress is published on the tenant event stream".to_string(),
    };
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(accepted))))
}

/// `GET /api/v1/syncs/{sync_id}`
pub async fn get_sync_handler(
    State(state): State<AppState>,
    Path(sync_id): Path<SyncId>,
) -> AppResult<Json<ApiResponse<SyncRunView>>> {
    let runs = state.runs();
    let run = runs
        .get(sync_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("sync run {sync_id}")))?;
    let outcomes = runs.outcomes(sync_id).await?;
    let totals = RunTotals::from_outcomes(outcomes.iter());

    Ok(Json(ApiResponse::success(SyncRunView {
        run,
        totals,
        outcomes,
    })))
}
