use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;

use roster_core::{aggregate::AggregateRequestOutcome, types::TenantId};

use crate::api::ApiResponse;
use crate::infra::{app_state::AppState, errors::AppResult};

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct AggregateTriggerRequest {
    pub initiator_id: Option<String>,
}

/// `POST /api/v1/tenants/{tenant}/aggregate`
///
/// `200` with the cached value, `202` when a computation was queued or is
/// already running.
pub async fn request_aggregate_handler(
    State(state): State<AppState>,
    Path(tenant_id): Path<TenantId>,
    Json(body): Json<AggregateTriggerRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<AggregateRequestOutcome>>)> {
    let outcome = state
        .aggregates()
        .request(tenant_id, body.initiator_id)
        .await?;

    let status = match outcome {
        AggregateRequestOutcome::Cached { .. } => StatusCode::OK,
        AggregateRequestOutcome::Queued { .. }
        | AggregateRequestOutcome::AlreadyRunning => StatusCode::ACCEPTED,
    };
    Ok((status, Json(ApiResponse::success(outcome))))
}
