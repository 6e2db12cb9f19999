use axum::{
    Router,
    routing::{get, post},
};

use crate::handlers::{aggregate, events, sync};
use crate::infra::app_state::AppState;

/// Create all v1 API routes
pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        .route(
            "/tenants/{tenant}/sync",
            post(sync::trigger_sync_handler),
        )
        .route(
            "/tenants/{tenant}/aggregate",
            post(aggregate::request_aggregate_handler),
        )
        .route(
            "/tenants/{tenant}/events",
            get(events::tenant_events_sse_handler),
        )
        .route("/syncs/{sync_id}", get(sync::get_sync_handler))
}
