use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

use roster_core::queue::{JobKind, QueueService};

use crate::infra::app_state::AppState;

const QUEUE_KINDS: [JobKind; 4] = [
    JobKind::SyncStart,
    JobKind::SyncBatch,
    JobKind::SyncComplete,
    JobKind::AggregateCompute,
];

/// `GET /health`
pub async fn health_handler(
    State(state): State<AppState>,
) -> (StatusCode, Json<Value>) {
    let mut health = json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "checks": {}
    });
    let mut unhealthy = false;

    match &state.postgres {
        Some(repo) => match sqlx::query("SELECT 1").execute(repo.pool()).await {
            Ok(_) => {
                health["checks"]["database"] = json!({ "status": "healthy" });
            }
            Err(err) => {
                health["checks"]["database"] = json!({
                    "status": "unhealthy",
                    "error": err.to_string()
                });
                unhealthy = true;
            }
        },
        None => {
            health["checks"]["database"] = json!({ "status": "in_memory" });
        }
    }

    health["checks"]["cache"] = json!({
        "status": "healthy",
        "type": if state.cache_enabled { "redis" } else { "in_memory" }
    });

    match state.queue.snapshot().await {
        Ok(snapshot) => {
            let mut queues = serde_json::Map::new();
            for kind in QUEUE_KINDS {
                let entry = snapshot.entry(kind);
                queues.insert(
                    kind.as_str().to_string(),
                    json!({
                        "ready": entry.ready,
                        "blocked": entry.blocked,
                        "leased": entry.leased,
                        "dead_letter": entry.dead_letter,
                    }),
                );
            }
            health["checks"]["queue"] = Value::Object(queues);
        }
        Err(err) => {
            health["checks"]["queue"] = json!({
                "status": "unhealthy",
                "error": err.to_string()
            });
            unhealthy = true;
        }
    }

    if unhealthy {
        health["status"] = json!("unhealthy");
        (StatusCode::SERVICE_UNAVAILABLE, Json(health))
    } else {
        (StatusCode::OK, Json(health))
    }
}
