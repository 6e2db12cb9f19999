use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use tracing::error;

use roster_core::SyncError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::NotFound(msg) => Self::not_found(msg),
            SyncError::Conflict(msg) | SyncError::InvalidState(msg) => {
                Self::conflict(msg)
            }
            SyncError::Collaborator(msg) => Self::bad_gateway(msg),
            SyncError::Timeout(msg) => {
                Self::new(StatusCode::GATEWAY_TIMEOUT, msg)
            }
            SyncError::Cache(msg) | SyncError::Database(msg) => {
                error!(error = %msg, "backing store failure");
                Self::unavailable(msg)
            }
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_errors_map_to_http_statuses() {
        let cases = [
            (SyncError::NotFound("run".into()), StatusCode::NOT_FOUND),
            (SyncError::Conflict("busy".into()), StatusCode::CONFLICT),
            (SyncError::InvalidState("done".into()), StatusCode::CONFLICT),
            (SyncError::Collaborator("down".into()), StatusCode::BAD_GATEWAY),
            (SyncError::Timeout("slow".into()), StatusCode::GATEWAY_TIMEOUT),
            (SyncError::Cache("gone".into()), StatusCode::SERVICE_UNAVAILABLE),
            (
                SyncError::Internal("bug".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn conflict_message_is_kept() {
        let err = AppError::from(SyncError::Conflict("run active".into()));
        assert_eq!(err.to_string(), "run active");
    }
}
