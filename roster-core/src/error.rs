use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for SyncError {
    fn from(err: redis::RedisError) -> Self {
        SyncError::Cache(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => {
                SyncError::NotFound("row not found".into())
            }
            other => SyncError::Database(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
