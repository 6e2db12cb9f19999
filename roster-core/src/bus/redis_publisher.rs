use std::fmt;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::debug;

use super::{ProgressEvent, ProgressPublisher};
use crate::error::{Result, SyncError};

/// Publishes the JSON envelope with Redis `PUBLISH`.
#[derive(Clone)]
pub struct RedisProgressPublisher {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisProgressPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisProgressPublisher")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisProgressPublisher {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ProgressPublisher for RedisProgressPublisher {
    async fn publish(&self, channel: &str, event: &ProgressEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.conn.clone();
        let receivers: u64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                SyncError::Cache(format!("Redis PUBLISH failed: {e}"))
            })?;
        debug!(channel, event = event.name(), receivers, "progress published");
        Ok(())
    }
}
