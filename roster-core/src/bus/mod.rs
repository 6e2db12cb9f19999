//! Fire-and-forget progress notifications. Delivery is at-most-once; the
//! run store is the source of truth for status.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::cache::CacheKeys;
use crate::error::Result;

pub mod events;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_publisher;

pub use events::{
    CompletionKind, ProgressEvent, ProgressPayload, Severity, SyncCompleted,
    SyncStarted,
};
pub use memory::{InProcProgressBus, ProgressMessage};
#[cfg(feature = "redis")]
pub use redis_publisher::RedisProgressPublisher;

#[async_trait]
pub trait ProgressPublisher: Send + Sync {
    async fn publish(&self, channel: &str, event: &ProgressEvent) -> Result<()>;
}

/// Publishes on the tenant channel and swallows transport errors; progress
/// reporting never decides the outcome of a job.
pub async fn announce(publisher: &dyn ProgressPublisher, event: ProgressEvent) {
    let channel = CacheKeys::tenant_channel(event.tenant_id);
    if let Err(err) = publisher.publish(&channel, &event).await {
        warn!(
            channel = %channel,
            event = event.name(),
            error = %err,
            "progress event dropped"
        );
    }
}

/// Sends every event to each inner publisher in order.
#[derive(Clone, Default)]
pub struct FanoutPublisher {
    targets: Vec<Arc<dyn ProgressPublisher>>,
}

impl fmt::Debug for FanoutPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanoutPublisher")
            .field("targets", &self.targets.len())
            .finish()
    }
}

impl FanoutPublisher {
    pub fn new(targets: Vec<Arc<dyn ProgressPublisher>>) -> Self {
        Self { targets }
    }
}

#[async_trait]
impl ProgressPublisher for FanoutPublisher {
    async fn publish(&self, channel: &str, event: &ProgressEvent) -> Result<()> {
        let mut first_error = None;
        for target in &self.targets {
            if let Err(err) = target.publish(channel, event).await {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
