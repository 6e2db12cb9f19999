use std::fmt;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{ProgressEvent, ProgressPublisher};
use crate::error::Result;

#[derive(Clone, Debug)]
pub struct ProgressMessage {
    pub channel: String,
    pub event: ProgressEvent,
}

/// In-process fan-out of progress events to local subscribers (the SSE
/// endpoint, tests). Publishing with no subscriber is not an error.
pub struct InProcProgressBus {
    sender: broadcast::Sender<ProgressMessage>,
    capacity: usize,
}

impl fmt::Debug for InProcProgressBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcProgressBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl InProcProgressBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressMessage> {
        self.sender.subscribe()
    }
}

impl Default for InProcProgressBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl ProgressPublisher for InProcProgressBus {
    async fn publish(&self, channel: &str, event: &ProgressEvent) -> Result<()> {
        let _ = self.sender.send(ProgressMessage {
            channel: channel.to_string(),
            event: event.clone(),
        });
        Ok(())
    }
}
