use std::{convert::Infallible, time::Duration};

use axum::{
    extract::{Path, State},
    response::{
        Sse,
        sse::{Event, KeepAlive},
    },
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use roster_core::{
    bus::ProgressEvent, cache::CacheKeys, types::TenantId,
};

use crate::infra::app_state::AppState;

/// `GET /api/v1/tenants/{tenant}/events`
///
/// Live progress for one tenant. Events published before the client
/// connected are not replayed.
pub async fn tenant_events_sse_handler(
    State(state): State<AppState>,
    Path(tenant_id): Path<TenantId>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let channel = CacheKeys::tenant_channel(tenant_id);
    let mut receiver = state.bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            match receiver.recv().await {
                Ok(message) if message.channel == channel => {
                    if let Some(event) = progress_to_sse(&message.event) {
                        yield Ok::<Event, Infallible>(event);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(channel = %channel, skipped, "event stream lagged");
                }
                Err(RecvError::Closed) => {
                    debug!(channel = %channel, "progress bus closed");
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(default_keep_alive())
}

fn progress_to_sse(event: &ProgressEvent) -> Option<Event> {
    match Event::default()
        .event(event.name())
        .id(event.event_id.to_string())
        .json_data(event)
    {
        Ok(sse) => Some(sse),
        Err(err) => {
            warn!(event = event.name(), error = %err, "event not encodable");
            None
        }
    }
}

fn default_keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("keep-alive")
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core::bus::ProgressPayload;
    use roster_core::types::{BatchOutcome, SyncId};

    #[test]
    fn progress_events_encode_as_named_sse_events() {
        let event = ProgressEvent::new(
            TenantId::new(),
            ProgressPayload::BatchProcessed(BatchOutcome::new(SyncId::new(), 1)),
        );
        assert!(progress_to_sse(&event).is_some());
    }
}
