use std::{fmt, sync::Arc};

use roster_core::{
    SyncEngine,
    aggregate::AggregateService,
    bus::InProcProgressBus,
    pipeline::SyncCoordinator,
    queue::InMemoryJobQueue,
    store::{PostgresSyncRunRepository, SyncRunRepository},
};

use super::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<SyncEngine<InMemoryJobQueue>>,
    pub queue: Arc<InMemoryJobQueue>,
    /// Local fan-out feeding the SSE endpoint.
    pub bus: Arc<InProcProgressBus>,
    pub postgres: Option<Arc<PostgresSyncRunRepository>>,
    pub cache_enabled: bool,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("postgres", &self.postgres.is_some())
            .field("cache_enabled", &self.cache_enabled)
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        self.engine.coordinator()
    }

    pub fn aggregates(&self) -> &AggregateService {
        self.engine.aggregates()
    }

    pub fn runs(&self) -> Arc<dyn SyncRunRepository> {
        self.engine.runs()
    }
}
