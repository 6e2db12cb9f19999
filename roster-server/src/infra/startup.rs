use std::{sync::Arc, time::Duration};

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use roster_core::{
    SyncEngine,
    bus::{
        FanoutPublisher, InProcProgressBus, ProgressPublisher,
        RedisProgressPublisher,
    },
    cache::{CacheBackend, InMemoryCache, RedisCache},
    queue::InMemoryJobQueue,
    store::{
        InMemorySyncRunRepository, PostgresSyncRunRepository,
        SyncRunRepository,
    },
};

use super::{app_state::AppState, config::Config, connector};

/// Storage and transport handles chosen from configuration.
pub struct Backends {
    pub runs: Arc<dyn SyncRunRepository>,
    pub postgres: Option<Arc<PostgresSyncRunRepository>>,
    pub cache: Arc<dyn CacheBackend>,
    pub redis: Option<RedisCache>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("postgres", &self.postgres.is_some())
            .field("redis", &self.redis.is_some())
            .finish_non_exhaustive()
    }
}

impl Backends {
    /// Everything in process memory.
    pub fn in_memory() -> Self {
        Self {
            runs: Arc::new(InMemorySyncRunRepository::new()),
            postgres: None,
            cache: Arc::new(InMemoryCache::new()),
            redis: None,
        }
    }

    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let mut backends = Self::in_memory();

        if let Some(url) = &config.database.url {
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .acquire_timeout(Duration::from_secs(30))
                .connect(url)
                .await
                .context("failed to connect to PostgreSQL")?;
            let repo = Arc::new(PostgresSyncRunRepository::new(pool).await?);
            repo.migrate().await.context("run store migration failed")?;
            info!("sync runs persisted in PostgreSQL");
            backends.runs = repo.clone();
            backends.postgres = Some(repo);
        }

        if let Some(redis) = &config.redis {
            let cache = RedisCache::new(&redis.url)
                .await
                .context("failed to connect to Redis")?;
            backends.cache = Arc::new(cache.clone());
            backends.redis = Some(cache);
        }

        Ok(backends)
    }
}

/// Wires the engine and returns the shared handler state. Workers are not
/// started here.
pub fn assemble(config: Arc<Config>, backends: Backends) -> AppState {
    let bus = Arc::new(InProcProgressBus::default());
    let publisher: Arc<dyn ProgressPublisher> = match &backends.redis {
        Some(redis) => {
            let remote: Arc<dyn ProgressPublisher> =
                Arc::new(RedisProgressPublisher::new(redis.connection()));
            let local: Arc<dyn ProgressPublisher> = bus.clone();
            Arc::new(FanoutPublisher::new(vec![local, remote]))
        }
        None => bus.clone() as Arc<dyn ProgressPublisher>,
    };

    let (collaborators, _store) = connector::collaborators(&config.connector);
    let queue = Arc::new(InMemoryJobQueue::new(config.pipeline.retry));
    let engine = SyncEngine::new(
        config.pipeline.clone(),
        Arc::clone(&queue),
        backends.runs,
        backends.cache,
        publisher,
        collaborators,
    );

    AppState {
        config,
        engine: Arc::new(engine),
        queue,
        bus,
        postgres: backends.postgres,
        cache_enabled: backends.redis.is_some(),
    }
}
