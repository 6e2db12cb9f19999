//! File-backed stand-ins for the external HR connector.
//!
//! Each tenant's roster is a JSON array at `{roster_dir}/{tenant}.json`.
//! Applied records land in an in-process store keyed by tenant and external
//! id; the aggregate is the number of records held for the tenant.

use std::{fmt, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info};

use roster_core::{
    Result, SyncError,
    pipeline::Collaborators,
    ports::{
        AggregateSource, ApplyError, ConsumerIdentityResolver,
        EntityFreshness, RecordFetcher, Syncer,
    },
    types::{ConsumerId, RawRecord, TenantId},
};

use super::config::ConnectorConfig;

/// Builds the collaborator set the engine needs from one connector config.
pub fn collaborators(config: &ConnectorConfig) -> (Collaborators, Arc<LocalRosterStore>) {
    let store = Arc::new(LocalRosterStore::default());
    let collaborators = Collaborators {
        fetcher: Arc::new(JsonDirectoryFetcher::new(config.roster_dir.clone())),
        syncer: store.clone(),
        identity: Arc::new(StaticIdentity::new(config.consumer_id.clone())),
        aggregate_source: store.clone(),
        freshness: store.clone(),
    };
    (collaborators, store)
}

#[derive(Debug, Clone)]
pub struct JsonDirectoryFetcher {
    root: PathBuf,
}

impl JsonDirectoryFetcher {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn roster_path(&self, tenant_id: TenantId) -> PathBuf {
        self.root.join(format!("{tenant_id}.json"))
    }
}

#[async_trait]
impl RecordFetcher for JsonDirectoryFetcher {
    async fn fetch_all_records(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<RawRecord>> {
        let path = self.roster_path(tenant_id);
        let raw = tokio::fs::read_to_string(&path).await.map_err(|err| {
            SyncError::Collaborator(format!(
                "roster for tenant {tenant_id} unreadable at {}: {err}",
                path.display()
            ))
        })?;
        let records: Vec<Value> = serde_json::from_str(&raw).map_err(|err| {
            SyncError::Collaborator(format!(
                "roster for tenant {tenant_id} is not a JSON array: {err}"
            ))
        })?;
        debug!(tenant_id = %tenant_id, records = records.len(), "roster fetched");
        Ok(records.into_iter().map(RawRecord::new).collect())
    }
}

/// Applied records per tenant, keyed by external id.
#[derive(Default)]
pub struct LocalRosterStore {
    tenants: DashMap<TenantId, DashMap<String, Value>>,
}

impl fmt::Debug for LocalRosterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalRosterStore")
            .field("tenants", &self.tenants.len())
            .finish()
    }
}

impl LocalRosterStore {
    pub fn count(&self, tenant_id: TenantId) -> u64 {
        self.tenants
            .get(&tenant_id)
            .map(|entries| entries.len() as u64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Syncer for LocalRosterStore {
    async fn apply(
        &self,
        record: &RawRecord,
        tenant_id: TenantId,
    ) -> std::result::Result<bool, ApplyError> {
        if !record.as_value().is_object() {
            return Err(ApplyError::Record("record is not an object".into()));
        }
        let Some(external_id) = record.external_id() else {
            return Ok(false);
        };
        self.tenants
            .entry(tenant_id)
            .or_default()
            .insert(external_id, record.as_value().clone());
        Ok(true)
    }
}

#[async_trait]
impl AggregateSource for LocalRosterStore {
    async fn compute(
        &self,
        tenant_id: TenantId,
        _consumer_id: &ConsumerId,
    ) -> Result<u64> {
        Ok(self.count(tenant_id))
    }
}

#[async_trait]
impl EntityFreshness for LocalRosterStore {
    async fn bump_tenant_entities(&self, tenant_id: TenantId) -> Result<u64> {
        let touched = self.count(tenant_id);
        info!(tenant_id = %tenant_id, touched, "local roster marked fresh");
        Ok(touched)
    }
}

/// Every tenant reports the same configured consumer.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    consumer_id: ConsumerId,
}

impl StaticIdentity {
    pub fn new(consumer_id: impl Into<String>) -> Self {
        Self {
            consumer_id: ConsumerId::new(consumer_id),
        }
    }
}

#[async_trait]
impl ConsumerIdentityResolver for StaticIdentity {
    async fn resolve_consumer_id(
        &self,
        _tenant_id: TenantId,
    ) -> Result<ConsumerId> {
        Ok(self.consumer_id.clone())
    }
}
