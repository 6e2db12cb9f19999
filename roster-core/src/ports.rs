//! Boundaries to the systems the pipeline drives but does not own: the
//! connector that fetches and applies records, the identity service, the
//! aggregate query and the local entity store.

use async_trait::async_trait;
use thiserror::Error;

use crate::error::Result;
use crate::types::{ConsumerId, RawRecord, TenantId};

/// Source of the complete, ordered record set for a tenant.
#[async_trait]
pub trait RecordFetcher: Send + Sync {
    async fn fetch_all_records(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<RawRecord>>;
}

/// Failure reported by [`Syncer::apply`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApplyError {
    /// Expected, record-scoped failure (validation, missing reference...).
    /// Counted against the record; the batch keeps going.
    #[error("{0}")]
    Record(String),
    /// The collaborator itself is unusable. Aborts the batch attempt so the
    /// queue can retry it.
    #[error("{0}")]
    Fatal(String),
}

/// Applies one record to local storage. Idempotence is the implementor's
/// responsibility.
#[async_trait]
pub trait Syncer: Send + Sync {
    /// `Ok(true)` when applied, `Ok(false)` when rejected.
    async fn apply(
        &self,
        record: &RawRecord,
        tenant_id: TenantId,
    ) -> std::result::Result<bool, ApplyError>;
}

#[async_trait]
pub trait ConsumerIdentityResolver: Send + Sync {
    async fn resolve_consumer_id(
        &self,
        tenant_id: TenantId,
    ) -> Result<ConsumerId>;
}

/// The slow aggregate query guarded by the aggregate lock.
#[async_trait]
pub trait AggregateSource: Send + Sync {
    async fn compute(
        &self,
        tenant_id: TenantId,
        consumer_id: &ConsumerId,
    ) -> Result<u64>;
}

/// Marks locally cached entities of a tenant as stale.
#[async_trait]
pub trait EntityFreshness: Send + Sync {
    /// Returns how many entities were touched.
    async fn bump_tenant_entities(&self, tenant_id: TenantId) -> Result<u64>;
}

/// Freshness port for deployments without a local entity cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFreshness;

#[async_trait]
impl EntityFreshness for NoopFreshness {
    async fn bump_tenant_entities(&self, _tenant_id: TenantId) -> Result<u64> {
        Ok(0)
    }
}
