use crate::types::{AggregateKey, TenantId};

/// Key layout. Keys for one `(tenant, consumer)` share the hash tag
/// `{tenant_consumer}` so the value and its lock land on the same cluster
/// slot.
#[derive(Debug, Clone, Copy)]
pub struct CacheKeys;

impl CacheKeys {
    pub fn aggregate_count(key: &AggregateKey) -> String {
        format!("aggregate_count:{{{}}}", key.scope())
    }

    pub fn aggregate_lock(key: &AggregateKey) -> String {
        format!("aggregate_count_lock:{{{}}}", key.scope())
    }

    pub fn run_lock(tenant_id: TenantId) -> String {
        format!("run_lock:{{{tenant_id}}}")
    }

    pub fn tenant_channel(tenant_id: TenantId) -> String {
        format!("tenant.{tenant_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConsumerId;
    use uuid::Uuid;

    #[test]
    fn aggregate_value_and_lock_share_a_hash_tag() {
        let tenant = TenantId(Uuid::from_u128(1));
        let key = AggregateKey::new(tenant, ConsumerId::new("c9"));
        let value = CacheKeys::aggregate_count(&key);
        let lock = CacheKeys::aggregate_lock(&key);

        let tag = format!("{{{tenant}_c9}}");
        assert!(value.ends_with(&tag));
        assert!(lock.ends_with(&tag));
        assert_ne!(value, lock);
    }

    #[test]
    fn blank_consumer_uses_default_segment() {
        let tenant = TenantId(Uuid::from_u128(1));
        let key = AggregateKey::new(tenant, ConsumerId::new(""));
        assert_eq!(
            CacheKeys::aggregate_count(&key),
            format!("aggregate_count:{{{tenant}_default}}")
        );
    }
}
