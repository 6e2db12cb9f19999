use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{ConsumerId, InitiatorId, TenantId};

/// Scope of one aggregate value and its lock: `(tenant, consumer)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateKey {
    pub tenant_id: TenantId,
    pub consumer_id: ConsumerId,
}

impl AggregateKey {
    pub fn new(tenant_id: TenantId, consumer_id: ConsumerId) -> Self {
        Self {
            tenant_id,
            consumer_id,
        }
    }

    /// `{tenant}_{consumer}` with a blank consumer rendered as `default`.
    pub fn scope(&self) -> String {
        format!("{}_{}", self.tenant_id, self.consumer_id.key_segment())
    }
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scope())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub tenant_id: TenantId,
    pub consumer_id: ConsumerId,
    pub initiator_id: InitiatorId,
    pub value: u64,
    pub computed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregateFailure {
    pub tenant_id: TenantId,
    pub consumer_id: ConsumerId,
    pub initiator_id: InitiatorId,
    pub error_message: String,
    pub computed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn scope_joins_tenant_and_consumer() {
        let tenant = TenantId(Uuid::from_u128(7));
        let key = AggregateKey::new(tenant, ConsumerId::new("acme"));
        assert_eq!(key.scope(), format!("{}_acme", tenant));

        let blank = AggregateKey::new(tenant, ConsumerId::new(""));
        assert_eq!(blank.scope(), format!("{}_default", tenant));
    }
}
