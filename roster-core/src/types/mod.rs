pub mod aggregate;
pub mod ids;
pub mod record;
pub mod run;

pub use aggregate::{AggregateFailure, AggregateKey, AggregateResult};
pub use ids::{ConsumerId, InitiatorId, SyncId, TenantId};
pub use record::RawRecord;
pub use run::{BatchOutcome, FailedRecord, RunTotals, SyncRun, SyncStatus};
