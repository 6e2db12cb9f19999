//! Expensive per-`(tenant, consumer)` aggregate, computed at most once at a
//! time behind [`crate::lock::AggregateLock`].

pub mod job;
pub mod service;

pub use job::LockedAggregateJob;
pub use service::{AggregateRequestOutcome, AggregateService};
