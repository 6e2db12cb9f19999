//! # Roster Core
//!
//! Batched synchronization of an external roster into tenants, plus a
//! lock-guarded aggregate computation that runs at most once per
//! `(tenant, consumer)` at a time.
//!
//! ## Overview
//!
//! - **Sync pipeline**: [`pipeline::SyncCoordinator`] fetches every record
//!   for a tenant, cuts it into batches and queues the ordered chain
//!   `[start, batch 1..n, complete]`. Each link only becomes runnable once
//!   the previous one finished.
//! - **Run state**: [`store::SyncRunRepository`] keeps every run and its
//!   per-batch outcomes (in memory or in Postgres).
//! - **Progress**: [`bus::ProgressPublisher`] fans events out per tenant;
//!   delivery is best effort.
//! - **Aggregate**: [`aggregate::AggregateService`] takes the
//!   [`lock::AggregateLock`] and queues the job that computes, caches,
//!   announces and releases.
//! - **Reconciliation**: [`pipeline::StallWatchdog`] fails runs whose chain
//!   stopped moving.
//!
//! ## Feature Flags
//!
//! - `postgres`: sqlx-backed run store and embedded migrations
//! - `redis`: Redis cache backend and pub/sub publisher

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod aggregate;
pub mod bus;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod lock;
pub mod pipeline;
pub mod ports;
pub mod queue;
pub mod runtime;
pub mod store;
pub mod types;

pub use config::PipelineConfig;
pub use engine::SyncEngine;
pub use error::{Result, SyncError};

/// Migrations for the Postgres run store.
#[cfg(feature = "postgres")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
