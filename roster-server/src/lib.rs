//! # Roster Server
//!
//! HTTP surface for roster synchronization: triggers sync runs and
//! aggregate computations, serves run status, and streams per-tenant
//! progress over server-sent events.

pub mod api;
pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
