//! Worker pools that lease jobs from the queue and route them to the
//! pipeline handlers.

pub mod dispatcher;
pub mod worker;

pub use dispatcher::{DispatchStatus, JobDispatcher, RosterDispatcher};
pub use worker::{WorkerRuntime, process_lease};
