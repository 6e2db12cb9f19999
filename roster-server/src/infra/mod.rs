pub mod app_state;
pub mod config;
pub mod connector;
pub mod errors;
pub mod startup;
