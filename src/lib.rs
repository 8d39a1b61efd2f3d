//! Custodial deposit watcher and balance sweeper for EVM networks.

pub mod api;
pub mod chain;
pub mod config;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod poller;
pub mod store;
pub mod sweeper;
pub mod watcher;

pub use api::{router, AppState};
