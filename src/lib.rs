//! Setupflow: gated, checkpointed workflow engine for finding trading setups.

pub mod analysis;
pub mod config;
pub mod core;
pub mod indicators;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod store;
pub mod workflow;
