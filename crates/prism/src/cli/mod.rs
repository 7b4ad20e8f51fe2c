//! Command handlers.

pub mod cache;
pub mod config;
pub mod metrics;
pub mod process;
pub mod serve;
