//! Batch jobs: the data model and the coordinator that drives it.

pub mod coordinator;
pub mod types;

pub use coordinator::{Coordinator, CoordinatorParts};
pub use types::*;
