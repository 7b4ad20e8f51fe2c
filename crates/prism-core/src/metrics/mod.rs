//! Processing metrics and the recommendation engine built on them.

pub mod collector;
pub mod recommend;

pub use collector::{ItemOutcome, MetricsCollector, MetricsSnapshot};
pub use recommend::{Priority, Recommendation, RecommendationEngine};
