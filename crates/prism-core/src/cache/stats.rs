//! Cache counters and reporting types.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use super::tier::TierStats;

/// Monotonic counters. Only `reset` ever lowers them.
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub local_hits: AtomicU64,
    pub local_misses: AtomicU64,
    pub shared_hits: AtomicU64,
    pub shared_misses: AtomicU64,
    pub shared_errors: AtomicU64,
    pub puts: AtomicU64,
    pub stale: AtomicU64,
}

impl CacheCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.local_hits,
            &self.local_misses,
            &self.shared_hits,
            &self.shared_misses,
            &self.shared_errors,
            &self.puts,
            &self.stale,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time view of cache effectiveness.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Lookups served by any tier
    pub hits: u64,
    /// Lookups that missed every tier
    pub misses: u64,
    pub hit_rate: f64,
    pub local_hits: u64,
    pub local_misses: u64,
    pub shared_hits: u64,
    pub shared_misses: u64,
    /// Shared tier failures, each treated as a miss
    pub shared_errors: u64,
    pub puts: u64,
    /// Hits dropped because their artifacts were gone from the store
    pub stale: u64,
    /// Local tier evictions
    pub evictions: u64,
    pub local: Option<TierStats>,
    pub shared: Option<TierStats>,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }
}

pub(crate) fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Outcome of a clear request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearReport {
    pub scope: Option<String>,
    pub local_removed: u64,
    pub shared_removed: u64,
}

impl ClearReport {
    pub fn total(&self) -> u64 {
        self.local_removed + self.shared_removed
    }
}
