//! Rolling processing metrics and a bounded history of snapshots.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use crate::cache::CacheStats;

/// Outcome of one image, as seen by the metrics collector.
#[derive(Debug, Clone, Copy)]
pub struct ItemOutcome<'a> {
    pub success: bool,
    pub cache_hit: bool,
    pub elapsed: Duration,
    /// Error kind for failures
    pub error_kind: Option<&'a str>,
}

/// Point-in-time view of the processing counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub jobs: u64,
    /// Images seen
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    /// Images served from cache
    pub cache_hits: u64,
    pub failures_by_kind: BTreeMap<String, u64>,
    pub cache: CacheStats,
    /// Mean wall time per stage in milliseconds
    pub avg_stage_ms: BTreeMap<String, f64>,
    /// Mean end-to-end time of images that ran the pipeline
    pub avg_processing_ms: f64,
}

impl MetricsSnapshot {
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failures as f64 / self.total_requests as f64
        }
    }
}

#[derive(Default)]
struct Accumulator {
    jobs: u64,
    total_requests: u64,
    successes: u64,
    failures: u64,
    cache_hits: u64,
    failures_by_kind: BTreeMap<String, u64>,
    /// (total ms, samples)
    stage_totals: BTreeMap<String, (f64, u64)>,
    processing_total_ms: f64,
    processing_samples: u64,
}

impl Accumulator {
    fn snapshot(&self, cache: CacheStats) -> MetricsSnapshot {
        MetricsSnapshot {
            taken_at: Utc::now(),
            jobs: self.jobs,
            total_requests: self.total_requests,
            successes: self.successes,
            failures: self.failures,
            cache_hits: self.cache_hits,
            failures_by_kind: self.failures_by_kind.clone(),
            cache,
            avg_stage_ms: self
                .stage_totals
                .iter()
                .map(|(name, (total, n))| (name.clone(), total / (*n).max(1) as f64))
                .collect(),
            avg_processing_ms: if self.processing_samples == 0 {
                0.0
            } else {
                self.processing_total_ms / self.processing_samples as f64
            },
        }
    }
}

/// Collects per-item and per-stage figures; appends a snapshot per finished
/// job to a ring of `capacity` entries.
pub struct MetricsCollector {
    acc: Mutex<Accumulator>,
    history: Mutex<VecDeque<MetricsSnapshot>>,
    capacity: usize,
}

impl MetricsCollector {
    pub fn new(capacity: usize) -> Self {
        Self {
            acc: Mutex::new(Accumulator::default()),
            history: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
        }
    }

    pub fn record_stage(&self, stage: &str, elapsed: Duration) {
        let mut acc = self.acc.lock();
        let entry = acc.stage_totals.entry(stage.to_string()).or_default();
        entry.0 += elapsed.as_secs_f64() * 1000.0;
        entry.1 += 1;
    }

    pub fn record_item(&self, outcome: ItemOutcome<'_>) {
        let mut acc = self.acc.lock();
        acc.total_requests += 1;
        if outcome.success {
            acc.successes += 1;
        } else {
            acc.failures += 1;
            if let Some(kind) = outcome.error_kind {
                *acc.failures_by_kind.entry(kind.to_string()).or_default() += 1;
            }
        }
        if outcome.cache_hit {
            acc.cache_hits += 1;
        } else {
            acc.processing_total_ms += outcome.elapsed.as_secs_f64() * 1000.0;
            acc.processing_samples += 1;
        }
    }

    /// Count a finished job and append a snapshot to the history.
    pub fn record_job(&self, cache: CacheStats) -> MetricsSnapshot {
        let snapshot = {
            let mut acc = self.acc.lock();
            acc.jobs += 1;
            acc.snapshot(cache)
        };
        let mut history = self.history.lock();
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(snapshot.clone());
        snapshot
    }

    /// Current figures without touching the history.
    pub fn snapshot(&self, cache: CacheStats) -> MetricsSnapshot {
        self.acc.lock().snapshot(cache)
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<MetricsSnapshot> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<MetricsSnapshot> {
        self.history.lock().back().cloned()
    }
}
