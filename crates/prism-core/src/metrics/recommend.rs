//! Turns a metrics snapshot into prioritized tuning advice.
//!
//! Advice is read-only. Nothing here changes configuration.

use serde::{Deserialize, Serialize};

use super::collector::MetricsSnapshot;
use crate::config::MetricsConfig;


#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub priority: Priority,
    pub category: String,
    pub title: String,
    pub description: String,
    pub action: String,
}

impl Recommendation {
    fn new(
        priority: Priority,
        category: &str,
        title: &str,
        description: String,
        action: &str,
    ) -> Self {
        Self {
            priority,
            category: category.to_string(),
            title: title.to_string(),
            description,
            action: action.to_string(),
        }
    }
}

pub struct RecommendationEngine {
    config: MetricsConfig,
}

impl RecommendationEngine {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Findings sorted from high to low priority. Never empty.
    pub fn analyze(&self, snapshot: &MetricsSnapshot) -> Vec<Recommendation> {
        let mut out = Vec::new();
        self.check_hit_rate(snapshot, &mut out);
        self.check_evictions(snapshot, &mut out);
        self.check_shared_tier(snapshot, &mut out);
        self.check_failures(snapshot, &mut out);
        self.check_latency(snapshot, &mut out);
        self.check_dominant_stage(snapshot, &mut out);

        if out.is_empty() {
            out.push(Recommendation::new(
                Priority::Low,
                "general",
                "System healthy",
                "No metric crossed a configured threshold.".to_string(),
                "No action needed",
            ));
        }
        // Stable sort keeps rule order within a priority
        out.sort_by_key(|r| r.priority);
        out
    }

    fn check_hit_rate(&self, s: &MetricsSnapshot, out: &mut Vec<Recommendation>) {
        if s.cache.lookups() < self.config.min_samples {
            return;
        }
        let rate = s.cache.hit_rate;
        if rate >= self.config.hit_rate_threshold {
            return;
        }
        let priority = if rate < self.config.hit_rate_threshold / 2.0 {
            Priority::High
        } else {
            Priority::Medium
        };
        out.push(Recommendation::new(
            priority,
            "cache",
            "Low cache hit rate",
            format!(
                "Hit rate is {:.1}% over {} lookups (threshold {:.1}%).",
                rate * 100.0,
                s.cache.lookups(),
                self.config.hit_rate_threshold * 100.0
            ),
            "Standardize on presets so repeated requests share cache keys",
        ));
    }

    fn check_evictions(&self, s: &MetricsSnapshot, out: &mut Vec<Recommendation>) {
        if s.cache.puts == 0 {
            return;
        }
        let ratio = s.cache.evictions as f64 / s.cache.puts as f64;
        if ratio <= self.config.eviction_ratio_threshold {
            return;
        }
        out.push(Recommendation::new(
            Priority::Medium,
            "cache",
            "Local cache churning",
            format!(
                "{} evictions for {} insertions ({:.2} per insertion).",
                s.cache.evictions, s.cache.puts, ratio
            ),
            "Raise cache.local_max_entries or cache.local_max_mb",
        ));
    }

    fn check_shared_tier(&self, s: &MetricsSnapshot, out: &mut Vec<Recommendation>) {
        if s.cache.shared_errors == 0 {
            return;
        }
        out.push(Recommendation::new(
            Priority::High,
            "cache",
            "Shared cache tier failing",
            format!(
                "{} shared tier operations failed and fell back to processing.",
                s.cache.shared_errors
            ),
            "Check permissions and free space of the shared cache directory",
        ));
    }

    fn check_failures(&self, s: &MetricsSnapshot, out: &mut Vec<Recommendation>) {
        let rate = s.failure_rate();
        if s.total_requests == 0 || rate <= self.config.failure_rate_threshold {
            return;
        }
        let top = s
            .failures_by_kind
            .iter()
            .max_by_key(|(_, n)| **n)
            .map(|(kind, n)| format!(" Most common: {kind} ({n})."))
            .unwrap_or_default();
        out.push(Recommendation::new(
            Priority::High,
            "reliability",
            "High failure rate",
            format!(
                "{} of {} images failed ({:.1}%).{top}",
                s.failures,
                s.total_requests,
                rate * 100.0
            ),
            "Inspect failed items and validate inputs before submission",
        ));
    }

    fn check_latency(&self, s: &MetricsSnapshot, out: &mut Vec<Recommendation>) {
        if s.avg_processing_ms <= self.config.slow_item_ms {
            return;
        }
        out.push(Recommendation::new(
            Priority::Medium,
            "performance",
            "Slow image processing",
            format!(
                "Images take {:.0}ms on average (threshold {:.0}ms).",
                s.avg_processing_ms, self.config.slow_item_ms
            ),
            "Lower output dimensions or raise processing.global_workers",
        ));
    }

    /// Needs enough pipeline runs, a clear majority of stage time, and a
    /// stage slow enough to matter.
    fn check_dominant_stage(&self, s: &MetricsSnapshot, out: &mut Vec<Recommendation>) {
        let processed = s.total_requests.saturating_sub(s.cache_hits);
        if processed < self.config.min_samples {
            return;
        }
        let total: f64 = s.avg_stage_ms.values().sum();
        if total <= 0.0 {
            return;
        }
        let Some((stage, ms)) = s
            .avg_stage_ms
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
        else {
            return;
        };
        let share = ms / total;
        if share <= self.config.dominant_stage_share || *ms < self.config.dominant_stage_min_ms {
            return;
        }
        out.push(Recommendation::new(
            Priority::Low,
            "performance",
            "Dominant pipeline stage",
            format!(
                "The {stage} stage accounts for {:.0}% of stage time.",
                share * 100.0
            ),
            "Profile this stage first when tuning throughput",
        ));
    }
}
