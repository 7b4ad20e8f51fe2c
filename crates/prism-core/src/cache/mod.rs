//! Two-tier content-addressed cache of transform results.
//!
//! The service probes the local tier, then the shared tier, and promotes
//! shared hits into the local tier. Either tier may be absent. Shared tier
//! failures are logged and read as misses, so the cache can only ever make
//! a batch faster, never fail it.

pub mod disk;
pub mod memory;
pub mod stats;
pub mod tier;

use std::sync::atomic::Ordering;
use std::sync::Arc;

pub use disk::DiskTier;
pub use memory::MemoryTier;
pub use stats::{CacheStats, ClearReport};
pub use tier::{CacheEntry, CacheKey, CacheTier, TierKind, TierStats, CACHE_NAMESPACE};

use crate::config::Config;
use crate::store::{ArtifactRef, ArtifactStore};
use crate::transform::TransformDescriptor;
use stats::{hit_rate, CacheCounters};

/// Cache front used by the coordinator.
pub struct CacheService {
    local: Option<Arc<dyn CacheTier>>,
    shared: Option<Arc<dyn CacheTier>>,
    store: Option<Arc<dyn ArtifactStore>>,
    counters: CacheCounters,
}

impl CacheService {
    pub fn new(local: Option<Arc<dyn CacheTier>>, shared: Option<Arc<dyn CacheTier>>) -> Self {
        Self {
            local,
            shared,
            store: None,
            counters: CacheCounters::default(),
        }
    }

    /// Build tiers as enabled in `[cache]`.
    pub fn from_config(config: &Config) -> Self {
        let local = config
            .cache
            .local_enabled
            .then(|| Arc::new(MemoryTier::from_config(&config.cache)) as Arc<dyn CacheTier>);
        let shared = config
            .cache
            .shared_enabled
            .then(|| Arc::new(DiskTier::new(config.shared_cache_dir())) as Arc<dyn CacheTier>);
        Self::new(local, shared)
    }

    /// Verify on every hit that the entry's artifacts still exist in `store`.
    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Look up the result of applying `descriptor` to the source with
    /// `source_hash`.
    pub async fn get(
        &self,
        source_hash: &str,
        descriptor: &TransformDescriptor,
    ) -> Option<CacheEntry> {
        self.get_key(&CacheKey::for_descriptor(source_hash, descriptor))
            .await
    }

    pub async fn get_key(&self, key: &CacheKey) -> Option<CacheEntry> {
        if let Some(local) = &self.local {
            match local.get(key).await {
                Ok(Some(entry)) if self.is_live(&entry).await => {
                    CacheCounters::incr(&self.counters.local_hits);
                    CacheCounters::incr(&self.counters.hits);
                    tracing::trace!(key = %key, "Local cache hit");
                    return Some(entry);
                }
                Ok(Some(_)) => {
                    CacheCounters::incr(&self.counters.stale);
                    CacheCounters::incr(&self.counters.local_misses);
                    if let Err(e) = local.evict(key).await {
                        tracing::warn!(key = %key, error = %e, "Stale local entry could not be evicted");
                    }
                }
                Ok(None) => CacheCounters::incr(&self.counters.local_misses),
                Err(e) => {
                    CacheCounters::incr(&self.counters.local_misses);
                    tracing::warn!(key = %key, error = %e, "Local cache lookup failed");
                }
            }
        }

        if let Some(shared) = &self.shared {
            match shared.get(key).await {
                Ok(Some(entry)) if self.is_live(&entry).await => {
                    CacheCounters::incr(&self.counters.shared_hits);
                    CacheCounters::incr(&self.counters.hits);
                    tracing::trace!(key = %key, "Shared cache hit");
                    if let Some(local) = &self.local {
                        if let Err(e) = local.put(entry.clone()).await {
                            tracing::warn!(key = %key, error = %e, "Promotion to local tier failed");
                        }
                    }
                    return Some(entry);
                }
                Ok(Some(_)) => {
                    CacheCounters::incr(&self.counters.stale);
                    CacheCounters::incr(&self.counters.shared_misses);
                    if let Err(e) = shared.evict(key).await {
                        CacheCounters::incr(&self.counters.shared_errors);
                        tracing::warn!(key = %key, error = %e, "CacheUnavailable: stale shared entry could not be evicted");
                    }
                }
                Ok(None) => CacheCounters::incr(&self.counters.shared_misses),
                Err(e) => {
                    CacheCounters::incr(&self.counters.shared_errors);
                    CacheCounters::incr(&self.counters.shared_misses);
                    tracing::warn!(key = %key, error = %e, "CacheUnavailable: shared tier lookup failed");
                }
            }
        }

        CacheCounters::incr(&self.counters.misses);
        None
    }

    /// Record a transform result in both tiers. Never fails; the shared write
    /// is best effort.
    pub async fn put(
        &self,
        source_hash: &str,
        descriptor: &TransformDescriptor,
        artifacts: Vec<ArtifactRef>,
    ) -> CacheEntry {
        let entry = CacheEntry::new(CacheKey::for_descriptor(source_hash, descriptor), artifacts);
        self.put_entry(entry.clone()).await;
        entry
    }

    async fn put_entry(&self, entry: CacheEntry) {
        CacheCounters::incr(&self.counters.puts);
        if let Some(local) = &self.local {
            match local.put(entry.clone()).await {
                Ok(evicted) if evicted > 0 => {
                    tracing::debug!(key = %entry.key, evicted, "Local tier evicted entries");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(key = %entry.key, error = %e, "Local cache write failed"),
            }
        }
        if let Some(shared) = &self.shared {
            if let Err(e) = shared.put(entry.clone()).await {
                CacheCounters::incr(&self.counters.shared_errors);
                tracing::warn!(key = %entry.key, error = %e, "CacheUnavailable: shared tier write failed");
            }
        }
    }

    async fn is_live(&self, entry: &CacheEntry) -> bool {
        let Some(store) = &self.store else {
            return true;
        };
        for artifact in &entry.artifacts {
            if !matches!(store.exists(&artifact.uri).await, Ok(true)) {
                tracing::debug!(key = %entry.key, uri = %artifact.uri, "Cached artifact missing from store");
                return false;
            }
        }
        true
    }

    pub async fn stats(&self) -> CacheStats {
        let load = |c: &std::sync::atomic::AtomicU64| c.load(Ordering::Relaxed);
        let local = match &self.local {
            Some(tier) => tier.stats().await.ok(),
            None => None,
        };
        let shared = match &self.shared {
            Some(tier) => match tier.stats().await {
                Ok(stats) => Some(stats),
                Err(e) => {
                    tracing::warn!(error = %e, "Shared tier stats unavailable");
                    None
                }
            },
            None => None,
        };
        let hits = load(&self.counters.hits);
        let misses = load(&self.counters.misses);
        CacheStats {
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            local_hits: load(&self.counters.local_hits),
            local_misses: load(&self.counters.local_misses),
            shared_hits: load(&self.counters.shared_hits),
            shared_misses: load(&self.counters.shared_misses),
            shared_errors: load(&self.counters.shared_errors),
            puts: load(&self.counters.puts),
            stale: load(&self.counters.stale),
            evictions: local.map(|s| s.evictions).unwrap_or(0),
            local,
            shared,
        }
    }

    /// Zero the hit/miss counters. Tier contents are untouched.
    pub fn reset_stats(&self) {
        self.counters.reset();
    }

    /// Remove entries under `scope` (a key prefix) from both tiers.
    pub async fn clear(&self, scope: Option<&str>) -> ClearReport {
        let mut report = ClearReport {
            scope: scope.map(str::to_string),
            ..Default::default()
        };
        if let Some(local) = &self.local {
            report.local_removed = local.clear(scope).await.unwrap_or(0);
        }
        if let Some(shared) = &self.shared {
            match shared.clear(scope).await {
                Ok(n) => report.shared_removed = n,
                Err(e) => {
                    CacheCounters::incr(&self.counters.shared_errors);
                    tracing::warn!(error = %e, "CacheUnavailable: shared tier clear failed");
                }
            }
        }
        tracing::info!(
            scope = scope.unwrap_or("*"),
            local = report.local_removed,
            shared = report.shared_removed,
            "Cache cleared"
        );
        report
    }
}
