//! In-process LRU tier bounded by entry count and byte budget.

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;

use super::tier::{CacheEntry, CacheKey, CacheTier, TierKind, TierStats};
use crate::config::CacheConfig;
use crate::error::CacheError;

struct Inner {
    entries: LruCache<CacheKey, CacheEntry>,
    bytes: u64,
    evictions: u64,
}

/// Local cache tier. All bookkeeping happens under one short-lived lock and
/// eviction runs inside `put`.
pub struct MemoryTier {
    inner: Mutex<Inner>,
    max_entries: usize,
    max_bytes: u64,
}

impl MemoryTier {
    pub fn new(max_entries: usize, max_bytes: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                bytes: 0,
                evictions: 0,
            }),
            max_entries,
            max_bytes,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.local_max_entries, config.local_max_mb * 1024 * 1024)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    fn kind(&self) -> TierKind {
        TierKind::Local
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let mut inner = self.inner.lock();
        Ok(inner.entries.get_mut(key).map(|entry| {
            entry.touch();
            entry.clone()
        }))
    }

    async fn put(&self, mut entry: CacheEntry) -> Result<u64, CacheError> {
        if entry.size_bytes > self.max_bytes {
            tracing::debug!(
                key = %entry.key,
                size = entry.size_bytes,
                budget = self.max_bytes,
                "Entry larger than local budget, not cached"
            );
            return Ok(0);
        }

        let mut inner = self.inner.lock();
        if inner.entries.get(&entry.key).is_some() {
            return Ok(0);
        }

        entry.tier = TierKind::Local;
        inner.bytes += entry.size_bytes;
        inner.entries.put(entry.key.clone(), entry);

        let mut evicted = 0;
        while inner.entries.len() > self.max_entries || inner.bytes > self.max_bytes {
            match inner.entries.pop_lru() {
                Some((key, old)) => {
                    inner.bytes = inner.bytes.saturating_sub(old.size_bytes);
                    evicted += 1;
                    tracing::trace!(key = %key, "Evicted from local tier");
                }
                None => break,
            }
        }
        inner.evictions += evicted;
        Ok(evicted)
    }

    async fn evict(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let mut inner = self.inner.lock();
        match inner.entries.pop(key) {
            Some(old) => {
                inner.bytes = inner.bytes.saturating_sub(old.size_bytes);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clear(&self, scope: Option<&str>) -> Result<u64, CacheError> {
        let mut inner = self.inner.lock();
        let doomed: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(key, _)| key.in_scope(scope))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            if let Some(old) = inner.entries.pop(key) {
                inner.bytes = inner.bytes.saturating_sub(old.size_bytes);
            }
        }
        Ok(doomed.len() as u64)
    }

    async fn stats(&self) -> Result<TierStats, CacheError> {
        let inner = self.inner.lock();
        Ok(TierStats {
            entries: inner.entries.len() as u64,
            bytes: inner.bytes,
            evictions: inner.evictions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ArtifactRef, ArtifactRole};
    use crate::transform::OutputFormat;

    fn entry(source: &str, size: u64) -> CacheEntry {
        CacheEntry::new(
            CacheKey::new(source, "fp"),
            vec![ArtifactRef {
                uri: format!("artifacts/{source}.webp"),
                role: ArtifactRole::Primary,
                format: OutputFormat::Webp,
                width: 10,
                height: 10,
                size_bytes: size,
            }],
        )
    }

    #[tokio::test]
    async fn test_get_after_put() {
        let tier = MemoryTier::new(10, 1_000);
        tier.put(entry("a", 100)).await.unwrap();

        let hit = tier.get(&CacheKey::new("a", "fp")).await.unwrap().unwrap();
        assert_eq!(hit.access_count, 1);
        assert!(tier.get(&CacheKey::new("b", "fp")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_evicts_least_recently_used_by_count() {
        let tier = MemoryTier::new(2, 1_000);
        tier.put(entry("a", 1)).await.unwrap();
        tier.put(entry("b", 1)).await.unwrap();
        // Touch `a` so `b` becomes the eviction candidate
        tier.get(&CacheKey::new("a", "fp")).await.unwrap();
        let evicted = tier.put(entry("c", 1)).await.unwrap();

        assert_eq!(evicted, 1);
        assert!(tier.get(&CacheKey::new("a", "fp")).await.unwrap().is_some());
        assert!(tier.get(&CacheKey::new("b", "fp")).await.unwrap().is_none());
        assert_eq!(tier.stats().await.unwrap().evictions, 1);
    }

    #[tokio::test]
    async fn test_evicts_by_byte_budget() {
        let tier = MemoryTier::new(100, 250);
        tier.put(entry("a", 100)).await.unwrap();
        tier.put(entry("b", 100)).await.unwrap();
        tier.put(entry("c", 100)).await.unwrap();

        let stats = tier.stats().await.unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.bytes, 200);
    }

    #[tokio::test]
    async fn test_oversized_entry_not_stored() {
        let tier = MemoryTier::new(10, 50);
        assert_eq!(tier.put(entry("big", 51)).await.unwrap(), 0);
        assert!(tier.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_put_is_idempotent() {
        let tier = MemoryTier::new(10, 1_000);
        tier.put(entry("a", 100)).await.unwrap();
        tier.put(entry("a", 100)).await.unwrap();

        let stats = tier.stats().await.unwrap();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.bytes, 100);
        assert_eq!(stats.evictions, 0);
    }

    #[tokio::test]
    async fn test_clear_scope() {
        let tier = MemoryTier::new(10, 1_000);
        tier.put(entry("aa", 1)).await.unwrap();
        tier.put(entry("ab", 1)).await.unwrap();
        tier.put(entry("bb", 1)).await.unwrap();

        assert_eq!(tier.clear(Some("transform:a")).await.unwrap(), 2);
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.clear(None).await.unwrap(), 1);
        assert_eq!(tier.stats().await.unwrap().bytes, 0);
    }
}
