//! Cache keys, entries, and the tier abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CacheError;
use crate::store::ArtifactRef;
use crate::transform::TransformDescriptor;

/// Namespace prefix of transform cache keys.
pub const CACHE_NAMESPACE: &str = "transform";

/// `transform:<source_hash>:<fingerprint>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(source_hash: &str, fingerprint: &str) -> Self {
        Self(format!("{CACHE_NAMESPACE}:{source_hash}:{fingerprint}"))
    }

    pub fn for_descriptor(source_hash: &str, descriptor: &TransformDescriptor) -> Self {
        Self::new(source_hash, &descriptor.fingerprint())
    }

    /// Parse a rendered key. Returns `None` unless it has three non-empty
    /// segments.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split(':');
        let valid = (0..3).all(|_| parts.next().is_some_and(|p| !p.is_empty()))
            && parts.next().is_none();
        valid.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn namespace(&self) -> &str {
        self.0.split(':').next().unwrap_or_default()
    }

    pub fn source_hash(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or_default()
    }

    /// Whether the key falls under a clear scope. A scope is a key prefix;
    /// `None` matches everything.
    pub fn in_scope(&self, scope: Option<&str>) -> bool {
        scope.map_or(true, |s| self.0.starts_with(s))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which tier an entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    Local,
    Shared,
}

impl TierKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TierKind::Local => "local",
            TierKind::Shared => "shared",
        }
    }
}

/// A cached transform result. The artifact list is never mutated once
/// stored; only access bookkeeping changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: CacheKey,
    pub artifacts: Vec<ArtifactRef>,
    pub size_bytes: u64,
    pub tier: TierKind,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
}

impl CacheEntry {
    pub fn new(key: CacheKey, artifacts: Vec<ArtifactRef>) -> Self {
        let now = Utc::now();
        Self {
            key,
            size_bytes: artifacts.iter().map(|a| a.size_bytes).sum(),
            artifacts,
            tier: TierKind::Local,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.last_accessed_at = Utc::now();
        self.access_count += 1;
    }
}

/// Size and eviction figures for one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierStats {
    pub entries: u64,
    pub bytes: u64,
    pub evictions: u64,
}

/// One level of the cache.
#[async_trait]
pub trait CacheTier: Send + Sync {
    fn kind(&self) -> TierKind;

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Insert an entry, returning how many entries were evicted to make room.
    /// Inserting an existing key leaves the stored entry unchanged.
    async fn put(&self, entry: CacheEntry) -> Result<u64, CacheError>;

    /// Remove one entry. Returns whether it was present.
    async fn evict(&self, key: &CacheKey) -> Result<bool, CacheError>;

    /// Remove all entries under `scope`, returning the count removed.
    async fn clear(&self, scope: Option<&str>) -> Result<u64, CacheError>;

    async fn stats(&self) -> Result<TierStats, CacheError>;
}
