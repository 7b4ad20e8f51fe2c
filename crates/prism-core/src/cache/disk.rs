//! Shared cache tier backed by JSON records on a filesystem visible to
//! every process.
//!
//! Layout: `<root>/<namespace>/<first two chars of source hash>/<key>.json`,
//! with `:` in keys written as `~`. Records are written atomically, so a
//! reader either sees a whole record or none. Eviction belongs to whoever
//! operates the shared volume.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::tier::{CacheEntry, CacheKey, CacheTier, TierKind, TierStats};
use crate::error::CacheError;

const RECORD_EXT: &str = "json";

pub struct DiskTier {
    root: PathBuf,
}

impl DiskTier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, key: &CacheKey) -> PathBuf {
        let fan_out: String = key.source_hash().chars().take(2).collect();
        self.root
            .join(key.namespace())
            .join(if fan_out.is_empty() { "__".to_string() } else { fan_out })
            .join(format!("{}.{RECORD_EXT}", key.as_str().replace(':', "~")))
    }

    fn unavailable(err: impl std::fmt::Display) -> CacheError {
        CacheError::Unavailable {
            tier: "shared",
            message: err.to_string(),
        }
    }
}

/// Recover the key from a record file name.
fn key_from_path(path: &Path) -> Option<CacheKey> {
    if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    CacheKey::parse(&stem.replace('~', ":"))
}

fn record_files(root: &Path) -> impl Iterator<Item = (PathBuf, CacheKey)> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let key = key_from_path(e.path())?;
            Some((e.into_path(), key))
        })
}

#[async_trait]
impl CacheTier for DiskTier {
    fn kind(&self) -> TierKind {
        TierKind::Shared
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.record_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::unavailable(e)),
        };
        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(mut entry) if entry.key == *key => {
                entry.tier = TierKind::Shared;
                entry.touch();
                Ok(Some(entry))
            }
            Ok(_) | Err(_) => {
                tracing::warn!(path = %path.display(), "Discarding unreadable shared cache record");
                let _ = tokio::fs::remove_file(&path).await;
                Ok(None)
            }
        }
    }

    async fn put(&self, mut entry: CacheEntry) -> Result<u64, CacheError> {
        let path = self.record_path(&entry.key);
        if tokio::fs::try_exists(&path).await.map_err(Self::unavailable)? {
            return Ok(0);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(Self::unavailable)?;
        }

        entry.tier = TierKind::Shared;
        let json = serde_json::to_vec(&entry)?;
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(Self::unavailable)?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Self::unavailable(e));
        }
        Ok(0)
    }

    async fn evict(&self, key: &CacheKey) -> Result<bool, CacheError> {
        match tokio::fs::remove_file(self.record_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::unavailable(e)),
        }
    }

    async fn clear(&self, scope: Option<&str>) -> Result<u64, CacheError> {
        let root = self.root.clone();
        let scope = scope.map(str::to_string);
        tokio::task::spawn_blocking(move || {
            let mut removed = 0;
            for (path, key) in record_files(&root) {
                if key.in_scope(scope.as_deref()) && std::fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
            removed
        })
        .await
        .map_err(Self::unavailable)
    }

    async fn stats(&self) -> Result<TierStats, CacheError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            let mut stats = TierStats::default();
            for (path, _) in record_files(&root) {
                let Ok(bytes) = std::fs::read(&path) else {
                    continue;
                };
                if let Ok(entry) = serde_json::from_slice::<CacheEntry>(&bytes) {
                    stats.entries += 1;
                    stats.bytes += entry.size_bytes;
                }
            }
            stats
        })
        .await
        .map_err(Self::unavailable)
    }
}
