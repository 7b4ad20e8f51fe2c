//! Durable, content-addressed object store for sources and artifacts.
//!
//! Objects are addressed by `<namespace>/<blake3>.<ext>`. Writing the same
//! bytes twice yields the same reference and leaves the stored object alone.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::pipeline::hash::content_hash_from_bytes;
use crate::transform::OutputFormat;

/// Top-level partition of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Uploaded source images and watermark overlays
    Sources,
    /// Pipeline outputs
    Artifacts,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Sources => "sources",
            Namespace::Artifacts => "artifacts",
        }
    }

    fn from_prefix(s: &str) -> Option<Self> {
        match s {
            "sources" => Some(Namespace::Sources),
            "artifacts" => Some(Namespace::Artifacts),
            _ => None,
        }
    }
}

/// What an artifact is within an item's outputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ArtifactRole {
    Primary,
    Thumbnail { preset: String },
}

impl ArtifactRole {
    /// Short label used in archive entry names.
    pub fn label(&self) -> String {
        match self {
            ArtifactRole::Primary => "primary".to_string(),
            ArtifactRole::Thumbnail { preset } => format!("thumb-{preset}"),
        }
    }
}

/// Reference to a stored output artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    pub uri: String,
    pub role: ArtifactRole,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
}

/// Durable object storage consumed by the pipeline and the cache.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `bytes` and return their reference.
    async fn put(
        &self,
        namespace: Namespace,
        bytes: &[u8],
        extension: &str,
    ) -> Result<String, StoreError>;

    /// Read an object's bytes.
    async fn get(&self, uri: &str) -> Result<Vec<u8>, StoreError>;

    /// Whether an object exists.
    async fn exists(&self, uri: &str) -> Result<bool, StoreError>;
}

/// Build the reference for `bytes` without storing them.
pub fn object_ref(namespace: Namespace, bytes: &[u8], extension: &str) -> Result<String, StoreError> {
    if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(StoreError::InvalidRef(format!(
            "bad extension `{extension}`"
        )));
    }
    Ok(format!(
        "{}/{}.{}",
        namespace.as_str(),
        content_hash_from_bytes(bytes),
        extension.to_ascii_lowercase()
    ))
}

/// Check that a reference names a single object inside a known namespace.
fn check_ref(uri: &str) -> Result<(), StoreError> {
    let invalid = || StoreError::InvalidRef(uri.to_string());
    let (prefix, name) = uri.split_once('/').ok_or_else(invalid)?;
    Namespace::from_prefix(prefix).ok_or_else(invalid)?;
    if name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || name.contains("..")
    {
        return Err(invalid());
    }
    Ok(())
}

/// Filesystem-backed store rooted at a directory.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, uri: &str) -> Result<PathBuf, StoreError> {
        check_ref(uri)?;
        Ok(self.root.join(uri))
    }
}

#[async_trait]
impl ArtifactStore for FsStore {
    async fn put(
        &self,
        namespace: Namespace,
        bytes: &[u8],
        extension: &str,
    ) -> Result<String, StoreError> {
        let uri = object_ref(namespace, bytes, extension)?;
        let path = self.path_for(&uri)?;
        if tokio::fs::try_exists(&path).await? {
            return Ok(uri);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write-then-rename so readers never observe a partial object
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tracing::trace!(uri = %uri, size = bytes.len(), "Stored object");
        Ok(uri)
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(uri)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(uri.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, uri: &str) -> Result<bool, StoreError> {
        let path = self.path_for(uri)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}

/// In-memory store, used by tests and benches.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop an object, simulating external deletion.
    pub fn remove(&self, uri: &str) -> bool {
        self.objects.write().remove(uri).is_some()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn put(
        &self,
        namespace: Namespace,
        bytes: &[u8],
        extension: &str,
    ) -> Result<String, StoreError> {
        let uri = object_ref(namespace, bytes, extension)?;
        self.objects
            .write()
            .entry(uri.clone())
            .or_insert_with(|| bytes.to_vec());
        Ok(uri)
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>, StoreError> {
        check_ref(uri)?;
        self.objects
            .read()
            .get(uri)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(uri.to_string()))
    }

    async fn exists(&self, uri: &str) -> Result<bool, StoreError> {
        check_ref(uri)?;
        Ok(self.objects.read().contains_key(uri))
    }
}
