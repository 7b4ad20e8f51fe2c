//! ZIP download of a finished batch.
//!
//! The archive is assembled after the fact from stored artifacts. Entries are
//! named `<stem>/<role>.<ext>` and carry a fixed timestamp, so the same batch
//! always yields the same bytes.

use serde::Serialize;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::BatchError;
use crate::job::{BatchJob, ItemFailure, ItemStatus};
use crate::store::ArtifactStore;

const MANIFEST_NAME: &str = "manifest.json";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ManifestItem<'a> {
    item_id: &'a str,
    file_name: &'a str,
    status: ItemStatus,
    entries: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ItemFailure>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Manifest<'a> {
    batch_id: String,
    items: Vec<ManifestItem<'a>>,
}

/// Build a deflated ZIP of every completed item's artifacts plus a
/// `manifest.json` listing all items.
pub async fn build_zip(job: &BatchJob, store: &dyn ArtifactStore) -> Result<Vec<u8>, BatchError> {
    if !job.status.is_terminal() {
        return Err(BatchError::NotFinished(job.id.to_string()));
    }

    let mut stems = StemAllocator::default();
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();
    let mut manifest = Manifest {
        batch_id: job.id.to_string(),
        items: Vec::with_capacity(job.items.len()),
    };

    for (index, item) in job.items.iter().enumerate() {
        let mut entries = Vec::new();
        if let Some(result) = item.result.as_ref().filter(|_| item.status == ItemStatus::Completed) {
            let stem = stems.allocate(&item.file_name, index);
            for artifact in &result.artifacts {
                let bytes = store.get(&artifact.uri).await.map_err(|e| {
                    BatchError::Archive(format!("{}: {e}", artifact.uri))
                })?;
                let name = format!(
                    "{stem}/{}.{}",
                    artifact.role.label(),
                    artifact.format.extension()
                );
                entries.push(name.clone());
                files.push((name, bytes));
            }
        }
        manifest.items.push(ManifestItem {
            item_id: &item.id,
            file_name: &item.file_name,
            status: item.status,
            entries,
            error: item.error.as_ref(),
        });
    }

    let manifest = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| BatchError::Archive(format!("manifest: {e}")))?;
    files.push((MANIFEST_NAME.to_string(), manifest));

    tokio::task::spawn_blocking(move || write_zip(files))
        .await
        .map_err(|e| BatchError::Archive(format!("archive task failed: {e}")))?
}

fn write_zip(files: Vec<(String, Vec<u8>)>) -> Result<Vec<u8>, BatchError> {
    let mut cursor = Cursor::new(Vec::new());
    let mut zip = ZipWriter::new(&mut cursor);
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    for (name, bytes) in files {
        zip.start_file(name.as_str(), options)
            .map_err(|e| BatchError::Archive(format!("Failed to add zip entry {name}: {e}")))?;
        zip.write_all(&bytes)
            .map_err(|e| BatchError::Archive(format!("Failed to write zip entry {name}: {e}")))?;
    }
    zip.finish()
        .map_err(|e| BatchError::Archive(format!("Failed to finish zip: {e}")))?;

    Ok(cursor.into_inner())
}

/// Hands out unique, path-safe directory names per item.
#[derive(Default)]
struct StemAllocator {
    seen: HashMap<String, usize>,
}

impl StemAllocator {
    fn allocate(&mut self, file_name: &str, index: usize) -> String {
        let base = sanitize_stem(file_name).unwrap_or_else(|| format!("item-{}", index + 1));
        let count = self.seen.entry(base.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            base
        } else {
            format!("{base}-{count}")
        }
    }
}

fn sanitize_stem(file_name: &str) -> Option<String> {
    // Only the last path component, without its extension
    let name = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('_');
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}
