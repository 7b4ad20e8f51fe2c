//! Batch job data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ItemError;
use crate::store::{ArtifactRef, ArtifactRole};
use crate::transform::{TransformDescriptor, TransformRequest};

/// Lifecycle of a batch. `Created -> Running -> {Completed | PartiallyFailed
/// | Failed}`; terminal states have no exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BatchStatus {
    Created,
    Running,
    Completed,
    PartiallyFailed,
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::PartiallyFailed | BatchStatus::Failed
        )
    }

    pub fn can_transition_to(self, next: BatchStatus) -> bool {
        match self {
            BatchStatus::Created => next == BatchStatus::Running,
            BatchStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

/// Lifecycle of one image. Strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }

    pub fn can_transition_to(self, next: ItemStatus) -> bool {
        matches!(
            (self, next),
            (ItemStatus::Pending, ItemStatus::Processing)
                | (ItemStatus::Pending, ItemStatus::Failed)
                | (ItemStatus::Processing, ItemStatus::Completed)
                | (ItemStatus::Processing, ItemStatus::Failed)
        )
    }
}

/// Serializable form of an [`ItemError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFailure {
    pub kind: String,
    pub message: String,
}

impl From<&ItemError> for ItemFailure {
    fn from(err: &ItemError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Outcome of a completed image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult {
    pub artifacts: Vec<ArtifactRef>,
    /// Source size in bytes
    pub original_size: u64,
    /// Primary output size in bytes
    pub output_size: u64,
    /// `output_size / original_size`; below 1.0 means the output shrank
    pub compression_ratio: f64,
    pub width: u32,
    pub height: u32,
    pub cache_hit: bool,
    pub processing_ms: u64,
}

impl ItemResult {
    /// Build from stored artifacts; size and dimensions come from the
    /// primary artifact.
    pub fn new(artifacts: Vec<ArtifactRef>, original_size: u64, cache_hit: bool, processing_ms: u64) -> Self {
        let primary = artifacts
            .iter()
            .find(|a| a.role == ArtifactRole::Primary)
            .or_else(|| artifacts.first());
        let (output_size, width, height) = primary
            .map(|a| (a.size_bytes, a.width, a.height))
            .unwrap_or_default();
        let compression_ratio = if original_size == 0 {
            0.0
        } else {
            output_size as f64 / original_size as f64
        };
        Self {
            artifacts,
            original_size,
            output_size,
            compression_ratio,
            width,
            height,
            cache_hit,
            processing_ms,
        }
    }
}

/// One image of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobItem {
    pub id: String,
    pub source_ref: String,
    pub file_name: String,
    pub status: ItemStatus,
    pub progress_percent: u8,
    pub result: Option<ItemResult>,
    pub error: Option<ItemFailure>,
}

impl JobItem {
    pub fn new(source_ref: String, file_name: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_ref,
            file_name,
            status: ItemStatus::Pending,
            progress_percent: 0,
            result: None,
            error: None,
        }
    }

    /// Move to `next` if the transition is legal. Returns whether it moved.
    pub fn advance(&mut self, next: ItemStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(item = %self.id, from = ?self.status, to = ?next, "Rejected item transition");
            return false;
        }
        self.status = next;
        true
    }
}

/// A submitted batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub id: Uuid,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub descriptor: TransformDescriptor,
    pub items: Vec<JobItem>,
    pub concurrency_limit: usize,
    pub status: BatchStatus,
}

impl BatchJob {
    /// Move to `next` if the transition is legal. Returns whether it moved.
    pub fn advance(&mut self, next: BatchStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    pub fn succeeded(&self) -> usize {
        self.count(ItemStatus::Completed)
    }

    pub fn failed(&self) -> usize {
        self.count(ItemStatus::Failed)
    }

    fn count(&self, status: ItemStatus) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }

    pub fn cache_hits(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.result.as_ref().is_some_and(|r| r.cache_hit))
            .count()
    }

    /// Terminal status implied by the items, once every item is terminal.
    pub fn derived_terminal_status(&self) -> Option<BatchStatus> {
        if !self.items.iter().all(|i| i.status.is_terminal()) {
            return None;
        }
        let failed = self.failed();
        Some(if failed == 0 {
            BatchStatus::Completed
        } else if failed == self.items.len() {
            BatchStatus::Failed
        } else {
            BatchStatus::PartiallyFailed
        })
    }

    pub fn summary(&self, elapsed_ms: u64) -> BatchSummary {
        let completed = self.items.iter().filter_map(|i| i.result.as_ref());
        let (original_bytes, output_bytes) =
            completed.fold((0, 0), |(o, p), r| (o + r.original_size, p + r.output_size));
        BatchSummary {
            batch_id: self.id,
            status: self.status,
            total_processed: self.items.len(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            cache_hits: self.cache_hits(),
            original_bytes,
            output_bytes,
            elapsed_ms,
        }
    }
}

/// Final tally of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub total_processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cache_hits: usize,
    /// Source bytes of completed items
    pub original_bytes: u64,
    /// Primary output bytes of completed items
    pub output_bytes: u64,
    pub elapsed_ms: u64,
}

/// Where an image's bytes come from.
#[derive(Debug, Clone)]
pub enum SourceData {
    /// Uploaded bytes, written to the store when the item is picked up
    Inline(Vec<u8>),
    /// Reference to an object already in the store
    Stored(String),
}

/// One image of a submission.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub file_name: String,
    pub data: SourceData,
}

impl SourceImage {
    pub fn inline(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            data: SourceData::Inline(bytes),
        }
    }

    pub fn stored(file_name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            data: SourceData::Stored(uri.into()),
        }
    }
}

/// A batch submission.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub owner: String,
    pub sources: Vec<SourceImage>,
    pub transform: TransformRequest,
    /// Per-batch limit; the configured default when `None`
    pub concurrency: Option<usize>,
}

/// Handed back on successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTicket {
    pub batch_id: Uuid,
    pub item_ids: Vec<String>,
    pub fingerprint: String,
}
