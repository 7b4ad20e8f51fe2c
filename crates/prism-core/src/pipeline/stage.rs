//! The stage abstraction and the frame passed between stages.

use image::{DynamicImage, ImageFormat};

use crate::error::{ItemError, PipelineResult};
use crate::store::ArtifactRole;
use crate::transform::{OutputFormat, TransformDescriptor};

/// One encoded output produced by the pipeline, not yet stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedOutput {
    pub role: ArtifactRole,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

/// Working state threaded through the stages of one image.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw source bytes
    pub source: Vec<u8>,
    /// Set by decode
    pub source_format: Option<ImageFormat>,
    /// EXIF orientation (1-8), 1 when absent
    pub orientation: u32,
    /// Source dimensions before any transform
    pub original_dimensions: (u32, u32),
    /// Current working image
    pub image: Option<DynamicImage>,
    /// Outputs encoded so far, primary first
    pub outputs: Vec<EncodedOutput>,
}

impl Frame {
    pub fn new(source: Vec<u8>) -> Self {
        Self {
            source,
            source_format: None,
            orientation: 1,
            original_dimensions: (0, 0),
            image: None,
            outputs: Vec::new(),
        }
    }

    /// Borrow the working image, failing if no stage has decoded one yet.
    pub fn working(&self, stage: &str) -> PipelineResult<&DynamicImage> {
        self.image
            .as_ref()
            .ok_or_else(|| ItemError::encode(stage, "no decoded image in frame"))
    }

    /// Take the working image out of the frame.
    pub fn take_working(&mut self, stage: &str) -> PipelineResult<DynamicImage> {
        self.image
            .take()
            .ok_or_else(|| ItemError::encode(stage, "no decoded image in frame"))
    }
}

/// A single step of the transform pipeline.
///
/// Stages are synchronous and CPU-bound; the executor runs them on the
/// blocking pool.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Relative share of the progress bar this stage accounts for.
    fn progress_weight(&self) -> u32 {
        1
    }

    /// Whether the stage has any work to do for `descriptor`.
    fn applies_to(&self, _descriptor: &TransformDescriptor) -> bool {
        true
    }

    fn apply(&self, frame: Frame, descriptor: &TransformDescriptor) -> PipelineResult<Frame>;

    /// Error reported when the stage exceeds its time budget.
    fn timeout_error(&self, timeout_ms: u64) -> ItemError {
        ItemError::encode(self.name(), format!("timed out after {timeout_ms}ms"))
    }
}
