//! Error types for the Prism batch transformation pipeline.
//!
//! Errors are split by blast radius: specification and admission errors
//! reject a whole batch, item errors stay attached to one image, and cache
//! errors never leave the cache service.

use thiserror::Error;

/// Top-level error type for Prism operations.
#[derive(Error, Debug)]
pub enum PrismError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Batch intake or lookup errors
    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    /// Object store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Errors that reject or look up a whole batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// Transform options could not be resolved into a descriptor
    #[error("Invalid specification for `{field}`: {reason}")]
    InvalidSpecification { field: String, reason: String },

    /// No batch slot became free before the submission timeout
    #[error("Worker pool busy: no batch slot within {waited_ms}ms")]
    Backpressure { waited_ms: u64 },

    /// Batch contained no items
    #[error("Batch contains no images")]
    EmptyBatch,

    /// Batch exceeded the per-call item limit
    #[error("Batch has {count} images, at most {max} allowed")]
    TooManyItems { count: usize, max: usize },

    /// Unknown batch identifier
    #[error("Batch not found: {0}")]
    NotFound(String),

    /// Operation requires a finished batch
    #[error("Batch {0} is still running")]
    NotFinished(String),

    /// Archive assembly failed
    #[error("Archive error: {0}")]
    Archive(String),
}

impl BatchError {
    /// Shorthand for an `InvalidSpecification` naming the offending field.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSpecification {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Per-image failures. These are recorded on the job item and never abort
/// sibling images.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ItemError {
    /// Input is not an image format the pipeline can decode
    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    /// Input bytes are empty, truncated, or otherwise undecodable
    #[error("Corrupt input: {message}")]
    CorruptInput { message: String },

    /// Input exceeds the configured file size limit
    #[error("File too large: {size_mb}MB > {max_mb}MB")]
    FileTooLarge { size_mb: u64, max_mb: u64 },

    /// Input dimensions exceed the configured limit
    #[error("Image too large: {width}x{height} > {max_dim}")]
    DimensionTooLarge {
        width: u32,
        height: u32,
        max_dim: u32,
    },

    /// A transform or encode stage failed
    #[error("Encode failure in {stage}: {message}")]
    EncodeFailure { stage: String, message: String },

    /// Reading the source or writing an artifact failed
    #[error("Storage failure: {message}")]
    Storage { message: String },

    /// The batch was cancelled before this image was dispatched
    #[error("Cancelled before processing started")]
    Cancelled,
}

impl ItemError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ItemError::UnsupportedFormat { .. } => "UnsupportedFormat",
            ItemError::CorruptInput { .. } => "CorruptInput",
            ItemError::FileTooLarge { .. } => "FileTooLarge",
            ItemError::DimensionTooLarge { .. } => "DimensionTooLarge",
            ItemError::EncodeFailure { .. } => "EncodeFailure",
            ItemError::Storage { .. } => "Storage",
            ItemError::Cancelled => "Cancelled",
        }
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptInput {
            message: message.into(),
        }
    }

    pub(crate) fn encode(stage: &str, message: impl Into<String>) -> Self {
        Self::EncodeFailure {
            stage: stage.to_string(),
            message: message.into(),
        }
    }
}

/// Cache tier errors. Logged by the cache service, never surfaced to callers.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The tier could not be reached or written
    #[error("Cache tier `{tier}` unavailable: {message}")]
    Unavailable { tier: &'static str, message: String },

    /// A stored record could not be (de)serialized
    #[error("Cache record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable object store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No object exists under the given reference
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Reference does not name an object inside the store
    #[error("Invalid object reference: {0}")]
    InvalidRef(String),

    /// Underlying I/O failure
    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for ItemError {
    fn from(err: StoreError) -> Self {
        ItemError::Storage {
            message: err.to_string(),
        }
    }
}

/// Convenience type alias for Prism results.
pub type Result<T> = std::result::Result<T, PrismError>;

/// Convenience type alias for per-item pipeline results.
pub type PipelineResult<T> = std::result::Result<T, ItemError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_specification_names_field() {
        let err = BatchError::invalid("quality", "must be between 1 and 100");
        assert!(err.to_string().contains("`quality`"));
    }

    #[test]
    fn test_item_error_kinds() {
        assert_eq!(ItemError::corrupt("empty").kind(), "CorruptInput");
        assert_eq!(ItemError::encode("encode", "boom").kind(), "EncodeFailure");
        assert_eq!(ItemError::Cancelled.kind(), "Cancelled");
    }

    #[test]
    fn test_store_error_maps_to_storage_item_error() {
        let item: ItemError = StoreError::NotFound("sources/x.png".into()).into();
        assert_eq!(item.kind(), "Storage");
    }
}
