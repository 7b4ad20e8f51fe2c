//! Sub-configuration structs with their defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Root directory for the artifact store and the shared cache tier
    pub data_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("~/.prism/data"),
        }
    }
}

/// Processing and concurrency settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Per-batch concurrency used when a request does not set one
    pub default_concurrency: usize,

    /// System-wide ceiling on images processed at once
    pub global_workers: usize,

    /// System-wide ceiling on batches admitted at once
    pub max_concurrent_batches: usize,

    /// Maximum images accepted in a single batch
    pub max_batch_items: usize,

    /// How long finished batches stay queryable, in seconds
    pub job_retention_secs: u64,

    /// Input file extensions picked up by directory discovery
    pub supported_formats: Vec<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            default_concurrency: 4,
            global_workers: 8,
            max_concurrent_batches: 16,
            max_batch_items: 20,
            job_retention_secs: 3600,
            supported_formats: vec![
                "jpg".to_string(),
                "jpeg".to_string(),
                "png".to_string(),
                "webp".to_string(),
                "gif".to_string(),
                "bmp".to_string(),
                "tif".to_string(),
                "tiff".to_string(),
            ],
        }
    }
}

/// Resource limits to protect against problematic inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum source size in megabytes
    pub max_file_size_mb: u64,

    /// Maximum source dimension (width or height)
    pub max_image_dimension: u32,

    /// Timeout for a single pipeline stage in milliseconds
    pub stage_timeout_ms: u64,

    /// How long a submission waits for a batch slot in milliseconds
    pub submit_timeout_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 50,
            max_image_dimension: 12000,
            stage_timeout_ms: 15000,
            submit_timeout_ms: 5000,
        }
    }
}

/// Two-tier cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the process-local tier
    pub local_enabled: bool,

    /// Maximum entries held by the local tier
    pub local_max_entries: usize,

    /// Byte budget of the local tier in megabytes (sum of artifact sizes)
    pub local_max_mb: u64,

    /// Enable the shared on-disk tier
    pub shared_enabled: bool,

    /// Directory of the shared tier; defaults to `<data_dir>/cache`
    pub shared_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_enabled: true,
            local_max_entries: 1000,
            local_max_mb: 256,
            shared_enabled: true,
            shared_dir: None,
        }
    }
}

/// Watermark resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkConfig {
    /// TrueType/OpenType font used for text watermarks
    pub font_path: Option<PathBuf>,

    /// Decoded overlay images kept after their batches finish
    pub overlay_cache_entries: usize,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            overlay_cache_entries: 16,
        }
    }
}

/// Metrics history and recommendation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Number of snapshots retained
    pub history_size: usize,

    /// Cache lookups required before hit-rate advice is given
    pub min_samples: u64,

    /// Hit rate (0.0-1.0) below which caching is flagged
    pub hit_rate_threshold: f64,

    /// Failure rate (0.0-1.0) above which failures are flagged
    pub failure_rate_threshold: f64,

    /// Average processing time per image above which it is flagged
    pub slow_item_ms: f64,

    /// Local evictions per insertion above which the budget is flagged
    pub eviction_ratio_threshold: f64,

    /// Share (0.0-1.0) of stage time one stage must exceed to be called out
    pub dominant_stage_share: f64,

    /// Average time of that stage below which it is not worth calling out
    pub dominant_stage_min_ms: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            history_size: 100,
            min_samples: 20,
            hit_rate_threshold: 0.3,
            failure_rate_threshold: 0.1,
            slow_item_ms: 2000.0,
            eviction_ratio_threshold: 0.5,
            dominant_stage_share: 0.75,
            dominant_stage_min_ms: 250.0,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind
    pub bind: String,

    /// Request body limit in megabytes
    pub body_limit_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8470".to_string(),
            body_limit_mb: 200,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
