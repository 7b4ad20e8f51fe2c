//! Configuration management for Prism.
//!
//! Configuration is loaded from the platform config directory with sensible
//! defaults. Every section implements `Default`, so a partial file only
//! overrides what it names.

mod types;
mod validate;

pub use types::*;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure for Prism.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Processing and concurrency settings
    pub processing: ProcessingConfig,

    /// Resource limits
    pub limits: LimitsConfig,

    /// Cache settings
    pub cache: CacheConfig,

    /// Watermark resources
    pub watermark: WatermarkConfig,

    /// Metrics and recommendation settings
    pub metrics: MetricsConfig,

    /// HTTP server settings
    pub server: ServerConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default configuration if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    ///
    /// - macOS: ~/Library/Application Support/com.prism.prism/config.toml
    /// - Linux: ~/.config/prism/config.toml
    /// - Windows: C:\Users\<User>\AppData\Roaming\prism\config\config.toml
    ///
    /// Falls back to ~/.prism/config.toml if directory detection fails.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "prism", "prism")
            .map(|dirs| dirs.config_dir().to_path_buf().join("config.toml"))
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".prism").join("config.toml")
            })
    }

    /// Resolved data directory (with ~ expansion).
    pub fn data_dir(&self) -> PathBuf {
        expand(&self.general.data_dir)
    }

    /// Directory backing the artifact store.
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir().join("store")
    }

    /// Directory backing the shared cache tier.
    pub fn shared_cache_dir(&self) -> PathBuf {
        match &self.cache.shared_dir {
            Some(dir) => expand(dir),
            None => self.data_dir().join("cache"),
        }
    }

    /// Resolved watermark font path, if configured.
    pub fn font_path(&self) -> Option<PathBuf> {
        self.watermark.font_path.as_deref().map(expand)
    }

    /// Per-stage timeout.
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.limits.stage_timeout_ms)
    }

    /// Batch admission timeout.
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.limits.submit_timeout_ms)
    }

    /// Serialize the config to a pretty TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

fn expand(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    let expanded = shellexpand::tilde(&path_str);
    PathBuf::from(expanded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.processing.default_concurrency, 4);
        assert_eq!(config.processing.max_batch_items, 20);
        assert_eq!(config.limits.max_file_size_mb, 50);
        assert!(config.cache.local_enabled);
    }

    #[test]
    fn test_config_to_toml() {
        let config = Config::default();
        let toml = config.to_toml().unwrap();
        assert!(toml.contains("[processing]"));
        assert!(toml.contains("[cache]"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [processing]
            default_concurrency = 2

            [cache]
            local_max_entries = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.processing.default_concurrency, 2);
        assert_eq!(config.processing.global_workers, 8);
        assert_eq!(config.cache.local_max_entries, 10);
        assert!(config.cache.shared_enabled);
    }

    #[test]
    fn test_shared_cache_dir_defaults_under_data_dir() {
        let mut config = Config::default();
        config.general.data_dir = PathBuf::from("/var/lib/prism");
        assert_eq!(config.shared_cache_dir(), PathBuf::from("/var/lib/prism/cache"));
        assert_eq!(config.store_dir(), PathBuf::from("/var/lib/prism/store"));

        config.cache.shared_dir = Some(PathBuf::from("/mnt/shared"));
        assert_eq!(config.shared_cache_dir(), PathBuf::from("/mnt/shared"));
    }
}
