//! Configuration validation with range checks.

use crate::error::ConfigError;

use super::Config;

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let positive: [(&str, u64); 10] = [
            (
                "processing.default_concurrency",
                self.processing.default_concurrency as u64,
            ),
            ("processing.global_workers", self.processing.global_workers as u64),
            (
                "processing.max_concurrent_batches",
                self.processing.max_concurrent_batches as u64,
            ),
            ("processing.max_batch_items", self.processing.max_batch_items as u64),
            ("limits.max_file_size_mb", self.limits.max_file_size_mb),
            ("limits.max_image_dimension", self.limits.max_image_dimension as u64),
            ("limits.stage_timeout_ms", self.limits.stage_timeout_ms),
            ("limits.submit_timeout_ms", self.limits.submit_timeout_ms),
            ("metrics.history_size", self.metrics.history_size as u64),
            (
                "watermark.overlay_cache_entries",
                self.watermark.overlay_cache_entries as u64,
            ),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!("{name} must be > 0")));
            }
        }
        if self.cache.local_enabled
            && (self.cache.local_max_entries == 0 || self.cache.local_max_mb == 0)
        {
            return Err(ConfigError::ValidationError(
                "cache.local_max_entries and cache.local_max_mb must be > 0 when the local tier is enabled"
                    .into(),
            ));
        }
        for (name, value) in [
            ("metrics.hit_rate_threshold", self.metrics.hit_rate_threshold),
            ("metrics.failure_rate_threshold", self.metrics.failure_rate_threshold),
            ("metrics.dominant_stage_share", self.metrics.dominant_stage_share),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between 0.0 and 1.0"
                )));
            }
        }
        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::ValidationError(format!(
                "server.bind is not a socket address: {}",
                self.server.bind
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_passes_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.processing.default_concurrency = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("default_concurrency"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.limits.stage_timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stage_timeout_ms"));
    }

    #[test]
    fn test_validate_allows_zero_budget_when_local_disabled() {
        let mut config = Config::default();
        config.cache.local_max_entries = 0;
        assert!(config.validate().is_err());

        config.cache.local_enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_thresholds() {
        let mut config = Config::default();
        config.metrics.hit_rate_threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("hit_rate_threshold"));
    }

    #[test]
    fn test_validate_rejects_bad_bind() {
        let mut config = Config::default();
        config.server.bind = "localhost".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("server.bind"));
    }
}
