//! Prism Core - batch image transformation library.
//!
//! Prism takes batches of source images plus one transform specification,
//! runs every image through a fixed stage pipeline, and stores the outputs
//! in a content-addressed artifact store. Results are cached by
//! `(source hash, transform fingerprint)` in a two-tier cache, so repeating
//! a transform on the same bytes is served without touching a codec.
//!
//! # Architecture
//!
//! ```text
//! submit → resolve spec → admit batch → per item: cache probe ─ hit ──────────┐
//!                                                └ miss → worker slot → pipeline → store → cache
//!                                                                                 └→ progress events
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use prism_core::{BatchRequest, Config, Prism, SourceImage, TransformRequest};
//!
//! #[tokio::main]
//! async fn main() -> prism_core::Result<()> {
//!     let prism = Prism::new(Config::load()?)?;
//!     let ticket = prism
//!         .coordinator()
//!         .submit(BatchRequest {
//!             owner: "me".into(),
//!             sources: vec![SourceImage::inline("a.png", std::fs::read("a.png")?)],
//!             transform: TransformRequest::Preset("web-optimized".into()),
//!             concurrency: None,
//!         })
//!         .await?;
//!     let summary = prism.coordinator().wait(ticket.batch_id).await?;
//!     println!("{} succeeded", summary.succeeded);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod job;
pub mod metrics;
pub mod output;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod store;
pub mod transform;

pub use cache::{CacheService, CacheStats, ClearReport};
pub use config::Config;
pub use discovery::{LocalSource, SourceDiscovery};
pub use error::{
    BatchError, CacheError, ConfigError, ItemError, PipelineResult, PrismError, Result, StoreError,
};
pub use job::{
    BatchJob, BatchRequest, BatchStatus, BatchSummary, BatchTicket, Coordinator, ItemStatus,
    SourceImage,
};
pub use metrics::{MetricsSnapshot, Recommendation, RecommendationEngine};
pub use output::{EventWriter, WriteFormat};
pub use progress::{ProgressEvent, Subscription};
pub use store::{ArtifactStore, FsStore, MemoryStore};
pub use transform::{TransformDescriptor, TransformRequest};

use serde::Serialize;
use std::sync::Arc;

use job::CoordinatorParts;
use metrics::MetricsCollector;
use pipeline::{PipelineExecutor, WatermarkAssets};
use pool::WorkerPool;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Metrics view with advice, as served by `prism metrics` and the HTTP API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub snapshot: MetricsSnapshot,
    pub cache: CacheStats,
    pub history_len: usize,
    pub recommendations: Vec<Recommendation>,
}

/// Prism entry point: owns the coordinator and its collaborators.
pub struct Prism {
    config: Config,
    coordinator: Coordinator,
    engine: RecommendationEngine,
}

impl Prism {
    /// Build with the on-disk store and the cache tiers enabled in `config`.
    pub fn new(config: Config) -> Result<Self> {
        PrismBuilder::new(config).build()
    }

    pub fn builder(config: Config) -> PrismBuilder {
        PrismBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Current metrics, cache statistics, and recommendations.
    pub async fn metrics_report(&self) -> MetricsReport {
        let cache = self.coordinator.cache().stats().await;
        let metrics = self.coordinator.metrics();
        let snapshot = metrics.snapshot(cache.clone());
        MetricsReport {
            recommendations: self.engine.analyze(&snapshot),
            history_len: metrics.history().len(),
            snapshot,
            cache,
        }
    }
}

/// Overrides for the collaborators [`Prism::new`] would build itself.
pub struct PrismBuilder {
    config: Config,
    store: Option<Arc<dyn ArtifactStore>>,
    cache: Option<CacheService>,
    executor: Option<PipelineExecutor>,
}

impl PrismBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            cache: None,
            executor: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Cache front to use instead of the configured tiers. Artifact liveness
    /// checks are wired to the store on build.
    pub fn cache(mut self, cache: CacheService) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Custom stage chain.
    pub fn executor(mut self, executor: PipelineExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> Result<Prism> {
        let config = self.config;
        config.validate()?;

        let font = match config.font_path() {
            Some(path) => Some(WatermarkAssets::load_font(&path).map_err(|e| {
                ConfigError::ValidationError(format!(
                    "watermark.font_path {}: {e}",
                    path.display()
                ))
            })?),
            None => None,
        };
        let assets = Arc::new(WatermarkAssets::with_overlay_capacity(
            font,
            config.watermark.overlay_cache_entries,
        ));

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(FsStore::new(config.store_dir())));
        let cache = self
            .cache
            .unwrap_or_else(|| CacheService::from_config(&config))
            .with_store(Arc::clone(&store));
        let executor = self
            .executor
            .unwrap_or_else(|| PipelineExecutor::standard(&config, Arc::clone(&assets)));

        tracing::debug!("Initializing Prism v{}", VERSION);
        let coordinator = Coordinator::new(
            config.clone(),
            CoordinatorParts {
                store,
                cache: Arc::new(cache),
                pool: Arc::new(WorkerPool::from_config(&config.processing)),
                executor: Arc::new(executor),
                assets,
                metrics: Arc::new(MetricsCollector::new(config.metrics.history_size)),
            },
        );

        Ok(Prism {
            engine: RecommendationEngine::new(config.metrics.clone()),
            coordinator,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_bad_font_path_rejected() {
        let mut config = Config::default();
        config.watermark.font_path = Some("/nonexistent/font.ttf".into());
        let err = Prism::builder(config)
            .store(Arc::new(MemoryStore::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, PrismError::Config(ConfigError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_metrics_report_when_idle() {
        let prism = Prism::builder(Config::default())
            .store(Arc::new(MemoryStore::new()))
            .cache(CacheService::new(None, None))
            .build()
            .unwrap();
        let report = prism.metrics_report().await;
        assert_eq!(report.snapshot.total_requests, 0);
        assert_eq!(report.history_len, 0);
        assert_eq!(report.recommendations.len(), 1);
        assert_eq!(report.recommendations[0].title, "System healthy");
    }
}
