//! Runs the stage chain for one image.

use image::ImageFormat;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use super::color::ColorStage;
use super::decode::DecodeStage;
use super::encode::EncodeStage;
use super::fanout::FanoutStage;
use super::geometry::GeometryStage;
use super::stage::{EncodedOutput, Frame, Stage};
use super::watermark::{WatermarkAssets, WatermarkStage};
use crate::config::Config;
use crate::error::{ItemError, PipelineResult};
use crate::transform::TransformDescriptor;

/// Share of the progress scale covered by stages; the remainder is storage
/// and bookkeeping after the pipeline returns.
const STAGE_PROGRESS_SPAN: u32 = 90;

/// Emitted after each stage finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub stage: &'static str,
    pub percentage: u8,
    pub elapsed: Duration,
}

/// Everything the pipeline produced for one image.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub outputs: Vec<EncodedOutput>,
    pub source_format: Option<ImageFormat>,
    pub original_dimensions: (u32, u32),
    pub stage_timings: Vec<(&'static str, Duration)>,
}

/// Ordered stage chain with a per-stage time budget.
pub struct PipelineExecutor {
    stages: Vec<Arc<dyn Stage>>,
    stage_timeout: Duration,
}

impl PipelineExecutor {
    pub fn new(stages: Vec<Arc<dyn Stage>>, stage_timeout: Duration) -> Self {
        Self {
            stages,
            stage_timeout,
        }
    }

    /// decode, geometry, color, watermark, encode, fanout
    pub fn standard(config: &Config, assets: Arc<WatermarkAssets>) -> Self {
        Self::new(
            vec![
                Arc::new(DecodeStage::new(&config.limits)),
                Arc::new(GeometryStage::new(config.limits.max_image_dimension)),
                Arc::new(ColorStage),
                Arc::new(WatermarkStage::new(assets)),
                Arc::new(EncodeStage),
                Arc::new(FanoutStage),
            ],
            config.stage_timeout(),
        )
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every applicable stage over `source`. `on_stage` is called after
    /// each stage with cumulative progress.
    pub async fn run<F>(
        &self,
        source: Vec<u8>,
        descriptor: Arc<TransformDescriptor>,
        on_stage: F,
    ) -> PipelineResult<PipelineOutput>
    where
        F: FnMut(StageReport),
    {
        self.run_holding(source, descriptor, Arc::new(()), on_stage).await
    }

    /// Like [`run`](Self::run), but every blocking stage task keeps a clone of
    /// `guard`. A stage that times out keeps running in the background, and
    /// the guard (typically a worker slot) is only released when it returns.
    pub async fn run_holding<F, G>(
        &self,
        source: Vec<u8>,
        descriptor: Arc<TransformDescriptor>,
        guard: Arc<G>,
        mut on_stage: F,
    ) -> PipelineResult<PipelineOutput>
    where
        F: FnMut(StageReport),
        G: Send + Sync + 'static,
    {
        let active: Vec<&Arc<dyn Stage>> = self
            .stages
            .iter()
            .filter(|s| s.applies_to(&descriptor))
            .collect();
        let total_weight: u32 = active.iter().map(|s| s.progress_weight()).sum::<u32>().max(1);
        let timeout_ms = self.stage_timeout.as_millis() as u64;

        let mut frame = Frame::new(source);
        let mut done_weight = 0;
        let mut stage_timings = Vec::with_capacity(active.len());

        for stage in active {
            let name = stage.name();
            let started = Instant::now();
            let task_stage = Arc::clone(stage);
            let task_descriptor = Arc::clone(&descriptor);
            let task_guard = Arc::clone(&guard);
            let handle = tokio::task::spawn_blocking(move || {
                let _held = task_guard;
                task_stage.apply(frame, &task_descriptor)
            });

            frame = match timeout(self.stage_timeout, handle).await {
                Ok(Ok(Ok(next))) => next,
                Ok(Ok(Err(e))) => {
                    tracing::trace!(stage = name, error = %e, "Stage failed");
                    return Err(e);
                }
                Ok(Err(e)) => {
                    return Err(ItemError::encode(name, format!("stage task failed: {e}")));
                }
                Err(_) => return Err(stage.timeout_error(timeout_ms)),
            };

            let elapsed = started.elapsed();
            done_weight += stage.progress_weight();
            stage_timings.push((name, elapsed));
            tracing::trace!(stage = name, elapsed_ms = elapsed.as_millis() as u64, "Stage done");
            on_stage(StageReport {
                stage: name,
                percentage: (done_weight * STAGE_PROGRESS_SPAN / total_weight) as u8,
                elapsed,
            });
        }

        Ok(PipelineOutput {
            outputs: frame.outputs,
            source_format: frame.source_format,
            original_dimensions: frame.original_dimensions,
            stage_timings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{descriptor, png_bytes};
    use crate::store::ArtifactRole;

    fn executor() -> PipelineExecutor {
        PipelineExecutor::standard(&Config::default(), Arc::new(WatermarkAssets::default()))
    }

    /// Sleeps past any sensible budget.
    struct StuckStage(&'static str);

    impl Stage for StuckStage {
        fn name(&self) -> &'static str {
            self.0
        }
        fn apply(&self, frame: Frame, _: &TransformDescriptor) -> PipelineResult<Frame> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(frame)
        }
    }

    #[tokio::test]
    async fn test_runs_standard_chain() {
        let d = Arc::new(descriptor(&[("width", "20"), ("format", "png"), ("thumbnails", "small")]));
        let mut reports = Vec::new();
        let out = executor()
            .run(png_bytes(40, 20), d, |r| reports.push(r))
            .await
            .unwrap();

        assert_eq!(out.original_dimensions, (40, 20));
        assert_eq!(out.outputs.len(), 2);
        assert_eq!(out.outputs[0].role, ArtifactRole::Primary);
        assert_eq!((out.outputs[0].width, out.outputs[0].height), (20, 10));

        let stages: Vec<_> = reports.iter().map(|r| r.stage).collect();
        assert_eq!(stages, vec!["decode", "geometry", "color", "encode", "fanout"]);
        assert!(reports.windows(2).all(|w| w[0].percentage <= w[1].percentage));
        assert_eq!(reports.last().unwrap().percentage, 90);
    }

    #[tokio::test]
    async fn test_same_input_same_bytes() {
        let d = Arc::new(descriptor(&[("width", "16"), ("format", "webp")]));
        let a = executor().run(png_bytes(32, 32), d.clone(), |_| {}).await.unwrap();
        let b = executor().run(png_bytes(32, 32), d, |_| {}).await.unwrap();
        assert_eq!(a.outputs, b.outputs);
    }

    #[tokio::test]
    async fn test_corrupt_input_stops_at_decode() {
        let mut reports = Vec::new();
        let err = executor()
            .run(Vec::new(), Arc::new(descriptor(&[])), |r| reports.push(r))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "CorruptInput");
        assert!(reports.is_empty());
    }

    #[tokio::test]
    async fn test_stage_timeout() {
        let stuck = PipelineExecutor::new(
            vec![Arc::new(StuckStage("watermark"))],
            Duration::from_millis(20),
        );
        let err = stuck
            .run(png_bytes(4, 4), Arc::new(descriptor(&[])), |_| {})
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "EncodeFailure");
    }

    #[tokio::test]
    async fn test_timed_out_stage_keeps_guard() {
        let stuck = PipelineExecutor::new(
            vec![Arc::new(StuckStage("encode"))],
            Duration::from_millis(20),
        );
        let guard = Arc::new(());
        let err = stuck
            .run_holding(png_bytes(4, 4), Arc::new(descriptor(&[])), Arc::clone(&guard), |_| {})
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "EncodeFailure");
        // The stage is still sleeping on its blocking thread
        assert_eq!(Arc::strong_count(&guard), 2);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(Arc::strong_count(&guard), 1);
    }

    #[test]
    fn test_decode_timeout_reads_as_corrupt_input() {
        let decode = DecodeStage::new(&Config::default().limits);
        assert_eq!(decode.timeout_error(15).kind(), "CorruptInput");
        assert_eq!(EncodeStage.timeout_error(15).kind(), "EncodeFailure");
    }
}
