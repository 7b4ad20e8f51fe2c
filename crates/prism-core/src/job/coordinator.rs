//! Batch intake, per-item dispatch, and job bookkeeping.
//!
//! The coordinator is the only writer of job and item status. Each batch
//! runs on its own task: in submission order, each item takes a worker slot
//! and is probed against the cache. Hits complete at once; misses run the
//! pipeline on spawned tasks so items of one batch overlap up to its
//! concurrency limit.

use chrono::Utc;
use image::DynamicImage;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::types::{
    BatchJob, BatchRequest, BatchStatus, BatchSummary, BatchTicket, ItemFailure, ItemResult,
    ItemStatus, JobItem, SourceData,
};
use crate::archive;
use crate::cache::CacheService;
use crate::config::Config;
use crate::error::{BatchError, ItemError};
use crate::metrics::{ItemOutcome, MetricsCollector};
use crate::pipeline::hash::content_hash_from_bytes;
use crate::pipeline::validate::sniff_format;
use crate::pipeline::{PipelineExecutor, WatermarkAssets};
use crate::pool::{BatchAdmission, WorkerPool, WorkerSlot};
use crate::progress::{ProgressBroadcaster, ProgressEvent, Subscription};
use crate::store::{object_ref, ArtifactRef, ArtifactStore, Namespace};
use crate::transform::{TransformDescriptor, TransformResolver};

/// Extension used for sources whose format cannot be sniffed at intake.
const UNKNOWN_EXTENSION: &str = "bin";

/// Collaborators the coordinator runs on.
pub struct CoordinatorParts {
    pub store: Arc<dyn ArtifactStore>,
    pub cache: Arc<CacheService>,
    pub pool: Arc<WorkerPool>,
    pub executor: Arc<PipelineExecutor>,
    pub assets: Arc<WatermarkAssets>,
    pub metrics: Arc<MetricsCollector>,
}

/// Accepts batches and drives them to a terminal state.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    resolver: TransformResolver,
    store: Arc<dyn ArtifactStore>,
    cache: Arc<CacheService>,
    pool: Arc<WorkerPool>,
    executor: Arc<PipelineExecutor>,
    assets: Arc<WatermarkAssets>,
    metrics: Arc<MetricsCollector>,
    jobs: RwLock<HashMap<Uuid, Arc<JobHandle>>>,
}

/// An item's input as handed to the run task.
struct ItemInput {
    data: SourceData,
    extension: String,
}

impl Coordinator {
    pub fn new(config: Config, parts: CoordinatorParts) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                resolver: TransformResolver::new(),
                store: parts.store,
                cache: parts.cache,
                pool: parts.pool,
                executor: parts.executor,
                assets: parts.assets,
                metrics: parts.metrics,
                jobs: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Validate and admit a batch, then start processing it in the
    /// background.
    ///
    /// Every rejection happens here, before any image is touched:
    /// item count, transform options, watermark resources, and finally a
    /// batch slot (`Backpressure` if none frees up in time).
    pub async fn submit(&self, request: BatchRequest) -> Result<BatchTicket, BatchError> {
        let inner = &self.inner;
        let count = request.sources.len();
        if count == 0 {
            return Err(BatchError::EmptyBatch);
        }
        let max = inner.config.processing.max_batch_items;
        if count > max {
            return Err(BatchError::TooManyItems { count, max });
        }

        let descriptor = inner.resolver.resolve(&request.transform)?;
        let overlay = self.check_watermark_assets(&descriptor).await?;

        let concurrency = match request.concurrency {
            Some(0) => return Err(BatchError::invalid("concurrency", "must be at least 1")),
            Some(n) => n,
            None => inner.config.processing.default_concurrency,
        };

        let mut items = Vec::with_capacity(count);
        let mut inputs = Vec::with_capacity(count);
        for source in request.sources {
            let (source_ref, extension) = match &source.data {
                SourceData::Inline(bytes) => {
                    let extension = sniff_format(bytes)
                        .ok()
                        .and_then(|f| f.extensions_str().first().copied())
                        .unwrap_or(UNKNOWN_EXTENSION)
                        .to_string();
                    let source_ref = object_ref(Namespace::Sources, bytes, &extension)
                        .map_err(|e| BatchError::invalid("files", e.to_string()))?;
                    (source_ref, extension)
                }
                SourceData::Stored(uri) => (uri.clone(), String::new()),
            };
            items.push(JobItem::new(source_ref, source.file_name));
            inputs.push(ItemInput {
                data: source.data,
                extension,
            });
        }

        let admission = inner.pool.admit(concurrency, inner.config.submit_timeout()).await?;

        let job = BatchJob {
            id: Uuid::new_v4(),
            owner: request.owner,
            created_at: Utc::now(),
            finished_at: None,
            descriptor: descriptor.clone(),
            items,
            concurrency_limit: admission.concurrency_limit(),
            status: BatchStatus::Created,
        };
        let ticket = BatchTicket {
            batch_id: job.id,
            item_ids: job.items.iter().map(|i| i.id.clone()).collect(),
            fingerprint: descriptor.fingerprint(),
        };

        let handle = Arc::new(JobHandle {
            broadcaster: ProgressBroadcaster::new(count),
            cancel: CancellationToken::new(),
            descriptor: Arc::new(descriptor),
            started: Instant::now(),
            overlay: Mutex::new(overlay),
            job: Mutex::new(job),
        });

        self.prune_finished();
        inner.jobs.write().insert(ticket.batch_id, Arc::clone(&handle));
        tracing::info!(
            batch = %ticket.batch_id,
            items = count,
            concurrency = admission.concurrency_limit(),
            "Batch accepted"
        );

        tokio::spawn(run_batch(Arc::clone(&self.inner), handle, admission, inputs));
        Ok(ticket)
    }

    /// Returns the decoded overlay, which the batch keeps resident until it
    /// finishes.
    async fn check_watermark_assets(
        &self,
        descriptor: &TransformDescriptor,
    ) -> Result<Option<Arc<DynamicImage>>, BatchError> {
        if descriptor.text_watermark().is_some() && !self.inner.assets.has_font() {
            return Err(BatchError::invalid(
                "watermark_text",
                "no watermark font configured (watermark.font_path)",
            ));
        }
        match descriptor.overlay_ref() {
            Some(uri) => self
                .inner
                .assets
                .ensure_overlay(self.inner.store.as_ref(), uri)
                .await
                .map(Some)
                .map_err(|reason| BatchError::invalid("watermark_image", reason)),
            None => Ok(None),
        }
    }

    /// Store a watermark overlay and return the reference to pass as the
    /// `watermark_image` option.
    pub async fn upload_overlay(&self, bytes: Vec<u8>) -> Result<String, BatchError> {
        let format = sniff_format(&bytes)
            .map_err(|e| BatchError::invalid("watermark_image", e.to_string()))?;
        let extension = format
            .extensions_str()
            .first()
            .copied()
            .unwrap_or(UNKNOWN_EXTENSION);
        let uri = self
            .inner
            .store
            .put(Namespace::Sources, &bytes, extension)
            .await
            .map_err(|e| BatchError::invalid("watermark_image", e.to_string()))?;
        tracing::debug!(overlay = %uri, "Watermark overlay stored");
        Ok(uri)
    }

    /// Drop finished jobs older than the retention window.
    fn prune_finished(&self) {
        let retention = Duration::from_secs(self.inner.config.processing.job_retention_secs);
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return;
        };
        let cutoff = Utc::now() - retention;
        self.inner.jobs.write().retain(|_, handle| {
            handle
                .job
                .lock()
                .finished_at
                .map_or(true, |finished| finished > cutoff)
        });
    }

    fn handle(&self, id: Uuid) -> Result<Arc<JobHandle>, BatchError> {
        self.inner
            .jobs
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| BatchError::NotFound(id.to_string()))
    }

    /// Snapshot of a job.
    pub fn job(&self, id: Uuid) -> Result<BatchJob, BatchError> {
        Ok(self.handle(id)?.job.lock().clone())
    }

    /// Jobs still retained, oldest first, optionally for one owner.
    pub fn list(&self, owner: Option<&str>) -> Vec<BatchJob> {
        let mut jobs: Vec<BatchJob> = self
            .inner
            .jobs
            .read()
            .values()
            .map(|h| h.job.lock().clone())
            .filter(|j| owner.map_or(true, |o| j.owner == o))
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    /// Progress events of a batch: finished items so far, then live events,
    /// ending with the batch summary.
    pub fn subscribe(&self, id: Uuid) -> Result<Subscription, BatchError> {
        Ok(self.handle(id)?.broadcaster.subscribe())
    }

    /// Stop dispatching new items. Items already running finish normally.
    pub fn cancel(&self, id: Uuid) -> Result<(), BatchError> {
        let handle = self.handle(id)?;
        if !handle.cancel.is_cancelled() {
            tracing::info!(batch = %id, "Batch cancelled");
            handle.cancel.cancel();
        }
        Ok(())
    }

    /// Wait for a batch to finish.
    pub async fn wait(&self, id: Uuid) -> Result<BatchSummary, BatchError> {
        let handle = self.handle(id)?;
        let mut subscription = handle.broadcaster.subscribe();
        while let Some(event) = subscription.next().await {
            if let ProgressEvent::BatchFinished(summary) = event {
                return Ok(summary);
            }
        }
        handle
            .broadcaster
            .summary()
            .ok_or_else(|| BatchError::NotFinished(id.to_string()))
    }

    /// ZIP of every completed item's outputs.
    pub async fn archive(&self, id: Uuid) -> Result<Vec<u8>, BatchError> {
        let job = self.job(id)?;
        archive::build_zip(&job, self.inner.store.as_ref()).await
    }

    pub fn cache(&self) -> &Arc<CacheService> {
        &self.inner.cache
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.inner.metrics
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Stop admitting batches and dispatching items.
    pub fn shutdown(&self) {
        for handle in self.inner.jobs.read().values() {
            handle.cancel.cancel();
        }
        self.inner.pool.shutdown();
    }
}

/// Runtime state of one batch.
struct JobHandle {
    job: Mutex<BatchJob>,
    broadcaster: ProgressBroadcaster,
    cancel: CancellationToken,
    descriptor: Arc<TransformDescriptor>,
    started: Instant,
    overlay: Mutex<Option<Arc<DynamicImage>>>,
}

impl JobHandle {
    fn ensure_running(job: &mut BatchJob) {
        if job.status == BatchStatus::Created {
            job.advance(BatchStatus::Running);
        }
    }

    fn begin_item(&self, index: usize) {
        let mut job = self.job.lock();
        Self::ensure_running(&mut job);
        let item = &mut job.items[index];
        if item.advance(ItemStatus::Processing) {
            item.progress_percent = 0;
            self.broadcaster.publish(ProgressEvent::Started {
                item_id: item.id.clone(),
                current_file: item.file_name.clone(),
                percentage: 0,
            });
        }
    }

    fn stage_done(&self, index: usize, stage: &str, percentage: u8) {
        let mut job = self.job.lock();
        let item = &mut job.items[index];
        if item.status != ItemStatus::Processing {
            return;
        }
        item.progress_percent = percentage;
        self.broadcaster.publish(ProgressEvent::Progress {
            item_id: item.id.clone(),
            current_file: item.file_name.clone(),
            percentage,
            stage: stage.to_string(),
        });
    }

    fn complete_item(&self, index: usize, result: ItemResult) {
        let mut job = self.job.lock();
        let item = &mut job.items[index];
        if !item.advance(ItemStatus::Completed) {
            return;
        }
        item.progress_percent = 100;
        item.result = Some(result.clone());
        self.broadcaster.publish(ProgressEvent::Completed {
            item_id: item.id.clone(),
            current_file: item.file_name.clone(),
            percentage: 100,
            result,
        });
    }

    /// Pending to Completed for a cache hit, in one locked transition.
    fn complete_hit(&self, index: usize, result: ItemResult) {
        let mut job = self.job.lock();
        Self::ensure_running(&mut job);
        let item = &mut job.items[index];
        if !item.advance(ItemStatus::Processing) {
            return;
        }
        self.broadcaster.publish(ProgressEvent::Started {
            item_id: item.id.clone(),
            current_file: item.file_name.clone(),
            percentage: 0,
        });
        if item.advance(ItemStatus::Completed) {
            item.progress_percent = 100;
            item.result = Some(result.clone());
            self.broadcaster.publish(ProgressEvent::Completed {
                item_id: item.id.clone(),
                current_file: item.file_name.clone(),
                percentage: 100,
                result,
            });
        }
    }

    fn fail_item(&self, index: usize, err: &ItemError) {
        let mut job = self.job.lock();
        Self::fail_locked(&self.broadcaster, &mut job.items[index], err);
    }

    fn fail_locked(broadcaster: &ProgressBroadcaster, item: &mut JobItem, err: &ItemError) {
        if !item.advance(ItemStatus::Failed) {
            return;
        }
        let failure = ItemFailure::from(err);
        item.progress_percent = 100;
        item.error = Some(failure.clone());
        broadcaster.publish(ProgressEvent::Failed {
            item_id: item.id.clone(),
            current_file: item.file_name.clone(),
            percentage: 100,
            error: failure,
        });
    }

    fn batch_id(&self) -> Uuid {
        self.job.lock().id
    }
}

async fn run_batch(
    inner: Arc<Inner>,
    handle: Arc<JobHandle>,
    admission: BatchAdmission,
    inputs: Vec<ItemInput>,
) {
    let batch_id = handle.batch_id();
    let mut tasks = JoinSet::new();

    for (index, input) in inputs.into_iter().enumerate() {
        if handle.cancel.is_cancelled() {
            record_failure(&inner, &handle, index, ItemError::Cancelled, Duration::ZERO);
            continue;
        }

        let item_started = Instant::now();
        let source = match load_source(&inner, input).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(batch = %batch_id, index, error = %e, "Source unavailable");
                record_failure(&inner, &handle, index, e, item_started.elapsed());
                continue;
            }
        };
        let source_hash = content_hash_from_bytes(&source);

        // Hits hold a slot too, so Processing never exceeds the batch limit
        let slot = tokio::select! {
            _ = handle.cancel.cancelled() => None,
            slot = admission.slot() => slot,
        };
        let Some(slot) = slot else {
            record_failure(&inner, &handle, index, ItemError::Cancelled, item_started.elapsed());
            continue;
        };

        if let Some(entry) = inner.cache.get(&source_hash, &handle.descriptor).await {
            let elapsed = item_started.elapsed();
            let result = ItemResult::new(
                entry.artifacts,
                source.len() as u64,
                true,
                elapsed.as_millis() as u64,
            );
            handle.complete_hit(index, result);
            inner.metrics.record_item(ItemOutcome {
                success: true,
                cache_hit: true,
                elapsed,
                error_kind: None,
            });
            drop(slot);
            continue;
        }

        handle.begin_item(index);
        tasks.spawn(process_item(
            Arc::clone(&inner),
            Arc::clone(&handle),
            index,
            source,
            source_hash,
            slot,
            item_started,
        ));
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!(batch = %batch_id, error = %e, "Item task failed");
        }
    }
    drop(admission);

    finish_batch(&inner, &handle).await;
}

async fn load_source(inner: &Inner, input: ItemInput) -> Result<Vec<u8>, ItemError> {
    match input.data {
        SourceData::Inline(bytes) => {
            inner
                .store
                .put(Namespace::Sources, &bytes, &input.extension)
                .await?;
            Ok(bytes)
        }
        SourceData::Stored(uri) => Ok(inner.store.get(&uri).await?),
    }
}

fn record_failure(inner: &Inner, handle: &JobHandle, index: usize, err: ItemError, elapsed: Duration) {
    handle.fail_item(index, &err);
    inner.metrics.record_item(ItemOutcome {
        success: false,
        cache_hit: false,
        elapsed,
        error_kind: Some(err.kind()),
    });
}

async fn process_item(
    inner: Arc<Inner>,
    handle: Arc<JobHandle>,
    index: usize,
    source: Vec<u8>,
    source_hash: String,
    slot: WorkerSlot,
    started: Instant,
) {
    let original_size = source.len() as u64;
    let slot = Arc::new(slot);
    let outcome = transform_and_store(&inner, &handle, index, source, Arc::clone(&slot)).await;

    match outcome {
        Ok(artifacts) => {
            inner
                .cache
                .put(&source_hash, &handle.descriptor, artifacts.clone())
                .await;
            let elapsed = started.elapsed();
            handle.complete_item(
                index,
                ItemResult::new(artifacts, original_size, false, elapsed.as_millis() as u64),
            );
            inner.metrics.record_item(ItemOutcome {
                success: true,
                cache_hit: false,
                elapsed,
                error_kind: None,
            });
        }
        Err(e) => {
            tracing::debug!(index, error = %e, "Item failed");
            record_failure(&inner, &handle, index, e, started.elapsed());
        }
    }
    // Released once the item is terminal and no stage task still holds it
    drop(slot);
}

async fn transform_and_store(
    inner: &Inner,
    handle: &JobHandle,
    index: usize,
    source: Vec<u8>,
    slot: Arc<WorkerSlot>,
) -> Result<Vec<ArtifactRef>, ItemError> {
    let output = inner
        .executor
        .run_holding(source, Arc::clone(&handle.descriptor), slot, |report| {
            inner.metrics.record_stage(report.stage, report.elapsed);
            handle.stage_done(index, report.stage, report.percentage);
        })
        .await?;

    let mut artifacts = Vec::with_capacity(output.outputs.len());
    for encoded in output.outputs {
        let uri = inner
            .store
            .put(Namespace::Artifacts, &encoded.bytes, encoded.format.extension())
            .await?;
        artifacts.push(ArtifactRef {
            uri,
            role: encoded.role,
            format: encoded.format,
            width: encoded.width,
            height: encoded.height,
            size_bytes: encoded.bytes.len() as u64,
        });
    }
    Ok(artifacts)
}

async fn finish_batch(inner: &Inner, handle: &JobHandle) {
    let summary = {
        let mut job = handle.job.lock();
        let stranded = ItemError::encode("worker", "item task ended without a result");
        for item in job.items.iter_mut().filter(|i| !i.status.is_terminal()) {
            JobHandle::fail_locked(&handle.broadcaster, item, &stranded);
        }
        JobHandle::ensure_running(&mut job);
        if let Some(status) = job.derived_terminal_status() {
            job.advance(status);
        }
        job.finished_at = Some(Utc::now());
        job.summary(handle.started.elapsed().as_millis() as u64)
    };

    tracing::info!(
        batch = %summary.batch_id,
        status = ?summary.status,
        succeeded = summary.succeeded,
        failed = summary.failed,
        cache_hits = summary.cache_hits,
        elapsed_ms = summary.elapsed_ms,
        "Batch finished"
    );
    handle.overlay.lock().take();
    inner.metrics.record_job(inner.cache.stats().await);
    handle.broadcaster.publish(ProgressEvent::BatchFinished(summary));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheTier, MemoryTier};
    use crate::job::SourceImage;
    use crate::pipeline::testing::png_bytes;
    use crate::store::MemoryStore;
    use crate::transform::TransformRequest;
    use std::collections::BTreeMap;

    fn coordinator_with(config: Config) -> Coordinator {
        let store: Arc<dyn ArtifactStore> = Arc::new(MemoryStore::new());
        let local: Arc<dyn CacheTier> = Arc::new(MemoryTier::new(100, 64 * 1024 * 1024));
        let assets = Arc::new(WatermarkAssets::default());
        Coordinator::new(
            config.clone(),
            CoordinatorParts {
                cache: Arc::new(CacheService::new(Some(local), None).with_store(Arc::clone(&store))),
                store,
                pool: Arc::new(WorkerPool::from_config(&config.processing)),
                executor: Arc::new(PipelineExecutor::standard(&config, Arc::clone(&assets))),
                assets,
                metrics: Arc::new(MetricsCollector::new(config.metrics.history_size)),
            },
        )
    }

    fn coordinator() -> Coordinator {
        coordinator_with(Config::default())
    }

    fn options(pairs: &[(&str, &str)]) -> TransformRequest {
        TransformRequest::Options(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn request(sources: Vec<SourceImage>) -> BatchRequest {
        BatchRequest {
            owner: "alice".into(),
            sources,
            transform: options(&[("width", "16"), ("format", "png")]),
            concurrency: Some(2),
        }
    }

    #[tokio::test]
    async fn test_rejects_empty_and_oversized_batches() {
        let coordinator = coordinator();
        let err = coordinator.submit(request(vec![])).await.unwrap_err();
        assert_eq!(err, BatchError::EmptyBatch);

        let sources = (0..21)
            .map(|i| SourceImage::inline(format!("{i}.png"), png_bytes(2, 2)))
            .collect();
        let err = coordinator.submit(request(sources)).await.unwrap_err();
        assert_eq!(err, BatchError::TooManyItems { count: 21, max: 20 });
    }

    #[tokio::test]
    async fn test_invalid_options_fail_fast() {
        let coordinator = coordinator();
        let mut req = request(vec![SourceImage::inline("a.png", png_bytes(4, 4))]);
        req.transform = options(&[("quality", "0")]);
        let err = coordinator.submit(req).await.unwrap_err();
        assert!(matches!(err, BatchError::InvalidSpecification { ref field, .. } if field == "quality"));
        assert!(coordinator.list(None).is_empty());
    }

    #[tokio::test]
    async fn test_text_watermark_requires_font() {
        let coordinator = coordinator();
        let mut req = request(vec![SourceImage::inline("a.png", png_bytes(4, 4))]);
        req.transform = options(&[("watermark_text", "hello")]);
        let err = coordinator.submit(req).await.unwrap_err();
        assert!(matches!(err, BatchError::InvalidSpecification { ref field, .. } if field == "watermark_text"));
    }

    #[tokio::test]
    async fn test_uploaded_overlay_is_usable() {
        let coordinator = coordinator();
        let uri = coordinator.upload_overlay(png_bytes(4, 4)).await.unwrap();
        assert!(uri.starts_with("sources/") && uri.ends_with(".png"));

        let mut req = request(vec![SourceImage::inline("a.png", png_bytes(16, 16))]);
        req.transform = options(&[("watermark_image", uri.as_str()), ("format", "png")]);
        let ticket = coordinator.submit(req).await.unwrap();
        let summary = coordinator.wait(ticket.batch_id).await.unwrap();
        assert_eq!(summary.succeeded, 1);

        let err = coordinator.upload_overlay(b"nope".to_vec()).await.unwrap_err();
        assert!(matches!(err, BatchError::InvalidSpecification { ref field, .. } if field == "watermark_image"));
    }

    #[tokio::test]
    async fn test_zero_concurrency_rejected() {
        let coordinator = coordinator();
        let mut req = request(vec![SourceImage::inline("a.png", png_bytes(4, 4))]);
        req.concurrency = Some(0);
        let err = coordinator.submit(req).await.unwrap_err();
        assert!(matches!(err, BatchError::InvalidSpecification { ref field, .. } if field == "concurrency"));
    }

    #[tokio::test]
    async fn test_batch_runs_to_completion() {
        let coordinator = coordinator();
        let ticket = coordinator
            .submit(request(vec![
                SourceImage::inline("a.png", png_bytes(32, 16)),
                SourceImage::inline("b.png", png_bytes(16, 16)),
            ]))
            .await
            .unwrap();
        assert_eq!(ticket.item_ids.len(), 2);

        let summary = coordinator.wait(ticket.batch_id).await.unwrap();
        assert_eq!(summary.status, BatchStatus::Completed);
        assert_eq!(summary.succeeded, 2);

        let job = coordinator.job(ticket.batch_id).unwrap();
        assert!(job.finished_at.is_some());
        let result = job.items[0].result.as_ref().unwrap();
        assert_eq!((result.width, result.height), (16, 8));
        assert!(coordinator.store().exists(&result.artifacts[0].uri).await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_item_is_isolated() {
        let coordinator = coordinator();
        let ticket = coordinator
            .submit(request(vec![
                SourceImage::inline("good.png", png_bytes(8, 8)),
                SourceImage::inline("bad.png", Vec::new()),
            ]))
            .await
            .unwrap();

        let summary = coordinator.wait(ticket.batch_id).await.unwrap();
        assert_eq!(summary.status, BatchStatus::PartiallyFailed);

        let job = coordinator.job(ticket.batch_id).unwrap();
        assert_eq!(job.items[0].status, ItemStatus::Completed);
        assert_eq!(job.items[1].status, ItemStatus::Failed);
        assert_eq!(job.items[1].error.as_ref().unwrap().kind, "CorruptInput");
    }

    #[tokio::test]
    async fn test_missing_stored_source_fails_item() {
        let coordinator = coordinator();
        let ticket = coordinator
            .submit(request(vec![SourceImage::stored("x.png", "sources/missing.png")]))
            .await
            .unwrap();

        let summary = coordinator.wait(ticket.batch_id).await.unwrap();
        assert_eq!(summary.status, BatchStatus::Failed);
        let job = coordinator.job(ticket.batch_id).unwrap();
        assert_eq!(job.items[0].error.as_ref().unwrap().kind, "Storage");
    }

    #[tokio::test]
    async fn test_events_end_with_summary() {
        let coordinator = coordinator();
        let ticket = coordinator
            .submit(request(vec![SourceImage::inline("a.png", png_bytes(8, 8))]))
            .await
            .unwrap();

        let events = coordinator
            .subscribe(ticket.batch_id)
            .unwrap()
            .collect()
            .await;
        assert!(events.last().unwrap().is_batch_finished());
        assert_eq!(events.iter().filter(|e| e.is_item_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_batch() {
        let coordinator = coordinator();
        let id = Uuid::new_v4();
        assert!(matches!(coordinator.job(id), Err(BatchError::NotFound(_))));
        assert!(matches!(coordinator.cancel(id), Err(BatchError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_filters_by_owner() {
        let coordinator = coordinator();
        let ticket = coordinator
            .submit(request(vec![SourceImage::inline("a.png", png_bytes(4, 4))]))
            .await
            .unwrap();
        coordinator.wait(ticket.batch_id).await.unwrap();

        assert_eq!(coordinator.list(Some("alice")).len(), 1);
        assert!(coordinator.list(Some("bob")).is_empty());
    }

    #[tokio::test]
    async fn test_metrics_recorded_per_job() {
        let coordinator = coordinator();
        let ticket = coordinator
            .submit(request(vec![SourceImage::inline("a.png", png_bytes(4, 4))]))
            .await
            .unwrap();
        coordinator.wait(ticket.batch_id).await.unwrap();

        let latest = coordinator.metrics().latest().unwrap();
        assert_eq!(latest.jobs, 1);
        assert_eq!(latest.total_requests, 1);
        assert!(latest.avg_stage_ms.contains_key("decode"));
    }
}
