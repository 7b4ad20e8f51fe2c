//! End-to-end batch scenarios against an in-memory store.

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use prism_core::cache::{CacheTier, MemoryTier};
use prism_core::config::Config;
use prism_core::error::PipelineResult;
use prism_core::pipeline::decode::DecodeStage;
use prism_core::pipeline::encode::EncodeStage;
use prism_core::pipeline::{Frame, PipelineExecutor, Stage};
use prism_core::{
    BatchRequest, BatchStatus, CacheService, ItemStatus, MemoryStore, Prism, ProgressEvent,
    SourceImage, TransformDescriptor, TransformRequest,
};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn image_bytes(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let mut img = RgbImage::new(width, height);
    for (x, y, px) in img.enumerate_pixels_mut() {
        *px = Rgb([(x * 7 % 256) as u8, (y * 3 % 256) as u8, 128]);
    }
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, format)
        .unwrap();
    buf.into_inner()
}

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    image_bytes(width, height, ImageFormat::Jpeg)
}

fn prism() -> Prism {
    let local: Arc<dyn CacheTier> = Arc::new(MemoryTier::new(100, 64 * 1024 * 1024));
    Prism::builder(Config::default())
        .store(Arc::new(MemoryStore::new()))
        .cache(CacheService::new(Some(local), None))
        .build()
        .unwrap()
}

fn options(pairs: &[(&str, &str)]) -> TransformRequest {
    TransformRequest::Options(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
    )
}

fn request(sources: Vec<SourceImage>, transform: TransformRequest, concurrency: usize) -> BatchRequest {
    BatchRequest {
        owner: "tester".to_string(),
        sources,
        transform,
        concurrency: Some(concurrency),
    }
}

#[tokio::test]
async fn web_optimized_batch_with_empty_file() {
    let prism = prism();
    let coordinator = prism.coordinator();
    let ticket = coordinator
        .submit(request(
            vec![
                SourceImage::inline("one.jpg", jpeg(64, 48)),
                SourceImage::inline("two.jpg", Vec::new()),
                SourceImage::inline("three.jpg", jpeg(48, 64)),
            ],
            TransformRequest::Preset("web-optimized".to_string()),
            2,
        ))
        .await
        .unwrap();
    let events = coordinator
        .subscribe(ticket.batch_id)
        .unwrap()
        .collect()
        .await;

    let started = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::Started { .. }))
        .count();
    assert_eq!(started, 3);
    assert!(events
        .iter()
        .any(|e| matches!(e, ProgressEvent::Progress { .. })));
    assert_eq!(events.iter().filter(|e| e.is_item_terminal()).count(), 3);

    let Some(ProgressEvent::BatchFinished(summary)) = events.last() else {
        panic!("stream must end with the batch summary");
    };
    assert_eq!(summary.total_processed, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.status, BatchStatus::PartiallyFailed);

    let failed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Failed { item_id, error, .. } => Some((item_id.clone(), error.kind.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec![(ticket.item_ids[1].clone(), "CorruptInput".to_string())]);

    let job = coordinator.job(ticket.batch_id).unwrap();
    assert_eq!(job.status, BatchStatus::PartiallyFailed);
    let statuses: Vec<_> = job.items.iter().map(|i| i.status).collect();
    assert_eq!(
        statuses,
        vec![ItemStatus::Completed, ItemStatus::Failed, ItemStatus::Completed]
    );
    let result = job.items[0].result.as_ref().unwrap();
    assert_eq!(result.artifacts[0].format.extension(), "webp");
    assert_eq!((result.width, result.height), (64, 48));
}

#[tokio::test]
async fn repeated_submission_hits_cache() {
    let prism = prism();
    let coordinator = prism.coordinator();
    let transform = || options(&[("width", "32"), ("format", "png")]);

    let first = coordinator
        .submit(request(vec![SourceImage::inline("a.png", jpeg(64, 64))], transform(), 1))
        .await
        .unwrap();
    let first_summary = coordinator.wait(first.batch_id).await.unwrap();
    assert_eq!(first_summary.cache_hits, 0);

    let second = coordinator
        .submit(request(vec![SourceImage::inline("a.png", jpeg(64, 64))], transform(), 1))
        .await
        .unwrap();
    let second_summary = coordinator.wait(second.batch_id).await.unwrap();
    assert_eq!(second_summary.status, BatchStatus::Completed);
    assert_eq!(second_summary.cache_hits, 1);

    let a = coordinator.job(first.batch_id).unwrap().items[0].result.clone().unwrap();
    let b = coordinator.job(second.batch_id).unwrap().items[0].result.clone().unwrap();
    assert!(!a.cache_hit);
    assert!(b.cache_hit);
    assert_eq!(a.artifacts, b.artifacts);

    let stats = coordinator.cache().stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn equivalent_options_share_a_fingerprint() {
    let prism = prism();
    let coordinator = prism.coordinator();
    let source = || vec![SourceImage::inline("a.jpg", jpeg(8, 8))];

    let a = coordinator
        .submit(request(source(), options(&[("width", "100"), ("format", "jpeg"), ("quality", "80")]), 1))
        .await
        .unwrap();
    let b = coordinator
        .submit(request(source(), options(&[("Quality", "080"), ("FORMAT", "jpeg"), ("width", "100")]), 1))
        .await
        .unwrap();
    let c = coordinator
        .submit(request(source(), options(&[("width", "100"), ("format", "jpeg"), ("quality", "81")]), 1))
        .await
        .unwrap();

    assert_eq!(a.fingerprint, b.fingerprint);
    assert_ne!(a.fingerprint, c.fingerprint);
}

#[tokio::test]
async fn same_input_same_output_across_instances() {
    let transform = || options(&[("width", "40"), ("height", "40"), ("fit", "cover"), ("format", "webp")]);
    let source = jpeg(80, 60);

    let mut uris = Vec::new();
    for _ in 0..2 {
        let prism = prism();
        let ticket = prism
            .coordinator()
            .submit(request(vec![SourceImage::inline("a.jpg", source.clone())], transform(), 1))
            .await
            .unwrap();
        prism.coordinator().wait(ticket.batch_id).await.unwrap();
        let job = prism.coordinator().job(ticket.batch_id).unwrap();
        let result = job.items[0].result.clone().unwrap();
        assert_eq!((result.width, result.height), (40, 40));
        uris.push(result.artifacts[0].uri.clone());
    }
    // Artifact references are content hashes, so equal refs mean equal bytes
    assert_eq!(uris[0], uris[1]);
}

/// Counts how many frames are inside it at once.
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Stage for Gauge {
    fn name(&self) -> &'static str {
        "gauge"
    }

    fn apply(&self, frame: Frame, _: &TransformDescriptor) -> PipelineResult<Frame> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(frame)
    }
}

#[tokio::test]
async fn per_batch_concurrency_is_bounded() {
    let config = Config::default();
    let gauge = Arc::new(Gauge {
        current: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let executor = PipelineExecutor::new(
        vec![
            gauge.clone() as Arc<dyn Stage>,
            Arc::new(DecodeStage::new(&config.limits)),
            Arc::new(EncodeStage),
        ],
        config.stage_timeout(),
    );
    let prism = Prism::builder(config)
        .store(Arc::new(MemoryStore::new()))
        .cache(CacheService::new(None, None))
        .executor(executor)
        .build()
        .unwrap();

    let sources = (0..6)
        .map(|i| SourceImage::inline(format!("{i}.png"), image_bytes(8 + i, 8, ImageFormat::Png)))
        .collect();
    let ticket = prism
        .coordinator()
        .submit(request(sources, options(&[("format", "png")]), 2))
        .await
        .unwrap();
    let summary = prism.coordinator().wait(ticket.batch_id).await.unwrap();

    assert_eq!(summary.succeeded, 6);
    let peak = gauge.peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak in flight was {peak}");
    assert!(peak >= 1);
}

/// Holds every frame for a while.
struct Slow;

impl Stage for Slow {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn apply(&self, frame: Frame, _: &TransformDescriptor) -> PipelineResult<Frame> {
        std::thread::sleep(Duration::from_millis(150));
        Ok(frame)
    }
}

#[tokio::test]
async fn cache_hit_waits_for_a_slot() {
    let config = Config::default();
    let executor = PipelineExecutor::new(
        vec![
            Arc::new(Slow) as Arc<dyn Stage>,
            Arc::new(DecodeStage::new(&config.limits)),
            Arc::new(EncodeStage),
        ],
        config.stage_timeout(),
    );
    let local: Arc<dyn CacheTier> = Arc::new(MemoryTier::new(100, 64 * 1024 * 1024));
    let prism = Prism::builder(config)
        .store(Arc::new(MemoryStore::new()))
        .cache(CacheService::new(Some(local), None))
        .executor(executor)
        .build()
        .unwrap();
    let coordinator = prism.coordinator();
    let transform = || options(&[("format", "png")]);

    let warm = coordinator
        .submit(request(
            vec![SourceImage::inline("b.png", image_bytes(12, 12, ImageFormat::Png))],
            transform(),
            1,
        ))
        .await
        .unwrap();
    coordinator.wait(warm.batch_id).await.unwrap();

    let ticket = coordinator
        .submit(request(
            vec![
                SourceImage::inline("a.png", image_bytes(20, 20, ImageFormat::Png)),
                SourceImage::inline("b.png", image_bytes(12, 12, ImageFormat::Png)),
            ],
            transform(),
            1,
        ))
        .await
        .unwrap();
    let events = coordinator.subscribe(ticket.batch_id).unwrap().collect().await;

    let mut processing = 0usize;
    let mut peak = 0usize;
    for event in &events {
        if matches!(event, ProgressEvent::Started { .. }) {
            processing += 1;
            peak = peak.max(processing);
        } else if event.is_item_terminal() {
            processing -= 1;
        }
    }
    assert_eq!(peak, 1, "events: {events:?}");

    let summary = coordinator.wait(ticket.batch_id).await.unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.cache_hits, 1);
    let job = coordinator.job(ticket.batch_id).unwrap();
    assert!(job.items[1].result.as_ref().unwrap().cache_hit);
}

#[tokio::test]
async fn cancelled_batch_dispatches_nothing() {
    let prism = prism();
    let coordinator = prism.coordinator();
    let sources = (0..4)
        .map(|i| SourceImage::inline(format!("{i}.jpg"), jpeg(16 + i, 16)))
        .collect();
    let ticket = coordinator
        .submit(request(sources, options(&[("format", "png")]), 1))
        .await
        .unwrap();
    // The run task has not been polled yet on this runtime
    coordinator.cancel(ticket.batch_id).unwrap();

    let summary = coordinator.wait(ticket.batch_id).await.unwrap();
    assert_eq!(summary.status, BatchStatus::Failed);
    let job = coordinator.job(ticket.batch_id).unwrap();
    assert!(job
        .items
        .iter()
        .all(|i| i.error.as_ref().is_some_and(|e| e.kind == "Cancelled")));
}

#[tokio::test]
async fn archive_after_finish() {
    let prism = prism();
    let coordinator = prism.coordinator();
    let ticket = coordinator
        .submit(request(
            vec![
                SourceImage::inline("cat.jpg", jpeg(64, 32)),
                SourceImage::inline("dog.jpg", jpeg(32, 64)),
            ],
            options(&[("format", "jpeg"), ("thumbnails", "small")]),
            2,
        ))
        .await
        .unwrap();
    coordinator.wait(ticket.batch_id).await.unwrap();

    let bytes = coordinator.archive(ticket.batch_id).await.unwrap();
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "cat/primary.jpg",
            "cat/thumb-small.jpg",
            "dog/primary.jpg",
            "dog/thumb-small.jpg",
            "manifest.json",
        ]
    );
}
