//! Two-tier cache behavior on a real filesystem.

use image::{DynamicImage, ImageFormat, RgbImage};
use prism_core::cache::{CacheKey, CacheTier, DiskTier, MemoryTier, TierKind};
use prism_core::config::Config;
use prism_core::store::{ArtifactRef, ArtifactRole};
use prism_core::transform::OutputFormat;
use prism_core::{BatchRequest, CacheService, FsStore, Prism, SourceImage, TransformRequest};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn two_tier_prism(root: &Path) -> Prism {
    let local: Arc<dyn CacheTier> = Arc::new(MemoryTier::new(100, 64 * 1024 * 1024));
    let shared: Arc<dyn CacheTier> = Arc::new(DiskTier::new(root.join("cache")));
    Prism::builder(Config::default())
        .store(Arc::new(FsStore::new(root.join("store"))))
        .cache(CacheService::new(Some(local), Some(shared)))
        .build()
        .unwrap()
}

async fn run_once(prism: &Prism, bytes: Vec<u8>) -> prism_core::BatchSummary {
    let ticket = prism
        .coordinator()
        .submit(BatchRequest {
            owner: "tester".to_string(),
            sources: vec![SourceImage::inline("a.png", bytes)],
            transform: TransformRequest::Preset("thumbnail".to_string()),
            concurrency: None,
        })
        .await
        .unwrap();
    prism.coordinator().wait(ticket.batch_id).await.unwrap()
}

#[tokio::test]
async fn shared_tier_survives_restart_and_promotes() {
    let dir = tempfile::tempdir().unwrap();

    let first = two_tier_prism(dir.path());
    assert_eq!(run_once(&first, png(400, 200)).await.cache_hits, 0);
    drop(first);

    // Fresh process: empty local tier, same shared directory and store
    let second = two_tier_prism(dir.path());
    assert_eq!(run_once(&second, png(400, 200)).await.cache_hits, 1);
    let stats = second.coordinator().cache().stats().await;
    assert_eq!(stats.shared_hits, 1);
    assert_eq!(stats.local.unwrap().entries, 1);

    assert_eq!(run_once(&second, png(400, 200)).await.cache_hits, 1);
    assert_eq!(second.coordinator().cache().stats().await.local_hits, 1);
}

#[tokio::test]
async fn vanished_artifacts_are_reprocessed() {
    let dir = tempfile::tempdir().unwrap();
    let prism = two_tier_prism(dir.path());
    run_once(&prism, png(64, 64)).await;

    std::fs::remove_dir_all(dir.path().join("store").join("artifacts")).unwrap();

    let summary = run_once(&prism, png(64, 64)).await;
    assert_eq!(summary.cache_hits, 0);
    assert_eq!(summary.succeeded, 1);
    assert!(prism.coordinator().cache().stats().await.stale >= 1);
}

#[tokio::test]
async fn repeated_put_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let tier = DiskTier::new(dir.path());
    assert_eq!(tier.kind(), TierKind::Shared);

    let artifact = ArtifactRef {
        uri: "artifacts/abc.png".to_string(),
        role: ArtifactRole::Primary,
        format: OutputFormat::Png,
        width: 1,
        height: 1,
        size_bytes: 10,
    };
    let service = CacheService::new(None, Some(Arc::new(tier)));
    let descriptor = prism_core::transform::TransformResolver::new()
        .resolve(&TransformRequest::Preset("thumbnail".to_string()))
        .unwrap();

    let first = service.put("abc", &descriptor, vec![artifact.clone()]).await;
    let before = service.stats().await.shared.unwrap();
    service.put("abc", &descriptor, vec![artifact]).await;
    let after = service.stats().await.shared.unwrap();
    assert_eq!(before.entries, 1);
    assert_eq!(before.entries, after.entries);
    assert_eq!(before.bytes, after.bytes);

    let hit = service.get("abc", &descriptor).await.unwrap();
    assert_eq!(hit.key, first.key);
    assert_eq!(hit.key, CacheKey::for_descriptor("abc", &descriptor));
}

#[tokio::test]
async fn clear_by_source_scope() {
    let dir = tempfile::tempdir().unwrap();
    let prism = two_tier_prism(dir.path());
    run_once(&prism, png(10, 10)).await;
    run_once(&prism, png(20, 20)).await;

    let source_hash = prism_core::pipeline::hash::content_hash_from_bytes(&png(10, 10));
    let report = prism
        .coordinator()
        .cache()
        .clear(Some(&format!("transform:{source_hash}")))
        .await;
    assert_eq!(report.local_removed, 1);
    assert_eq!(report.shared_removed, 1);

    let stats = prism.coordinator().cache().stats().await;
    assert_eq!(stats.local.unwrap().entries, 1);
    assert_eq!(stats.shared.unwrap().entries, 1);
}
