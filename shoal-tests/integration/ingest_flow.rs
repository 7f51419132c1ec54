//! Ingestion pipeline integration: staging, addressing, dedup, persistence

use std::sync::Arc;

use shoal_core::content::ContentRegistry;
use shoal_core::ingest::{IngestError, IngestRequest};
use shoal_core::{ShoalEngine, ShoalError};
use tempfile::TempDir;

use crate::harness::{ScriptedDiscovery, start_engine, test_config, write_video};

async fn staged_upload_count(engine: &ShoalEngine) -> usize {
    let staging = engine.config().storage.staging_dir();
    let mut count = 0;
    if let Ok(mut entries) = tokio::fs::read_dir(&staging).await {
        while let Ok(Some(_)) = entries.next_entry().await {
            count += 1;
        }
    }
    count
}

#[tokio::test]
async fn test_ten_megabyte_ingest_and_dedup() {
    let dir = TempDir::new().unwrap();
    let engine = start_engine(&dir, Arc::new(ScriptedDiscovery::healthy())).await;

    let path = write_video(&dir, "clip.mp4", 10 * 1024 * 1024).await;
    let first = engine.ingest_file(&path, None).await.unwrap();

    assert!(!first.deduplicated);
    assert_eq!(first.descriptor.content_id.to_string().len(), 40);
    assert_eq!(first.descriptor.size, 10 * 1024 * 1024);
    assert_eq!(first.descriptor.chunk_hashes.len(), 40); // 10 MiB / 256 KiB

    // Same bytes under another name resolve to the registered entry
    let copy = write_video(&dir, "copy-of-clip.mp4", 10 * 1024 * 1024).await;
    let second = engine.ingest_file(&copy, None).await.unwrap();

    assert!(second.deduplicated);
    assert_eq!(second.descriptor.content_id, first.descriptor.content_id);
    assert_eq!(second.descriptor.file_name, "clip.mp4");
    assert_eq!(engine.content_list().await.len(), 1);

    // Only one stored copy exists in the library
    let content_dir = engine
        .config()
        .storage
        .library_dir
        .join(first.descriptor.content_id.to_string());
    let mut entries = tokio::fs::read_dir(&content_dir).await.unwrap();
    let mut stored = 0;
    while let Ok(Some(_)) = entries.next_entry().await {
        stored += 1;
        if stored > 1 {
            break;
        }
    }
    assert_eq!(stored, 1);
    assert_eq!(staged_upload_count(&engine).await, 0);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_declared_size_over_cap_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.ingest.max_upload_bytes = 500 * 1024 * 1024;
    let engine = Arc::new(
        ShoalEngine::start(config, Arc::new(ScriptedDiscovery::healthy()))
            .await
            .unwrap(),
    );

    let result = engine
        .begin_ingest(IngestRequest {
            file_name: "huge.mp4".to_string(),
            declared_size: Some(600 * 1024 * 1024),
            media_type: Some("video/mp4".to_string()),
        })
        .await;

    assert!(matches!(
        result,
        Err(ShoalError::Ingest(IngestError::Validation { .. }))
    ));
    assert_eq!(staged_upload_count(&engine).await, 0);
    assert!(engine.content_list().await.is_empty());

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_midstream_overflow_cleans_staging() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.ingest.max_upload_bytes = 100 * 1024;
    let engine = Arc::new(
        ShoalEngine::start(config, Arc::new(ScriptedDiscovery::healthy()))
            .await
            .unwrap(),
    );

    let mut staged = engine
        .begin_ingest(IngestRequest {
            file_name: "clip.mp4".to_string(),
            declared_size: None,
            media_type: Some("video/mp4".to_string()),
        })
        .await
        .unwrap();

    staged.write_chunk(&[1u8; 80 * 1024]).await.unwrap();
    let overflow = staged.write_chunk(&[1u8; 80 * 1024]).await;
    assert!(matches!(
        overflow,
        Err(IngestError::Validation { .. })
    ));

    drop(staged);
    assert_eq!(staged_upload_count(&engine).await, 0);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rejected_media_type() {
    let dir = TempDir::new().unwrap();
    let engine = start_engine(&dir, Arc::new(ScriptedDiscovery::healthy())).await;

    let path = write_video(&dir, "document.pdf", 4096).await;
    let result = engine.ingest_file(&path, None).await;

    assert!(matches!(
        result,
        Err(ShoalError::Ingest(IngestError::Validation { .. }))
    ));
    assert!(engine.content_list().await.is_empty());

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_empty_upload_rejected_at_finish() {
    let dir = TempDir::new().unwrap();
    let engine = start_engine(&dir, Arc::new(ScriptedDiscovery::healthy())).await;

    let staged = engine
        .begin_ingest(IngestRequest {
            file_name: "clip.mp4".to_string(),
            declared_size: None,
            media_type: Some("video/mp4".to_string()),
        })
        .await
        .unwrap();

    let result = staged.finish().await;
    assert!(matches!(result, Err(IngestError::Validation { .. })));
    assert_eq!(staged_upload_count(&engine).await, 0);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_registry_survives_restart_with_same_locator() {
    let dir = TempDir::new().unwrap();

    let (content_id, locator) = {
        let engine = start_engine(&dir, Arc::new(ScriptedDiscovery::healthy())).await;
        let path = write_video(&dir, "clip.mp4", 256 * 1024).await;
        let outcome = engine.ingest_file(&path, None).await.unwrap();
        let locator = outcome.descriptor.locator.clone();
        engine.shutdown().await.unwrap();
        (outcome.descriptor.content_id, locator)
    };

    // A bare registry load sees the same entry the engine registered
    let config = test_config(&dir);
    let registry = ContentRegistry::load(&config.storage).await.unwrap();
    let descriptor = registry.lookup(content_id).await.unwrap();
    assert_eq!(descriptor.locator, locator);
    assert_eq!(descriptor.file_name, "clip.mp4");

    // And a restarted engine serves it through the facade
    let engine = start_engine(&dir, Arc::new(ScriptedDiscovery::healthy())).await;
    assert_eq!(engine.locator(content_id).await.unwrap(), locator);
    assert_eq!(engine.content_list().await.len(), 1);

    engine.shutdown().await.unwrap();
}
