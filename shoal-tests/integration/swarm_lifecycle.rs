//! Swarm session lifecycle: idempotent starts, stop conflicts, degradation

use std::sync::Arc;
use std::time::Duration;

use shoal_core::swarm::{ConnectionKind, SessionState};
use shoal_core::{ShoalError, SwarmError};
use tempfile::TempDir;

use crate::harness::{
    ScriptedDiscovery, ingest_video, session_handle, start_engine, start_when_ready,
    wait_for_state,
};

#[tokio::test]
async fn test_start_seeding_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let engine = start_engine(&dir, Arc::new(ScriptedDiscovery::healthy())).await;
    let content_id = ingest_video(&engine, &dir, "clip.mp4", 128 * 1024).await;

    let first = engine.start_seeding(content_id).await.unwrap();
    let second = engine.start_seeding(content_id).await.unwrap();

    assert_eq!(first.session_id, second.session_id);
    assert_eq!(second.state, SessionState::Seeding);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_restart_after_stop_resets_counters() {
    let dir = TempDir::new().unwrap();
    let engine = start_engine(&dir, Arc::new(ScriptedDiscovery::healthy())).await;
    let content_id = ingest_video(&engine, &dir, "clip.mp4", 128 * 1024).await;

    let first = engine.start_seeding(content_id).await.unwrap();
    let handle = session_handle(&engine, content_id).await;
    handle
        .peer_connected("10.0.0.1:7000".parse().unwrap(), ConnectionKind::Direct)
        .await
        .unwrap();
    handle
        .peer_transferred("10.0.0.1:7000".parse().unwrap(), 4096, 0)
        .await
        .unwrap();

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.uploaded, 4096);

    engine.stop_seeding(content_id).await.unwrap();

    // A restarted session gets a fresh identity and zeroed counters
    let restarted = start_when_ready(&engine, content_id).await;
    let snapshot = restarted.snapshot().await.unwrap();
    assert_ne!(snapshot.session_id, first.session_id);
    assert_eq!(snapshot.uploaded, 0);
    assert_eq!(snapshot.peer_count, 0);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stopped_session_rejects_stats() {
    let dir = TempDir::new().unwrap();
    let engine = start_engine(&dir, Arc::new(ScriptedDiscovery::healthy())).await;
    let content_id = ingest_video(&engine, &dir, "clip.mp4", 64 * 1024).await;

    engine.start_seeding(content_id).await.unwrap();
    engine.stop_seeding(content_id).await.unwrap();

    let result = engine.session_stats(content_id).await;
    assert!(matches!(
        result,
        Err(ShoalError::Swarm(SwarmError::UnknownContent { .. }))
    ));

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_start_conflicts_while_stopping() {
    let dir = TempDir::new().unwrap();
    let discovery = Arc::new(ScriptedDiscovery::with_deregister_delay(
        Duration::from_millis(300),
    ));
    let engine = start_engine(&dir, discovery.clone()).await;
    let content_id = ingest_video(&engine, &dir, "clip.mp4", 64 * 1024).await;

    let first = engine.start_seeding(content_id).await.unwrap();
    engine.stop_seeding(content_id).await.unwrap();

    // The stopped-announce is still in flight, so a restart conflicts
    let conflict = engine.start_seeding(content_id).await;
    assert!(matches!(
        conflict,
        Err(ShoalError::Swarm(SwarmError::SessionStopping { .. }))
    ));

    // Once the wind-down finishes, starting succeeds with a new identity
    let restarted = start_when_ready(&engine, content_id).await;
    let snapshot = restarted.snapshot().await.unwrap();
    assert_ne!(snapshot.session_id, first.session_id);
    assert_eq!(discovery.deregister_count(), 1);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_discovery_fails_start_after_retries() {
    let dir = TempDir::new().unwrap();
    let discovery = Arc::new(ScriptedDiscovery::healthy());
    discovery.set_failing(true);
    let engine = start_engine(&dir, discovery.clone()).await;
    let content_id = ingest_video(&engine, &dir, "clip.mp4", 64 * 1024).await;

    let result = engine.start_seeding(content_id).await;
    assert!(matches!(
        result,
        Err(ShoalError::Swarm(SwarmError::DiscoveryUnavailable { .. }))
    ));

    // Testing config allows two attempts before giving up
    assert_eq!(discovery.announce_count(), 2);
    assert!(engine.session_stats(content_id).await.is_err());

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reannounce_failures_degrade_then_recover() {
    let dir = TempDir::new().unwrap();
    let discovery = Arc::new(ScriptedDiscovery::with_interval(Duration::from_millis(25)));
    let engine = start_engine(&dir, discovery.clone()).await;
    let content_id = ingest_video(&engine, &dir, "clip.mp4", 64 * 1024).await;

    engine.start_seeding(content_id).await.unwrap();
    let handle = session_handle(&engine, content_id).await;

    discovery.set_failing(true);
    assert!(wait_for_state(&handle, SessionState::Degraded, Duration::from_secs(5)).await);
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.degraded_reason.as_deref(), Some("discovery unreachable"));

    // A degraded session keeps serving and recovers on the next good announce
    discovery.set_failing(false);
    assert!(wait_for_state(&handle, SessionState::Seeding, Duration::from_secs(5)).await);
    let snapshot = handle.snapshot().await.unwrap();
    assert!(snapshot.degraded_reason.is_none());

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_storage_fault_degrades_and_restore_recovers() {
    let dir = TempDir::new().unwrap();
    let engine = start_engine(&dir, Arc::new(ScriptedDiscovery::healthy())).await;
    let content_id = ingest_video(&engine, &dir, "clip.mp4", 64 * 1024).await;
    let descriptor = engine.content(content_id).await.unwrap();

    engine.start_seeding(content_id).await.unwrap();
    let handle = session_handle(&engine, content_id).await;

    let good_bytes = tokio::fs::read(&descriptor.stored_path).await.unwrap();
    assert!(handle.read_chunk(0).await.is_ok());

    // Same length, wrong bytes: every read retry fails verification
    let garbage = vec![0xFFu8; good_bytes.len()];
    tokio::fs::write(&descriptor.stored_path, &garbage).await.unwrap();

    let result = handle.read_chunk(0).await;
    assert!(matches!(
        result,
        Err(SwarmError::ChunkVerificationFailed { .. })
    ));
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Degraded);
    assert_eq!(snapshot.degraded_reason.as_deref(), Some("storage failing"));

    // Restoring the stored bytes heals the session on the next read
    tokio::fs::write(&descriptor.stored_path, &good_bytes).await.unwrap();
    let chunk = handle.read_chunk(0).await.unwrap();
    assert_eq!(chunk.len(), descriptor.chunk_size.min(64 * 1024) as usize);

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Seeding);
    assert!(snapshot.degraded_reason.is_none());

    engine.shutdown().await.unwrap();
}
