//! Telemetry aggregation across sessions, peers, and the sampler

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use shoal_core::swarm::{ConnectionKind, SessionState};
use tempfile::TempDir;

use crate::harness::{ScriptedDiscovery, ingest_video, session_handle, start_engine};

fn peer(n: u8) -> SocketAddr {
    format!("10.1.0.{n}:7000").parse().unwrap()
}

#[tokio::test]
async fn test_departed_peer_bytes_stay_in_totals() {
    let dir = TempDir::new().unwrap();
    let engine = start_engine(&dir, Arc::new(ScriptedDiscovery::healthy())).await;
    let content_id = ingest_video(&engine, &dir, "clip.mp4", 64 * 1024).await;

    engine.start_seeding(content_id).await.unwrap();
    let handle = session_handle(&engine, content_id).await;

    for (n, uploaded) in [(1, 100u64), (2, 200), (3, 300)] {
        handle
            .peer_connected(peer(n), ConnectionKind::Direct)
            .await
            .unwrap();
        handle.peer_transferred(peer(n), uploaded, 0).await.unwrap();
    }
    handle.peer_disconnected(peer(2)).await.unwrap();

    let stats = engine.session_stats(content_id).await.unwrap();
    assert_eq!(stats.peer_count, 2);
    assert_eq!(stats.peers.len(), 2);
    assert_eq!(stats.uploaded, 600);
    assert!(stats.peers.iter().all(|p| p.addr != peer(2)));

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_global_stats_aggregate_sessions() {
    let dir = TempDir::new().unwrap();
    let engine = start_engine(&dir, Arc::new(ScriptedDiscovery::healthy())).await;
    let first = ingest_video(&engine, &dir, "one.mp4", 64 * 1024).await;
    let second = ingest_video(&engine, &dir, "two.mp4", 96 * 1024).await;

    engine.start_seeding(first).await.unwrap();
    engine.start_seeding(second).await.unwrap();

    let handle_one = session_handle(&engine, first).await;
    handle_one
        .peer_connected(peer(1), ConnectionKind::Direct)
        .await
        .unwrap();
    handle_one.peer_transferred(peer(1), 1000, 50).await.unwrap();

    let handle_two = session_handle(&engine, second).await;
    handle_two
        .peer_connected(peer(2), ConnectionKind::Relayed)
        .await
        .unwrap();
    handle_two
        .peer_connected(peer(3), ConnectionKind::Direct)
        .await
        .unwrap();
    handle_two.peer_transferred(peer(2), 500, 25).await.unwrap();

    let stats = engine.global_stats().await;
    assert_eq!(stats.active_sessions, 2);
    assert_eq!(stats.total_peers, 3);
    assert_eq!(stats.total_uploaded, 1500);
    assert_eq!(stats.total_downloaded, 75);
    assert_eq!(stats.sessions.len(), 2);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_degraded_session_still_counted() {
    let dir = TempDir::new().unwrap();
    let engine = start_engine(&dir, Arc::new(ScriptedDiscovery::healthy())).await;
    let healthy = ingest_video(&engine, &dir, "one.mp4", 64 * 1024).await;
    let faulty = ingest_video(&engine, &dir, "two.mp4", 64 * 1024).await;

    engine.start_seeding(healthy).await.unwrap();
    engine.start_seeding(faulty).await.unwrap();

    // Corrupt the second video's stored bytes and trip the serving path
    let descriptor = engine.content(faulty).await.unwrap();
    let len = tokio::fs::metadata(&descriptor.stored_path).await.unwrap().len();
    tokio::fs::write(&descriptor.stored_path, vec![0xFFu8; len as usize])
        .await
        .unwrap();
    let handle = session_handle(&engine, faulty).await;
    assert!(handle.read_chunk(0).await.is_err());

    let stats = engine.global_stats().await;
    assert_eq!(stats.active_sessions, 2);

    let degraded: Vec<_> = stats
        .sessions
        .iter()
        .filter(|s| s.state == SessionState::Degraded)
        .collect();
    assert_eq!(degraded.len(), 1);
    assert_eq!(degraded[0].content_id, faulty);
    assert_eq!(degraded[0].degraded_reason.as_deref(), Some("storage failing"));

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sampler_keeps_cached_stats_fresh() {
    let dir = TempDir::new().unwrap();
    let engine = start_engine(&dir, Arc::new(ScriptedDiscovery::healthy())).await;
    let content_id = ingest_video(&engine, &dir, "clip.mp4", 64 * 1024).await;

    engine.start_seeding(content_id).await.unwrap();
    let handle = session_handle(&engine, content_id).await;
    handle
        .peer_connected(peer(1), ConnectionKind::Direct)
        .await
        .unwrap();
    handle.peer_transferred(peer(1), 2048, 0).await.unwrap();

    // The background sampler picks the transfer up without a forced sweep
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let mut sampled = false;
    while tokio::time::Instant::now() < deadline {
        let stats = engine.latest_stats().await;
        if stats.total_uploaded == 2048 && stats.total_peers == 1 {
            sampled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(sampled);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stopped_sessions_leave_global_stats() {
    let dir = TempDir::new().unwrap();
    let engine = start_engine(&dir, Arc::new(ScriptedDiscovery::healthy())).await;
    let content_id = ingest_video(&engine, &dir, "clip.mp4", 64 * 1024).await;

    engine.start_seeding(content_id).await.unwrap();
    let handle = session_handle(&engine, content_id).await;
    handle
        .peer_connected(peer(1), ConnectionKind::Direct)
        .await
        .unwrap();

    engine.stop_seeding(content_id).await.unwrap();

    // The table clears immediately on stop, so a fresh sweep sees nothing
    let stats = engine.global_stats().await;
    assert_eq!(stats.active_sessions, 0);
    assert!(stats.sessions.is_empty());
    assert_eq!(stats.total_peers, 0);

    engine.shutdown().await.unwrap();
}
