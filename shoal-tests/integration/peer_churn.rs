//! Randomized peer churn against a live session
//!
//! Drives a session actor with a seeded random mix of connects, transfer
//! reports, and disconnects, checking the session's counters against an
//! independently tracked model at the end.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use shoal_core::swarm::{ConnectionKind, InMemoryDiscovery, SimulatorConfig, spawn_swarm_simulator};
use tempfile::TempDir;

use crate::harness::{ScriptedDiscovery, ingest_video, session_handle, start_engine};

fn churn_peer(n: u32) -> SocketAddr {
    format!("10.3.{}.{}:7000", n / 250, (n % 250) + 1)
        .parse()
        .unwrap()
}

#[tokio::test]
async fn test_counters_survive_random_churn() {
    let dir = TempDir::new().unwrap();
    let engine = start_engine(&dir, Arc::new(ScriptedDiscovery::healthy())).await;
    let content_id = ingest_video(&engine, &dir, "clip.mp4", 128 * 1024).await;

    engine.start_seeding(content_id).await.unwrap();
    let handle = session_handle(&engine, content_id).await;
    let peer_cap = engine.config().swarm.max_peer_connections;

    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut connected: Vec<SocketAddr> = Vec::new();
    let mut next_peer = 0u32;
    let mut model_uploaded = 0u64;
    let mut model_downloaded = 0u64;

    for _ in 0..200 {
        match rng.random_range(0..3u8) {
            0 => {
                // Mirror the session's connection cap so the model stays in sync
                if connected.len() < peer_cap {
                    let addr = churn_peer(next_peer);
                    next_peer += 1;
                    handle
                        .peer_connected(addr, ConnectionKind::Direct)
                        .await
                        .unwrap();
                    connected.push(addr);
                }
            }
            1 => {
                if !connected.is_empty() {
                    let addr = connected[rng.random_range(0..connected.len())];
                    let uploaded = rng.random_range(1..10_000u64);
                    let downloaded = rng.random_range(0..2_000u64);
                    handle
                        .peer_transferred(addr, uploaded, downloaded)
                        .await
                        .unwrap();
                    model_uploaded += uploaded;
                    model_downloaded += downloaded;
                }
            }
            _ => {
                if !connected.is_empty() {
                    let addr = connected.swap_remove(rng.random_range(0..connected.len()));
                    handle.peer_disconnected(addr).await.unwrap();
                }
            }
        }
    }

    // Commands are processed in order, so one snapshot sees all of them
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.uploaded, model_uploaded);
    assert_eq!(snapshot.downloaded, model_downloaded);
    assert_eq!(snapshot.peer_count, connected.len());

    let live: HashSet<SocketAddr> = snapshot.peers.iter().map(|p| p.addr).collect();
    let expected: HashSet<SocketAddr> = connected.iter().copied().collect();
    assert_eq!(live, expected);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reconnect_folds_previous_counters() {
    let dir = TempDir::new().unwrap();
    let engine = start_engine(&dir, Arc::new(ScriptedDiscovery::healthy())).await;
    let content_id = ingest_video(&engine, &dir, "clip.mp4", 64 * 1024).await;

    engine.start_seeding(content_id).await.unwrap();
    let handle = session_handle(&engine, content_id).await;
    let addr = churn_peer(0);

    handle
        .peer_connected(addr, ConnectionKind::Direct)
        .await
        .unwrap();
    handle.peer_transferred(addr, 500, 40).await.unwrap();

    // Same address connecting again replaces the record but keeps the bytes
    handle
        .peer_connected(addr, ConnectionKind::Relayed)
        .await
        .unwrap();
    handle.peer_transferred(addr, 300, 10).await.unwrap();

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.peer_count, 1);
    assert_eq!(snapshot.uploaded, 800);
    assert_eq!(snapshot.downloaded, 50);
    assert_eq!(snapshot.peers[0].uploaded, 300);
    assert_eq!(snapshot.peers[0].kind, ConnectionKind::Relayed);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_simulator_generates_traffic() {
    let dir = TempDir::new().unwrap();
    let engine = start_engine(&dir, Arc::new(InMemoryDiscovery::new())).await;
    ingest_video(&engine, &dir, "one.mp4", 64 * 1024).await;
    ingest_video(&engine, &dir, "two.mp4", 64 * 1024).await;

    assert_eq!(engine.reseed_registered().await, 2);

    let simulator = spawn_swarm_simulator(
        engine.session_table(),
        SimulatorConfig {
            tick_interval: Duration::from_millis(10),
            ..SimulatorConfig::default()
        },
        7,
    );

    // Uploaded bytes only ever grow, so poll for the first transfer
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut saw_traffic = false;
    while tokio::time::Instant::now() < deadline {
        let stats = engine.global_stats().await;
        if stats.total_uploaded > 0 {
            assert_eq!(stats.active_sessions, 2);
            saw_traffic = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    simulator.abort();
    assert!(saw_traffic);

    engine.shutdown().await.unwrap();
}
