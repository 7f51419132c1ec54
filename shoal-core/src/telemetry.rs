//! Swarm telemetry aggregation
//!
//! Folds per-session snapshots into node-wide statistics. A background
//! sampler keeps a cached copy fresh so read-heavy callers (the stats
//! endpoint polled by dashboards) never fan out to every session task.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

use crate::config::TelemetryConfig;
use crate::content::ContentId;
use crate::swarm::{SessionSnapshot, SessionTable, SwarmError};

/// Node-wide swarm statistics.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalStats {
    /// Sessions currently starting, seeding, or degraded
    pub active_sessions: usize,
    /// Live peer connections across all sessions
    pub total_peers: usize,
    /// Bytes uploaded across all sessions
    pub total_uploaded: u64,
    /// Bytes downloaded across all sessions
    pub total_downloaded: u64,
    /// Summed upload rate in bytes per second
    pub upload_rate: f64,
    /// Summed download rate in bytes per second
    pub download_rate: f64,
    /// The per-session snapshots this sweep saw
    pub sessions: Vec<SessionSnapshot>,
    /// When the sweep ran
    pub sampled_at: DateTime<Utc>,
}

impl GlobalStats {
    fn empty() -> Self {
        Self {
            active_sessions: 0,
            total_peers: 0,
            total_uploaded: 0,
            total_downloaded: 0,
            upload_rate: 0.0,
            download_rate: 0.0,
            sessions: Vec::new(),
            sampled_at: Utc::now(),
        }
    }
}

/// Aggregates session snapshots into global statistics.
#[derive(Clone)]
pub struct TelemetryAggregator {
    table: SessionTable,
    cache: Arc<RwLock<Option<GlobalStats>>>,
    sample_timeout: Duration,
}

impl TelemetryAggregator {
    pub fn new(table: SessionTable, config: &TelemetryConfig) -> Self {
        Self {
            table,
            cache: Arc::new(RwLock::new(None)),
            sample_timeout: config.sample_interval,
        }
    }

    /// Runs a fresh sweep over every live session.
    ///
    /// Sessions that have died or do not answer within the sample timeout
    /// are skipped for this sweep rather than stalling it. The result is
    /// cached for [`latest`](Self::latest).
    pub async fn global_stats(&self) -> GlobalStats {
        let handles: Vec<_> = self.table.read().await.values().cloned().collect();

        let sweeps = handles.into_iter().map(|handle| {
            let timeout = self.sample_timeout;
            async move { tokio::time::timeout(timeout, handle.snapshot()).await }
        });
        let outcomes = futures::future::join_all(sweeps).await;

        let mut sessions: Vec<SessionSnapshot> = outcomes
            .into_iter()
            .filter_map(|outcome| match outcome {
                Ok(Ok(snapshot)) => Some(snapshot),
                // Closed or unresponsive, skip this sweep
                Ok(Err(_)) | Err(_) => None,
            })
            .collect();
        sessions.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.content_id.cmp(&b.content_id))
        });

        let mut stats = GlobalStats::empty();
        for session in &sessions {
            if session.state.is_active() {
                stats.active_sessions += 1;
            }
            stats.total_peers += session.peer_count;
            stats.total_uploaded += session.uploaded;
            stats.total_downloaded += session.downloaded;
            stats.upload_rate += session.upload_rate;
            stats.download_rate += session.download_rate;
        }
        stats.sessions = sessions;

        *self.cache.write() = Some(stats.clone());
        stats
    }

    /// Snapshot of one session by content id.
    ///
    /// # Errors
    ///
    /// - `SwarmError::UnknownContent` - No live session for this content
    pub async fn session_stats(
        &self,
        content_id: ContentId,
    ) -> Result<SessionSnapshot, SwarmError> {
        let handle = self.table.read().await.get(&content_id).cloned();
        let Some(handle) = handle else {
            return Err(SwarmError::UnknownContent { content_id });
        };
        handle
            .snapshot()
            .await
            .map_err(|_| SwarmError::UnknownContent { content_id })
    }

    /// Most recent sweep result, if any sweep has completed.
    pub fn latest(&self) -> Option<GlobalStats> {
        self.cache.read().clone()
    }
}

/// Spawns the periodic sampler keeping the stats cache warm.
pub fn spawn_stats_sampler(
    aggregator: TelemetryAggregator,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let stats = aggregator.global_stats().await;
            trace!(
                active_sessions = stats.active_sessions,
                total_peers = stats.total_peers,
                "Sampled swarm statistics"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::config::{ShoalConfig, StorageConfig};
    use crate::content::{ContentAddressor, ContentDescriptor, ContentRegistry};
    use crate::swarm::discovery::{
        AnnounceRequest, AnnounceResponse, DiscoveryError, SwarmDiscovery,
    };
    use crate::swarm::peers::ConnectionKind;
    use crate::swarm::{SwarmManagerHandle, spawn_swarm_manager};

    struct StubDiscovery;

    #[async_trait]
    impl SwarmDiscovery for StubDiscovery {
        async fn announce(
            &self,
            _request: AnnounceRequest,
        ) -> Result<AnnounceResponse, DiscoveryError> {
            Ok(AnnounceResponse {
                interval: Duration::from_secs(60),
                peers: Vec::new(),
            })
        }

        async fn deregister(
            &self,
            _content_id: ContentId,
            _listen_port: u16,
        ) -> Result<(), DiscoveryError> {
            Ok(())
        }

        async fn find_peers(
            &self,
            _content_id: ContentId,
        ) -> Result<Vec<SocketAddr>, DiscoveryError> {
            Ok(Vec::new())
        }
    }

    async fn swarm_with_content(
        dir: &TempDir,
        names: &[&str],
    ) -> (SwarmManagerHandle, SessionTable, Vec<ContentId>) {
        let storage = StorageConfig {
            state_dir: dir.path().join("state"),
            library_dir: dir.path().join("library"),
            ..Default::default()
        };
        let registry = Arc::new(ContentRegistry::load(&storage).await.unwrap());

        let mut ids = Vec::new();
        for (i, name) in names.iter().enumerate() {
            let stored_path = dir.path().join(name);
            tokio::fs::write(&stored_path, vec![i as u8 + 1; 300])
                .await
                .unwrap();
            let manifest = ContentAddressor::with_chunk_size(64)
                .address_file(&stored_path)
                .await
                .unwrap();
            let descriptor = ContentDescriptor {
                content_id: manifest.content_id,
                file_name: name.to_string(),
                stored_path,
                size: manifest.total_length,
                media_type: "video/mp4".to_string(),
                chunk_size: manifest.chunk_size,
                chunk_hashes: manifest.chunk_hashes.iter().map(hex::encode).collect(),
                locator: String::new(),
                created_at: Utc::now(),
            };
            registry.register(descriptor).await.unwrap();
            ids.push(manifest.content_id);
        }

        let (manager, table) =
            spawn_swarm_manager(ShoalConfig::for_testing(), registry, Arc::new(StubDiscovery));
        (manager, table, ids)
    }

    fn peer(last_octet: u8) -> SocketAddr {
        format!("10.2.2.{last_octet}:6881").parse().unwrap()
    }

    #[tokio::test]
    async fn test_empty_table_yields_zeroes() {
        let dir = TempDir::new().unwrap();
        let (_manager, table, _) = swarm_with_content(&dir, &[]).await;
        let telemetry =
            TelemetryAggregator::new(table, &ShoalConfig::for_testing().telemetry);

        assert!(telemetry.latest().is_none());

        let stats = telemetry.global_stats().await;
        assert_eq!(stats.active_sessions, 0);
        assert_eq!(stats.total_peers, 0);
        assert_eq!(stats.total_uploaded, 0);
        assert!(stats.sessions.is_empty());

        assert!(telemetry.latest().is_some());
    }

    #[tokio::test]
    async fn test_aggregates_across_sessions() {
        let dir = TempDir::new().unwrap();
        let (manager, table, ids) = swarm_with_content(&dir, &["a.mp4", "b.mp4"]).await;
        let telemetry =
            TelemetryAggregator::new(Arc::clone(&table), &ShoalConfig::for_testing().telemetry);

        manager.start_session(ids[0]).await.unwrap();
        manager.start_session(ids[1]).await.unwrap();

        let handle_a = table.read().await.get(&ids[0]).cloned().unwrap();
        let handle_b = table.read().await.get(&ids[1]).cloned().unwrap();
        handle_a.peer_connected(peer(1), ConnectionKind::Direct).await.unwrap();
        handle_a.peer_transferred(peer(1), 100, 10).await.unwrap();
        handle_b.peer_connected(peer(2), ConnectionKind::Direct).await.unwrap();
        handle_b.peer_connected(peer(3), ConnectionKind::Relayed).await.unwrap();
        handle_b.peer_transferred(peer(2), 200, 20).await.unwrap();
        handle_b.peer_transferred(peer(3), 300, 30).await.unwrap();

        let stats = telemetry.global_stats().await;
        assert_eq!(stats.active_sessions, 2);
        assert_eq!(stats.total_peers, 3);
        assert_eq!(stats.total_uploaded, 600);
        assert_eq!(stats.total_downloaded, 60);
        assert_eq!(stats.sessions.len(), 2);
    }

    #[tokio::test]
    async fn test_session_stats_by_content() {
        let dir = TempDir::new().unwrap();
        let (manager, table, ids) = swarm_with_content(&dir, &["a.mp4"]).await;
        let telemetry =
            TelemetryAggregator::new(Arc::clone(&table), &ShoalConfig::for_testing().telemetry);

        manager.start_session(ids[0]).await.unwrap();

        let snapshot = telemetry.session_stats(ids[0]).await.unwrap();
        assert_eq!(snapshot.content_id, ids[0]);
        assert_eq!(snapshot.file_name, "a.mp4");

        let missing = telemetry.session_stats(ContentId::new([9; 20])).await;
        assert!(matches!(missing, Err(SwarmError::UnknownContent { .. })));
    }

    #[tokio::test]
    async fn test_stopped_sessions_leave_stats() {
        let dir = TempDir::new().unwrap();
        let (manager, table, ids) = swarm_with_content(&dir, &["a.mp4"]).await;
        let telemetry =
            TelemetryAggregator::new(Arc::clone(&table), &ShoalConfig::for_testing().telemetry);

        manager.start_session(ids[0]).await.unwrap();
        assert_eq!(telemetry.global_stats().await.active_sessions, 1);

        manager.stop_session(ids[0]).await.unwrap();
        let stats = telemetry.global_stats().await;
        assert_eq!(stats.active_sessions, 0);
        assert!(stats.sessions.is_empty());

        let result = telemetry.session_stats(ids[0]).await;
        assert!(matches!(result, Err(SwarmError::UnknownContent { .. })));
    }

    #[tokio::test]
    async fn test_sampler_keeps_cache_warm() {
        let dir = TempDir::new().unwrap();
        let (manager, table, ids) = swarm_with_content(&dir, &["a.mp4"]).await;
        let telemetry =
            TelemetryAggregator::new(Arc::clone(&table), &ShoalConfig::for_testing().telemetry);

        manager.start_session(ids[0]).await.unwrap();

        let sampler = spawn_stats_sampler(telemetry.clone(), Duration::from_millis(20));

        let mut cached = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if let Some(stats) = telemetry.latest() {
                if stats.active_sessions == 1 {
                    cached = Some(stats);
                    break;
                }
            }
        }
        sampler.abort();

        let stats = cached.expect("sampler never cached stats");
        assert_eq!(stats.sessions.len(), 1);
        assert_eq!(stats.sessions[0].content_id, ids[0]);
    }
}
