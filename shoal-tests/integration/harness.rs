//! Shared fixtures for the integration suite
//!
//! Provides a scriptable discovery stub, engine construction over temp
//! storage, and polling helpers for state transitions that happen on
//! session task time rather than test time.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use shoal_core::config::ShoalConfig;
use shoal_core::content::ContentId;
use shoal_core::swarm::{
    AnnounceRequest, AnnounceResponse, DiscoveryError, SessionHandle, SessionState, SwarmDiscovery,
};
use shoal_core::ShoalEngine;
use tempfile::TempDir;

/// Discovery stub whose failure behavior the test scripts at runtime.
pub struct ScriptedDiscovery {
    announces: AtomicUsize,
    deregisters: AtomicUsize,
    failing: AtomicBool,
    interval: Duration,
    deregister_delay: Option<Duration>,
}

impl ScriptedDiscovery {
    /// Always answers announces, asking for a reannounce far in the future.
    pub fn healthy() -> Self {
        Self {
            announces: AtomicUsize::new(0),
            deregisters: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            interval: Duration::from_secs(60),
            deregister_delay: None,
        }
    }

    /// Healthy, but asks sessions to reannounce on a short interval.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::healthy()
        }
    }

    /// Healthy, but deregistration hangs for `delay` before completing.
    pub fn with_deregister_delay(delay: Duration) -> Self {
        Self {
            deregister_delay: Some(delay),
            ..Self::healthy()
        }
    }

    /// Flips announce handling between success and failure.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn announce_count(&self) -> usize {
        self.announces.load(Ordering::SeqCst)
    }

    pub fn deregister_count(&self) -> usize {
        self.deregisters.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SwarmDiscovery for ScriptedDiscovery {
    async fn announce(
        &self,
        _request: AnnounceRequest,
    ) -> Result<AnnounceResponse, DiscoveryError> {
        self.announces.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(DiscoveryError::RequestFailed {
                reason: "scripted failure".to_string(),
            });
        }
        Ok(AnnounceResponse {
            interval: self.interval,
            peers: Vec::new(),
        })
    }

    async fn deregister(
        &self,
        _content_id: ContentId,
        _listen_port: u16,
    ) -> Result<(), DiscoveryError> {
        if let Some(delay) = self.deregister_delay {
            tokio::time::sleep(delay).await;
        }
        self.deregisters.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn find_peers(&self, _content_id: ContentId) -> Result<Vec<SocketAddr>, DiscoveryError> {
        Ok(Vec::new())
    }
}

/// Test configuration rooted inside the provided temp directory.
pub fn test_config(dir: &TempDir) -> ShoalConfig {
    let mut config = ShoalConfig::for_testing();
    config.storage.state_dir = dir.path().join("state");
    config.storage.library_dir = dir.path().join("library");
    config
}

/// Engine over temp storage and the given discovery backend.
pub async fn start_engine(dir: &TempDir, discovery: Arc<dyn SwarmDiscovery>) -> Arc<ShoalEngine> {
    Arc::new(
        ShoalEngine::start(test_config(dir), discovery)
            .await
            .unwrap(),
    )
}

/// Writes a patterned video file and returns its path.
pub async fn write_video(dir: &TempDir, name: &str, len: usize) -> PathBuf {
    let path = dir.path().join(name);
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    tokio::fs::write(&path, data).await.unwrap();
    path
}

/// Ingests a local file and returns its content id.
pub async fn ingest_video(engine: &ShoalEngine, dir: &TempDir, name: &str, len: usize) -> ContentId {
    let path = write_video(dir, name, len).await;
    let outcome = engine.ingest_file(&path, None).await.unwrap();
    outcome.descriptor.content_id
}

/// The live session handle for a content id.
pub async fn session_handle(engine: &ShoalEngine, content_id: ContentId) -> SessionHandle {
    let table = engine.session_table();
    let guard = table.read().await;
    guard.get(&content_id).cloned().unwrap()
}

/// Polls until the session reaches `state` or the timeout passes.
pub async fn wait_for_state(
    handle: &SessionHandle,
    state: SessionState,
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if let Ok(snapshot) = handle.snapshot().await {
            if snapshot.state == state {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Polls until a session for `content_id` can start, riding out the window
/// where a previous session is still winding down.
pub async fn start_when_ready(engine: &ShoalEngine, content_id: ContentId) -> SessionHandle {
    for _ in 0..200 {
        if engine.start_seeding(content_id).await.is_ok() {
            return session_handle(engine, content_id).await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session for {content_id} never became startable");
}
