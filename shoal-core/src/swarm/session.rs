//! Per-content seeding session actor
//!
//! Each session runs as its own task owning the content file handle, the
//! peer table, and the announce schedule. Callers interact through a
//! cloneable [`SessionHandle`]; the task winds itself down on stop or when
//! every handle is dropped, then reports back to the manager.

use std::io::SeekFrom;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::discovery::{AnnounceRequest, SwarmDiscovery};
use super::manager::SwarmCommand;
use super::peers::{ConnectionKind, PeerSnapshot, PeerTable};
use super::{RetryPolicy, SessionState, SwarmError};
use crate::config::ShoalConfig;
use crate::content::{ContentDescriptor, ContentId, ContentManifest};

/// Messages handled by a session actor.
pub enum SessionCommand {
    PeerConnected {
        addr: SocketAddr,
        kind: ConnectionKind,
    },
    PeerTransferred {
        addr: SocketAddr,
        uploaded_delta: u64,
        downloaded_delta: u64,
    },
    PeerDisconnected {
        addr: SocketAddr,
    },
    ReadChunk {
        index: u32,
        responder: oneshot::Sender<Result<Vec<u8>, SwarmError>>,
    },
    Snapshot {
        responder: oneshot::Sender<SessionSnapshot>,
    },
    Stop {
        responder: oneshot::Sender<()>,
    },
}

/// Handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    content_id: ContentId,
    sender: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn content_id(&self) -> ContentId {
        self.content_id
    }

    /// Whether the session task has exited.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Registers a peer connection.
    pub async fn peer_connected(
        &self,
        addr: SocketAddr,
        kind: ConnectionKind,
    ) -> Result<(), SwarmError> {
        self.sender
            .send(SessionCommand::PeerConnected { addr, kind })
            .await
            .map_err(|_| SwarmError::SessionClosed)
    }

    /// Reports transfer deltas attributed to a connected peer.
    pub async fn peer_transferred(
        &self,
        addr: SocketAddr,
        uploaded_delta: u64,
        downloaded_delta: u64,
    ) -> Result<(), SwarmError> {
        self.sender
            .send(SessionCommand::PeerTransferred {
                addr,
                uploaded_delta,
                downloaded_delta,
            })
            .await
            .map_err(|_| SwarmError::SessionClosed)
    }

    /// Removes a peer connection.
    pub async fn peer_disconnected(&self, addr: SocketAddr) -> Result<(), SwarmError> {
        self.sender
            .send(SessionCommand::PeerDisconnected { addr })
            .await
            .map_err(|_| SwarmError::SessionClosed)
    }

    /// Reads and verifies one chunk of the seeded content.
    pub async fn read_chunk(&self, index: u32) -> Result<Vec<u8>, SwarmError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::ReadChunk { index, responder })
            .await
            .map_err(|_| SwarmError::SessionClosed)?;
        rx.await.map_err(|_| SwarmError::ResponseDropped)?
    }

    /// Current session snapshot.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SwarmError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Snapshot { responder })
            .await
            .map_err(|_| SwarmError::SessionClosed)?;
        rx.await.map_err(|_| SwarmError::ResponseDropped)
    }

    /// Winds the session down and waits for it to finish.
    pub async fn stop(&self) -> Result<(), SwarmError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Stop { responder })
            .await
            .map_err(|_| SwarmError::SessionClosed)?;
        rx.await.map_err(|_| SwarmError::ResponseDropped)
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Unique id of this session incarnation
    pub session_id: Uuid,
    /// Content being seeded
    pub content_id: ContentId,
    /// Display name of the content
    pub file_name: String,
    /// Lifecycle state
    pub state: SessionState,
    /// Why the session is degraded, when it is
    pub degraded_reason: Option<String>,
    /// When this incarnation started
    pub started_at: DateTime<Utc>,
    /// Bytes uploaded, including departed peers
    pub uploaded: u64,
    /// Bytes downloaded, including departed peers
    pub downloaded: u64,
    /// Recent upload rate in bytes per second
    pub upload_rate: f64,
    /// Recent download rate in bytes per second
    pub download_rate: f64,
    /// Number of live peer connections
    pub peer_count: usize,
    /// Live peer details
    pub peers: Vec<PeerSnapshot>,
}

enum DegradedCause {
    Discovery,
    Storage,
}

impl DegradedCause {
    fn reason(&self) -> &'static str {
        match self {
            DegradedCause::Discovery => "discovery unreachable",
            DegradedCause::Storage => "storage failing",
        }
    }
}

struct SwarmSession {
    session_id: Uuid,
    descriptor: ContentDescriptor,
    manifest: ContentManifest,
    config: ShoalConfig,
    discovery: Arc<dyn SwarmDiscovery>,
    file: tokio::fs::File,
    state: SessionState,
    degraded_cause: Option<DegradedCause>,
    started_at: DateTime<Utc>,
    peers: PeerTable,
    folded_uploaded: u64,
    folded_downloaded: u64,
    announce_failures: u32,
    announce_interval: Duration,
}

/// Spawns a session actor for registered content.
///
/// The first announce outcome is delivered through `started`: `Ok` with the
/// initial snapshot once the session reaches seeding, `Err` if it cannot
/// start. Whatever happens afterwards, the task reports its end through
/// `events` before exiting.
pub fn spawn_session(
    session_id: Uuid,
    descriptor: ContentDescriptor,
    config: ShoalConfig,
    discovery: Arc<dyn SwarmDiscovery>,
    started: oneshot::Sender<Result<SessionSnapshot, SwarmError>>,
    events: mpsc::Sender<SwarmCommand>,
) -> (SessionHandle, JoinHandle<()>) {
    let (sender, receiver) = mpsc::channel(100);
    let content_id = descriptor.content_id;

    let handle = SessionHandle {
        session_id,
        content_id,
        sender,
    };

    let task = tokio::spawn(async move {
        run_session(session_id, descriptor, config, discovery, started, receiver).await;
        let _ = events
            .send(SwarmCommand::SessionEnded {
                content_id,
                session_id,
            })
            .await;
    });

    (handle, task)
}

async fn run_session(
    session_id: Uuid,
    descriptor: ContentDescriptor,
    config: ShoalConfig,
    discovery: Arc<dyn SwarmDiscovery>,
    started: oneshot::Sender<Result<SessionSnapshot, SwarmError>>,
    mut receiver: mpsc::Receiver<SessionCommand>,
) {
    let mut session =
        match SwarmSession::initialize(session_id, descriptor, config, discovery).await {
            Ok(session) => session,
            Err(e) => {
                let _ = started.send(Err(e));
                return;
            }
        };

    let _ = started.send(Ok(session.snapshot()));

    let mut next_announce = Box::pin(tokio::time::sleep(session.announce_interval()));

    loop {
        tokio::select! {
            maybe_command = receiver.recv() => {
                match maybe_command {
                    Some(SessionCommand::PeerConnected { addr, kind }) => {
                        session.peer_connected(addr, kind);
                    }
                    Some(SessionCommand::PeerTransferred { addr, uploaded_delta, downloaded_delta }) => {
                        session.peer_transferred(addr, uploaded_delta, downloaded_delta);
                    }
                    Some(SessionCommand::PeerDisconnected { addr }) => {
                        session.peer_disconnected(addr);
                    }
                    Some(SessionCommand::ReadChunk { index, responder }) => {
                        let result = session.read_chunk(index).await;
                        let _ = responder.send(result);
                    }
                    Some(SessionCommand::Snapshot { responder }) => {
                        let _ = responder.send(session.snapshot());
                    }
                    Some(SessionCommand::Stop { responder }) => {
                        session.wind_down().await;
                        let _ = responder.send(());
                        break;
                    }
                    None => {
                        session.wind_down().await;
                        break;
                    }
                }
            }
            () = &mut next_announce => {
                let delay = session.reannounce().await;
                next_announce = Box::pin(tokio::time::sleep(delay));
            }
        }
    }
}

impl SwarmSession {
    async fn initialize(
        session_id: Uuid,
        descriptor: ContentDescriptor,
        config: ShoalConfig,
        discovery: Arc<dyn SwarmDiscovery>,
    ) -> Result<Self, SwarmError> {
        let manifest = descriptor.manifest().map_err(|e| SwarmError::Storage {
            reason: format!("unusable registry entry: {e}"),
        })?;

        let file = tokio::fs::File::open(&descriptor.stored_path)
            .await
            .map_err(|e| SwarmError::Storage {
                reason: format!("cannot open {}: {e}", descriptor.stored_path.display()),
            })?;
        let file_length = file
            .metadata()
            .await
            .map_err(|e| SwarmError::Storage {
                reason: format!("cannot stat {}: {e}", descriptor.stored_path.display()),
            })?
            .len();
        if file_length != descriptor.size {
            return Err(SwarmError::Storage {
                reason: format!(
                    "stored file is {file_length} bytes, registry says {}",
                    descriptor.size
                ),
            });
        }

        let reannounce_interval = config.swarm.reannounce_interval;
        let mut session = Self {
            session_id,
            descriptor,
            manifest,
            config,
            discovery,
            file,
            state: SessionState::Starting,
            degraded_cause: None,
            started_at: Utc::now(),
            peers: PeerTable::new(),
            folded_uploaded: 0,
            folded_downloaded: 0,
            announce_failures: 0,
            announce_interval: reannounce_interval,
        };

        session.announce_with_retry().await?;
        session.set_state(SessionState::Seeding);

        debug!(
            session_id = %session.session_id,
            content_id = %session.descriptor.content_id,
            "Session seeding"
        );

        Ok(session)
    }

    /// Initial announce with bounded exponential backoff.
    async fn announce_with_retry(&mut self) -> Result<(), SwarmError> {
        let policy = RetryPolicy::from(&self.config.discovery);
        let mut attempt = 1;
        let mut last_error: Option<String> = None;

        while policy.should_retry(attempt) {
            match self.try_announce().await {
                Ok(()) => return Ok(()),
                Err(reason) => {
                    warn!(
                        content_id = %self.descriptor.content_id,
                        attempt,
                        "Initial announce failed: {reason}"
                    );
                    last_error = Some(reason);
                }
            }
            if policy.should_retry(attempt + 1) {
                tokio::time::sleep(policy.calculate_delay(attempt)).await;
            }
            attempt += 1;
        }

        self.set_state(SessionState::Stopped);
        Err(SwarmError::DiscoveryUnavailable {
            reason: last_error.unwrap_or_else(|| "announce never attempted".to_string()),
        })
    }

    /// One announce attempt, bounded by the configured timeout.
    async fn try_announce(&mut self) -> Result<(), String> {
        let (uploaded, downloaded) = self.totals();
        let request = if self.announce_failures == 0 && self.state == SessionState::Starting {
            AnnounceRequest::started(
                self.descriptor.content_id,
                self.config.swarm.listen_port,
            )
        } else {
            AnnounceRequest {
                content_id: self.descriptor.content_id,
                listen_port: self.config.swarm.listen_port,
                uploaded,
                downloaded,
                left: 0,
                event: None,
            }
        };

        let outcome = tokio::time::timeout(
            self.config.discovery.announce_timeout,
            self.discovery.announce(request),
        )
        .await;

        match outcome {
            Ok(Ok(response)) => {
                // Honor the interval the discovery service asks for
                if !response.interval.is_zero() {
                    self.announce_interval = response.interval;
                }
                Ok(())
            }
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("announce timed out".to_string()),
        }
    }

    /// Periodic reannounce tick. Returns the delay until the next tick.
    async fn reannounce(&mut self) -> Duration {
        let policy = RetryPolicy::from(&self.config.discovery);

        match self.try_announce().await {
            Ok(()) => {
                self.announce_failures = 0;
                if matches!(self.degraded_cause, Some(DegradedCause::Discovery)) {
                    self.recover();
                }
                self.announce_interval()
            }
            Err(reason) => {
                self.announce_failures += 1;
                warn!(
                    content_id = %self.descriptor.content_id,
                    failures = self.announce_failures,
                    "Reannounce failed: {reason}"
                );
                if self.announce_failures >= policy.max_attempts()
                    && self.state == SessionState::Seeding
                {
                    self.degrade(DegradedCause::Discovery);
                }
                policy.calculate_delay(self.announce_failures)
            }
        }
    }

    fn announce_interval(&self) -> Duration {
        self.announce_interval
    }

    fn peer_connected(&mut self, addr: SocketAddr, kind: ConnectionKind) {
        if !self.peers.contains(addr) && self.peers.len() >= self.config.swarm.max_peer_connections
        {
            warn!(
                content_id = %self.descriptor.content_id,
                %addr,
                limit = self.config.swarm.max_peer_connections,
                "Peer limit reached, ignoring connection"
            );
            return;
        }
        if let Some((uploaded, downloaded)) = self.peers.connect(addr, kind) {
            self.folded_uploaded += uploaded;
            self.folded_downloaded += downloaded;
        }
    }

    fn peer_transferred(&mut self, addr: SocketAddr, uploaded_delta: u64, downloaded_delta: u64) {
        if !self.peers.record_transfer(addr, uploaded_delta, downloaded_delta) {
            debug!(
                content_id = %self.descriptor.content_id,
                %addr,
                "Dropping transfer report from unknown peer"
            );
        }
    }

    fn peer_disconnected(&mut self, addr: SocketAddr) {
        if let Some((uploaded, downloaded)) = self.peers.disconnect(addr) {
            self.folded_uploaded += uploaded;
            self.folded_downloaded += downloaded;
        }
    }

    /// Reads one chunk from the stored file and checks it against the
    /// recorded digest, retrying a bounded number of times.
    async fn read_chunk(&mut self, index: u32) -> Result<Vec<u8>, SwarmError> {
        if u64::from(index) >= self.manifest.chunk_count() as u64 {
            return Err(SwarmError::ChunkOutOfRange {
                content_id: self.descriptor.content_id,
                index,
            });
        }

        let offset = self.manifest.chunk_offset(index);
        let length = self.manifest.chunk_len(index);
        let mut last_error = SwarmError::ChunkVerificationFailed { index };

        for _attempt in 1..=self.config.swarm.chunk_read_retry_limit {
            match self.read_range(offset, length).await {
                Ok(data) => {
                    if self.manifest.verify_chunk(index, &data) {
                        if matches!(self.degraded_cause, Some(DegradedCause::Storage)) {
                            self.recover();
                        }
                        return Ok(data);
                    }
                    last_error = SwarmError::ChunkVerificationFailed { index };
                }
                Err(e) => {
                    last_error = SwarmError::Storage {
                        reason: format!("chunk {index} read failed: {e}"),
                    };
                }
            }
        }

        if self.state == SessionState::Seeding {
            self.degrade(DegradedCause::Storage);
        }
        Err(last_error)
    }

    async fn read_range(&mut self, offset: u64, length: usize) -> Result<Vec<u8>, std::io::Error> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        let mut buffer = vec![0u8; length];
        self.file.read_exact(&mut buffer).await?;
        Ok(buffer)
    }

    /// Stop sequence: drain peers, tell discovery, finish.
    async fn wind_down(&mut self) {
        self.set_state(SessionState::Stopping);

        let (uploaded, downloaded) = self.peers.drain();
        self.folded_uploaded += uploaded;
        self.folded_downloaded += downloaded;

        let deregister = tokio::time::timeout(
            self.config.discovery.announce_timeout,
            self.discovery.deregister(
                self.descriptor.content_id,
                self.config.swarm.listen_port,
            ),
        )
        .await;
        match deregister {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                content_id = %self.descriptor.content_id,
                "Deregister failed: {e}"
            ),
            Err(_) => warn!(
                content_id = %self.descriptor.content_id,
                "Deregister timed out"
            ),
        }

        self.set_state(SessionState::Stopped);
        debug!(
            session_id = %self.session_id,
            content_id = %self.descriptor.content_id,
            uploaded = self.folded_uploaded,
            downloaded = self.folded_downloaded,
            "Session stopped"
        );
    }

    fn degrade(&mut self, cause: DegradedCause) {
        warn!(
            content_id = %self.descriptor.content_id,
            reason = cause.reason(),
            "Session degraded"
        );
        self.degraded_cause = Some(cause);
        self.set_state(SessionState::Degraded);
    }

    fn recover(&mut self) {
        debug!(
            content_id = %self.descriptor.content_id,
            "Session recovered"
        );
        self.degraded_cause = None;
        self.set_state(SessionState::Seeding);
    }

    fn set_state(&mut self, next: SessionState) {
        if !self.state.can_transition(next) {
            warn!(
                session_id = %self.session_id,
                from = %self.state,
                to = %next,
                "Skipping invalid session state transition"
            );
            return;
        }
        self.state = next;
    }

    fn totals(&self) -> (u64, u64) {
        let (live_uploaded, live_downloaded) = self.peers.totals();
        (
            self.folded_uploaded + live_uploaded,
            self.folded_downloaded + live_downloaded,
        )
    }

    fn snapshot(&self) -> SessionSnapshot {
        let (uploaded, downloaded) = self.totals();
        let window = self.config.telemetry.rate_window;
        let (upload_rate, download_rate) = self.peers.aggregate_rates(window);

        SessionSnapshot {
            session_id: self.session_id,
            content_id: self.descriptor.content_id,
            file_name: self.descriptor.file_name.clone(),
            state: self.state,
            degraded_reason: self.degraded_cause.as_ref().map(|c| c.reason().to_string()),
            started_at: self.started_at,
            uploaded,
            downloaded,
            upload_rate,
            download_rate,
            peer_count: self.peers.len(),
            peers: self.peers.snapshots(window),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::super::discovery::{AnnounceResponse, DiscoveryError};
    use super::*;
    use crate::content::ContentAddressor;

    struct StubDiscovery {
        announces: AtomicUsize,
        deregisters: AtomicUsize,
        fail_all: bool,
    }

    impl StubDiscovery {
        fn working() -> Self {
            Self {
                announces: AtomicUsize::new(0),
                deregisters: AtomicUsize::new(0),
                fail_all: false,
            }
        }

        fn broken() -> Self {
            Self {
                announces: AtomicUsize::new(0),
                deregisters: AtomicUsize::new(0),
                fail_all: true,
            }
        }
    }

    #[async_trait]
    impl SwarmDiscovery for StubDiscovery {
        async fn announce(
            &self,
            _request: AnnounceRequest,
        ) -> Result<AnnounceResponse, DiscoveryError> {
            self.announces.fetch_add(1, Ordering::SeqCst);
            if self.fail_all {
                return Err(DiscoveryError::RequestFailed {
                    reason: "stub outage".to_string(),
                });
            }
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
            self.deregisters.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn find_peers(
            &self,
            _content_id: ContentId,
        ) -> Result<Vec<SocketAddr>, DiscoveryError> {
            Ok(Vec::new())
        }
    }

    async fn seedable_content(dir: &TempDir, bytes: &[u8]) -> ContentDescriptor {
        let stored_path = dir.path().join("clip.mp4");
        tokio::fs::write(&stored_path, bytes).await.unwrap();

        let manifest = ContentAddressor::with_chunk_size(64)
            .address_file(&stored_path)
            .await
            .unwrap();

        ContentDescriptor {
            content_id: manifest.content_id,
            file_name: "clip.mp4".to_string(),
            stored_path,
            size: manifest.total_length,
            media_type: "video/mp4".to_string(),
            chunk_size: manifest.chunk_size,
            chunk_hashes: manifest.chunk_hashes.iter().map(hex::encode).collect(),
            locator: String::new(),
            created_at: Utc::now(),
        }
    }

    async fn start_session(
        descriptor: ContentDescriptor,
        discovery: Arc<dyn SwarmDiscovery>,
    ) -> Result<(SessionHandle, JoinHandle<()>, SessionSnapshot), SwarmError> {
        let (started, started_rx) = oneshot::channel();
        let (events, _events_rx) = mpsc::channel(10);
        let (handle, task) = spawn_session(
            Uuid::new_v4(),
            descriptor,
            ShoalConfig::for_testing(),
            discovery,
            started,
            events,
        );
        let snapshot = started_rx.await.unwrap()?;
        Ok((handle, task, snapshot))
    }

    fn peer(last_octet: u8) -> SocketAddr {
        format!("10.1.1.{last_octet}:6881").parse().unwrap()
    }

    #[tokio::test]
    async fn test_session_starts_seeding() {
        let dir = TempDir::new().unwrap();
        let descriptor = seedable_content(&dir, &[5u8; 200]).await;
        let discovery = Arc::new(StubDiscovery::working());

        let (handle, task, snapshot) = start_session(descriptor, discovery.clone())
            .await
            .unwrap();

        assert_eq!(snapshot.state, SessionState::Seeding);
        assert_eq!(snapshot.peer_count, 0);
        assert_eq!(snapshot.uploaded, 0);
        assert!(discovery.announces.load(Ordering::SeqCst) >= 1);

        handle.stop().await.unwrap();
        task.await.unwrap();
        assert_eq!(discovery.deregisters.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_fails_when_discovery_down() {
        let dir = TempDir::new().unwrap();
        let descriptor = seedable_content(&dir, &[5u8; 200]).await;
        let discovery = Arc::new(StubDiscovery::broken());

        let result = start_session(descriptor, discovery.clone()).await;
        assert!(matches!(
            result,
            Err(SwarmError::DiscoveryUnavailable { .. })
        ));

        // Bounded retries, not forever
        let attempts = discovery.announces.load(Ordering::SeqCst);
        assert_eq!(
            attempts,
            ShoalConfig::for_testing().discovery.announce_retry_limit as usize
        );
    }

    #[tokio::test]
    async fn test_start_fails_when_file_missing() {
        let dir = TempDir::new().unwrap();
        let mut descriptor = seedable_content(&dir, &[5u8; 200]).await;
        descriptor.stored_path = dir.path().join("does-not-exist.mp4");

        let result = start_session(descriptor, Arc::new(StubDiscovery::working())).await;
        assert!(matches!(result, Err(SwarmError::Storage { .. })));
    }

    #[tokio::test]
    async fn test_chunk_reads_verify() {
        let dir = TempDir::new().unwrap();
        let bytes: Vec<u8> = (0..200u32).map(|i| (i % 256) as u8).collect();
        let descriptor = seedable_content(&dir, &bytes).await;

        let (handle, task, _) = start_session(descriptor, Arc::new(StubDiscovery::working()))
            .await
            .unwrap();

        let chunk = handle.read_chunk(0).await.unwrap();
        assert_eq!(chunk, &bytes[..64]);

        // Final short chunk
        let chunk = handle.read_chunk(3).await.unwrap();
        assert_eq!(chunk, &bytes[192..]);

        let result = handle.read_chunk(4).await;
        assert!(matches!(result, Err(SwarmError::ChunkOutOfRange { .. })));

        handle.stop().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupted_chunk_degrades_session() {
        let dir = TempDir::new().unwrap();
        let descriptor = seedable_content(&dir, &[5u8; 200]).await;
        let stored_path = descriptor.stored_path.clone();

        let (handle, task, _) = start_session(descriptor, Arc::new(StubDiscovery::working()))
            .await
            .unwrap();

        // Same length, different bytes
        tokio::fs::write(&stored_path, [6u8; 200]).await.unwrap();

        let result = handle.read_chunk(0).await;
        assert!(matches!(
            result,
            Err(SwarmError::ChunkVerificationFailed { index: 0 })
        ));

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state, SessionState::Degraded);
        assert_eq!(snapshot.degraded_reason.as_deref(), Some("storage failing"));

        // Restoring the bytes lets a later read recover the session
        tokio::fs::write(&stored_path, [5u8; 200]).await.unwrap();
        handle.read_chunk(0).await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state, SessionState::Seeding);
        assert_eq!(snapshot.degraded_reason, None);

        handle.stop().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_events_accumulate() {
        let dir = TempDir::new().unwrap();
        let descriptor = seedable_content(&dir, &[5u8; 200]).await;

        let (handle, task, _) = start_session(descriptor, Arc::new(StubDiscovery::working()))
            .await
            .unwrap();

        handle.peer_connected(peer(1), ConnectionKind::Direct).await.unwrap();
        handle.peer_connected(peer(2), ConnectionKind::Relayed).await.unwrap();
        handle.peer_transferred(peer(1), 100, 10).await.unwrap();
        handle.peer_transferred(peer(2), 200, 20).await.unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.peer_count, 2);
        assert_eq!(snapshot.uploaded, 300);
        assert_eq!(snapshot.downloaded, 30);

        // Departed peer counters stay in the session totals
        handle.peer_disconnected(peer(1)).await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.peer_count, 1);
        assert_eq!(snapshot.uploaded, 300);
        assert_eq!(snapshot.downloaded, 30);

        handle.stop().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stopped_session_rejects_commands() {
        let dir = TempDir::new().unwrap();
        let descriptor = seedable_content(&dir, &[5u8; 200]).await;

        let (handle, task, _) = start_session(descriptor, Arc::new(StubDiscovery::working()))
            .await
            .unwrap();

        handle.stop().await.unwrap();
        task.await.unwrap();

        assert!(handle.is_closed());
        let result = handle.snapshot().await;
        assert!(matches!(result, Err(SwarmError::SessionClosed)));
    }
}
