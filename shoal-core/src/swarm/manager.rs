//! Swarm manager actor
//!
//! Owns every session task: starts them from registry entries, stops them
//! with a bounded grace period, and reaps them when they end on their own.
//! The shared session table gives telemetry a lock-cheap view of live
//! handles without going through the manager loop.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::discovery::SwarmDiscovery;
use super::session::{SessionHandle, SessionSnapshot, spawn_session};
use super::SwarmError;
use crate::config::ShoalConfig;
use crate::content::{ContentId, ContentRegistry, RegistryError};

/// Live session handles shared with telemetry.
pub type SessionTable = Arc<RwLock<HashMap<ContentId, SessionHandle>>>;

/// Messages handled by the swarm manager actor.
pub enum SwarmCommand {
    StartSession {
        content_id: ContentId,
        responder: oneshot::Sender<Result<SessionSnapshot, SwarmError>>,
    },
    StopSession {
        content_id: ContentId,
        responder: oneshot::Sender<Result<(), SwarmError>>,
    },
    /// Internal: a session task finished
    SessionEnded {
        content_id: ContentId,
        session_id: Uuid,
    },
    Shutdown {
        responder: oneshot::Sender<()>,
    },
}

/// Handle to the swarm manager.
#[derive(Clone)]
pub struct SwarmManagerHandle {
    sender: mpsc::Sender<SwarmCommand>,
}

impl SwarmManagerHandle {
    /// Starts seeding registered content.
    ///
    /// Starting content that is already seeding returns the existing
    /// session's snapshot instead of spawning a second session.
    pub async fn start_session(
        &self,
        content_id: ContentId,
    ) -> Result<SessionSnapshot, SwarmError> {
        let (responder, rx) = oneshot::channel();
        let cmd = SwarmCommand::StartSession {
            content_id,
            responder,
        };
        self.sender
            .send(cmd)
            .await
            .map_err(|_| SwarmError::ManagerClosed)?;
        rx.await.map_err(|_| SwarmError::ResponseDropped)?
    }

    /// Stops the session for this content, waiting up to the grace period.
    ///
    /// Stopping content with no session is a no-op.
    pub async fn stop_session(&self, content_id: ContentId) -> Result<(), SwarmError> {
        let (responder, rx) = oneshot::channel();
        let cmd = SwarmCommand::StopSession {
            content_id,
            responder,
        };
        self.sender
            .send(cmd)
            .await
            .map_err(|_| SwarmError::ManagerClosed)?;
        rx.await.map_err(|_| SwarmError::ResponseDropped)?
    }

    /// Stops every session and shuts the manager down.
    pub async fn shutdown(&self) -> Result<(), SwarmError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(SwarmCommand::Shutdown { responder })
            .await
            .map_err(|_| SwarmError::ManagerClosed)?;
        rx.await.map_err(|_| SwarmError::ResponseDropped)
    }
}

struct SessionEntry {
    handle: SessionHandle,
    task: Option<JoinHandle<()>>,
    stopping: bool,
}

struct SwarmManager {
    config: ShoalConfig,
    registry: Arc<ContentRegistry>,
    discovery: Arc<dyn SwarmDiscovery>,
    sessions: HashMap<ContentId, SessionEntry>,
    table: SessionTable,
    events: mpsc::Sender<SwarmCommand>,
}

/// Spawns the swarm manager actor.
///
/// Returns the command handle plus the shared session table.
pub fn spawn_swarm_manager(
    config: ShoalConfig,
    registry: Arc<ContentRegistry>,
    discovery: Arc<dyn SwarmDiscovery>,
) -> (SwarmManagerHandle, SessionTable) {
    let (sender, mut receiver) = mpsc::channel(100);
    let table: SessionTable = Arc::new(RwLock::new(HashMap::new()));

    let mut manager = SwarmManager {
        config,
        registry,
        discovery,
        sessions: HashMap::new(),
        table: Arc::clone(&table),
        events: sender.clone(),
    };

    tokio::spawn(async move {
        while let Some(command) = receiver.recv().await {
            match command {
                SwarmCommand::StartSession {
                    content_id,
                    responder,
                } => {
                    manager.start_session(content_id, responder).await;
                }
                SwarmCommand::StopSession {
                    content_id,
                    responder,
                } => {
                    manager.stop_session(content_id, responder).await;
                }
                SwarmCommand::SessionEnded {
                    content_id,
                    session_id,
                } => {
                    manager.session_ended(content_id, session_id).await;
                }
                SwarmCommand::Shutdown { responder } => {
                    manager.shutdown().await;
                    let _ = responder.send(());
                    break;
                }
            }
        }
    });

    (SwarmManagerHandle { sender }, table)
}

impl SwarmManager {
    async fn start_session(
        &mut self,
        content_id: ContentId,
        responder: oneshot::Sender<Result<SessionSnapshot, SwarmError>>,
    ) {
        if let Some(entry) = self.sessions.get(&content_id) {
            if entry.stopping {
                let _ = responder.send(Err(SwarmError::SessionStopping { content_id }));
                return;
            }
            if entry.handle.is_closed() {
                // Leftover from a session that died without being reaped yet
                self.remove_entry(content_id).await;
            } else {
                // Forward the live snapshot without blocking the manager loop
                let handle = entry.handle.clone();
                tokio::spawn(async move {
                    let _ = responder.send(handle.snapshot().await);
                });
                return;
            }
        }

        let descriptor = match self.registry.lookup(content_id).await {
            Ok(descriptor) => descriptor,
            Err(RegistryError::NotFound { .. }) => {
                let _ = responder.send(Err(SwarmError::UnknownContent { content_id }));
                return;
            }
            Err(e) => {
                let _ = responder.send(Err(SwarmError::Storage {
                    reason: e.to_string(),
                }));
                return;
            }
        };

        let session_id = Uuid::new_v4();
        let (handle, task) = spawn_session(
            session_id,
            descriptor,
            self.config.clone(),
            Arc::clone(&self.discovery),
            responder,
            self.events.clone(),
        );

        debug!(%content_id, %session_id, "Starting session");

        self.sessions.insert(
            content_id,
            SessionEntry {
                handle: handle.clone(),
                task: Some(task),
                stopping: false,
            },
        );
        self.table.write().await.insert(content_id, handle);
    }

    async fn stop_session(
        &mut self,
        content_id: ContentId,
        responder: oneshot::Sender<Result<(), SwarmError>>,
    ) {
        let Some(entry) = self.sessions.get_mut(&content_id) else {
            let _ = responder.send(Ok(()));
            return;
        };
        if entry.stopping {
            let _ = responder.send(Ok(()));
            return;
        }

        entry.stopping = true;
        let handle = entry.handle.clone();
        let task = entry.task.take();
        let session_id = handle.session_id();

        // Gone from telemetry as soon as the stop is accepted
        self.table.write().await.remove(&content_id);

        let grace = self.config.swarm.stop_grace_period;
        let events = self.events.clone();
        tokio::spawn(async move {
            if tokio::time::timeout(grace, handle.stop()).await.is_err() {
                warn!(%content_id, %session_id, "Stop grace period expired, aborting session");
                if let Some(task) = task {
                    task.abort();
                }
                let _ = events
                    .send(SwarmCommand::SessionEnded {
                        content_id,
                        session_id,
                    })
                    .await;
            }
            let _ = responder.send(Ok(()));
        });
    }

    async fn session_ended(&mut self, content_id: ContentId, session_id: Uuid) {
        let matches_entry = self
            .sessions
            .get(&content_id)
            .is_some_and(|entry| entry.handle.session_id() == session_id);
        if matches_entry {
            debug!(%content_id, %session_id, "Session ended");
            self.remove_entry(content_id).await;
        }
    }

    async fn remove_entry(&mut self, content_id: ContentId) {
        self.sessions.remove(&content_id);
        self.table.write().await.remove(&content_id);
    }

    async fn shutdown(&mut self) {
        let entries: Vec<(ContentId, SessionEntry)> = self.sessions.drain().collect();
        self.table.write().await.clear();

        let grace = self.config.swarm.stop_grace_period;
        let stops = entries.into_iter().map(|(content_id, mut entry)| {
            let handle = entry.handle.clone();
            let task = entry.task.take();
            async move {
                if tokio::time::timeout(grace, handle.stop()).await.is_err() {
                    warn!(%content_id, "Stop grace period expired during shutdown, aborting");
                    if let Some(task) = task {
                        task.abort();
                    }
                }
            }
        });
        futures::future::join_all(stops).await;

        debug!("Swarm manager shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::super::discovery::{AnnounceRequest, AnnounceResponse, DiscoveryError};
    use super::*;
    use crate::config::StorageConfig;
    use crate::content::{ContentAddressor, ContentDescriptor};

    struct StubDiscovery {
        deregister_delay: Duration,
    }

    impl StubDiscovery {
        fn instant() -> Self {
            Self {
                deregister_delay: Duration::ZERO,
            }
        }

        fn slow_deregister(delay: Duration) -> Self {
            Self {
                deregister_delay: delay,
            }
        }
    }

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
            tokio::time::sleep(self.deregister_delay).await;
            Ok(())
        }

        async fn find_peers(
            &self,
            _content_id: ContentId,
        ) -> Result<Vec<SocketAddr>, DiscoveryError> {
            Ok(Vec::new())
        }
    }

    async fn registry_with_content(dir: &TempDir, names: &[&str]) -> (Arc<ContentRegistry>, Vec<ContentId>) {
        let storage = StorageConfig {
            state_dir: dir.path().join("state"),
            library_dir: dir.path().join("library"),
            ..Default::default()
        };
        let registry = Arc::new(ContentRegistry::load(&storage).await.unwrap());

        let mut ids = Vec::new();
        for (i, name) in names.iter().enumerate() {
            let stored_path = dir.path().join(name);
            let bytes = vec![i as u8 + 1; 300];
            tokio::fs::write(&stored_path, &bytes).await.unwrap();

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
                created_at: chrono::Utc::now(),
            };
            registry.register(descriptor).await.unwrap();
            ids.push(manifest.content_id);
        }

        (registry, ids)
    }

    async fn start_when_ready(
        manager: &SwarmManagerHandle,
        content_id: ContentId,
    ) -> SessionSnapshot {
        for _ in 0..100 {
            match manager.start_session(content_id).await {
                Ok(snapshot) => return snapshot,
                Err(SwarmError::SessionStopping { .. }) => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(e) => panic!("unexpected start error: {e}"),
            }
        }
        panic!("session never became startable");
    }

    #[tokio::test]
    async fn test_start_and_stop_session() {
        let dir = TempDir::new().unwrap();
        let (registry, ids) = registry_with_content(&dir, &["clip.mp4"]).await;
        let (manager, table) = spawn_swarm_manager(
            ShoalConfig::for_testing(),
            registry,
            Arc::new(StubDiscovery::instant()),
        );

        let snapshot = manager.start_session(ids[0]).await.unwrap();
        assert_eq!(snapshot.content_id, ids[0]);
        assert!(table.read().await.contains_key(&ids[0]));

        manager.stop_session(ids[0]).await.unwrap();
        assert!(!table.read().await.contains_key(&ids[0]));
    }

    #[tokio::test]
    async fn test_start_unknown_content() {
        let dir = TempDir::new().unwrap();
        let (registry, _) = registry_with_content(&dir, &[]).await;
        let (manager, _table) = spawn_swarm_manager(
            ShoalConfig::for_testing(),
            registry,
            Arc::new(StubDiscovery::instant()),
        );

        let result = manager.start_session(ContentId::new([7; 20])).await;
        assert!(matches!(result, Err(SwarmError::UnknownContent { .. })));
    }

    #[tokio::test]
    async fn test_repeated_start_reuses_session() {
        let dir = TempDir::new().unwrap();
        let (registry, ids) = registry_with_content(&dir, &["clip.mp4"]).await;
        let (manager, _table) = spawn_swarm_manager(
            ShoalConfig::for_testing(),
            registry,
            Arc::new(StubDiscovery::instant()),
        );

        let first = manager.start_session(ids[0]).await.unwrap();
        let second = manager.start_session(ids[0]).await.unwrap();
        assert_eq!(first.session_id, second.session_id);
    }

    #[tokio::test]
    async fn test_restart_gets_fresh_session() {
        let dir = TempDir::new().unwrap();
        let (registry, ids) = registry_with_content(&dir, &["clip.mp4"]).await;
        let (manager, _table) = spawn_swarm_manager(
            ShoalConfig::for_testing(),
            registry,
            Arc::new(StubDiscovery::instant()),
        );

        let first = manager.start_session(ids[0]).await.unwrap();
        manager.stop_session(ids[0]).await.unwrap();

        let second = start_when_ready(&manager, ids[0]).await;
        assert_ne!(first.session_id, second.session_id);
        assert_eq!(second.uploaded, 0);
    }

    #[tokio::test]
    async fn test_stop_without_session_is_noop() {
        let dir = TempDir::new().unwrap();
        let (registry, ids) = registry_with_content(&dir, &["clip.mp4"]).await;
        let (manager, _table) = spawn_swarm_manager(
            ShoalConfig::for_testing(),
            registry,
            Arc::new(StubDiscovery::instant()),
        );

        manager.stop_session(ids[0]).await.unwrap();
    }

    #[tokio::test]
    async fn test_start_conflicts_while_stopping() {
        let dir = TempDir::new().unwrap();
        let (registry, ids) = registry_with_content(&dir, &["clip.mp4"]).await;
        let (manager, _table) = spawn_swarm_manager(
            ShoalConfig::for_testing(),
            registry,
            Arc::new(StubDiscovery::slow_deregister(Duration::from_millis(300))),
        );

        manager.start_session(ids[0]).await.unwrap();

        let stopper = manager.clone();
        let content_id = ids[0];
        let stop_task = tokio::spawn(async move { stopper.stop_session(content_id).await });

        // Give the manager time to accept the stop before poking it
        tokio::time::sleep(Duration::from_millis(50)).await;
        let result = manager.start_session(ids[0]).await;
        assert!(matches!(result, Err(SwarmError::SessionStopping { .. })));

        stop_task.await.unwrap().unwrap();
        start_when_ready(&manager, ids[0]).await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let dir = TempDir::new().unwrap();
        let (registry, ids) = registry_with_content(&dir, &["a.mp4", "b.mp4"]).await;
        let (manager, table) = spawn_swarm_manager(
            ShoalConfig::for_testing(),
            registry,
            Arc::new(StubDiscovery::instant()),
        );

        manager.start_session(ids[0]).await.unwrap();
        manager.start_session(ids[1]).await.unwrap();
        assert_eq!(table.read().await.len(), 2);

        let a_handle = table.read().await.get(&ids[0]).cloned().unwrap();

        manager.shutdown().await.unwrap();
        assert!(table.read().await.is_empty());
        assert!(a_handle.is_closed());

        let result = manager.start_session(ids[0]).await;
        assert!(matches!(result, Err(SwarmError::ManagerClosed)));
    }
}
