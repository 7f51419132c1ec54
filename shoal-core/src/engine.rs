//! Engine coordinating ingestion, the content registry, swarm sessions,
//! and telemetry behind one facade.
//!
//! Web handlers and the CLI talk to [`ShoalEngine`] only; the actor and
//! pipeline machinery underneath stays private to this crate.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ShoalConfig;
use crate::content::{ContentDescriptor, ContentId, ContentRegistry};
use crate::ingest::{IngestOutcome, IngestPipeline, IngestRequest, StagedUpload};
use crate::swarm::{
    SessionSnapshot, SessionTable, SwarmDiscovery, SwarmManagerHandle, spawn_swarm_manager,
};
use crate::telemetry::{GlobalStats, TelemetryAggregator, spawn_stats_sampler};
use crate::ShoalError;

/// Top-level handle over a running node.
///
/// Owns the registry, the ingestion pipeline, the swarm manager, and the
/// background stats sampler. Cheap to share behind an `Arc`.
pub struct ShoalEngine {
    config: ShoalConfig,
    registry: Arc<ContentRegistry>,
    ingest: IngestPipeline,
    swarm: SwarmManagerHandle,
    telemetry: TelemetryAggregator,
    table: SessionTable,
    sampler: Mutex<Option<JoinHandle<()>>>,
}

impl ShoalEngine {
    /// Loads persisted state and starts the background actors.
    ///
    /// # Errors
    ///
    /// - `ShoalError::Io` - Storage directories cannot be created
    /// - `ShoalError::Registry` - Persisted registry state is unreadable
    pub async fn start(
        config: ShoalConfig,
        discovery: Arc<dyn SwarmDiscovery>,
    ) -> Result<Self, ShoalError> {
        tokio::fs::create_dir_all(&config.storage.state_dir).await?;
        tokio::fs::create_dir_all(config.storage.staging_dir()).await?;
        tokio::fs::create_dir_all(&config.storage.library_dir).await?;

        let registry = Arc::new(ContentRegistry::load(&config.storage).await?);
        info!(
            registered = registry.len().await,
            state_dir = %config.storage.state_dir.display(),
            "Engine starting"
        );

        let (swarm, table) = spawn_swarm_manager(config.clone(), Arc::clone(&registry), discovery);
        let telemetry = TelemetryAggregator::new(table.clone(), &config.telemetry);
        let sampler = spawn_stats_sampler(telemetry.clone(), config.telemetry.sample_interval);
        let ingest = IngestPipeline::new(&config, Arc::clone(&registry));

        Ok(Self {
            config,
            registry,
            ingest,
            swarm,
            telemetry,
            table,
            sampler: Mutex::new(Some(sampler)),
        })
    }

    /// Opens a staged upload for streamed ingestion.
    pub async fn begin_ingest(
        &self,
        request: IngestRequest,
    ) -> Result<StagedUpload<'_>, ShoalError> {
        Ok(self.ingest.begin(request).await?)
    }

    /// Ingests a file already on local disk.
    pub async fn ingest_file(
        &self,
        path: &Path,
        media_type: Option<String>,
    ) -> Result<IngestOutcome, ShoalError> {
        Ok(self.ingest.ingest_path(path, media_type).await?)
    }

    /// All registered content, oldest first.
    pub async fn content_list(&self) -> Vec<ContentDescriptor> {
        self.registry.list().await
    }

    /// Looks up one registered entry.
    pub async fn content(&self, content_id: ContentId) -> Result<ContentDescriptor, ShoalError> {
        Ok(self.registry.lookup(content_id).await?)
    }

    /// The shareable locator string for registered content.
    pub async fn locator(&self, content_id: ContentId) -> Result<String, ShoalError> {
        Ok(self.registry.lookup(content_id).await?.locator)
    }

    /// Starts seeding registered content, or returns the live session.
    pub async fn start_seeding(
        &self,
        content_id: ContentId,
    ) -> Result<SessionSnapshot, ShoalError> {
        Ok(self.swarm.start_session(content_id).await?)
    }

    /// Stops the seeding session for this content, if one runs.
    pub async fn stop_seeding(&self, content_id: ContentId) -> Result<(), ShoalError> {
        Ok(self.swarm.stop_session(content_id).await?)
    }

    /// Unregisters content, stopping its session and deleting stored bytes.
    ///
    /// # Errors
    ///
    /// - `ShoalError::Registry` - Content is not registered
    pub async fn remove_content(&self, content_id: ContentId) -> Result<(), ShoalError> {
        let descriptor = self.registry.lookup(content_id).await?;
        self.swarm.stop_session(content_id).await?;
        self.registry.remove(content_id).await?;

        if let Err(e) = tokio::fs::remove_file(&descriptor.stored_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    %content_id,
                    path = %descriptor.stored_path.display(),
                    "Failed to delete stored content: {e}"
                );
            }
        }
        if let Some(parent) = descriptor.stored_path.parent() {
            let _ = tokio::fs::remove_dir(parent).await;
        }

        info!(%content_id, "Content removed");
        Ok(())
    }

    /// Starts seeding sessions for everything in the registry.
    ///
    /// Failures are logged and skipped; returns how many sessions started.
    pub async fn reseed_registered(&self) -> usize {
        let mut started = 0;
        for descriptor in self.registry.list().await {
            match self.swarm.start_session(descriptor.content_id).await {
                Ok(_) => started += 1,
                Err(e) => {
                    warn!(
                        content_id = %descriptor.content_id,
                        file_name = descriptor.file_name,
                        "Reseed failed: {e}"
                    );
                }
            }
        }
        started
    }

    /// Samples every live session and aggregates totals.
    pub async fn global_stats(&self) -> GlobalStats {
        self.telemetry.global_stats().await
    }

    /// Telemetry for one seeding session.
    pub async fn session_stats(&self, content_id: ContentId) -> Result<SessionSnapshot, ShoalError> {
        Ok(self.telemetry.session_stats(content_id).await?)
    }

    /// The most recent sampled stats, or a fresh sweep when none exist yet.
    pub async fn latest_stats(&self) -> GlobalStats {
        match self.telemetry.latest() {
            Some(stats) => stats,
            None => self.telemetry.global_stats().await,
        }
    }

    /// Live session handles, shared with the swarm manager.
    pub fn session_table(&self) -> SessionTable {
        self.table.clone()
    }

    /// The configuration this engine runs with.
    pub fn config(&self) -> &ShoalConfig {
        &self.config
    }

    /// Stops the sampler and winds down every seeding session.
    pub async fn shutdown(&self) -> Result<(), ShoalError> {
        if let Some(handle) = self.sampler.lock().take() {
            handle.abort();
        }
        self.swarm.shutdown().await?;
        info!("Engine stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::swarm::InMemoryDiscovery;
    use crate::swarm::SessionState;

    fn test_config(dir: &TempDir) -> ShoalConfig {
        let mut config = ShoalConfig::for_testing();
        config.storage.state_dir = dir.path().join("state");
        config.storage.library_dir = dir.path().join("library");
        config
    }

    async fn test_engine(dir: &TempDir) -> ShoalEngine {
        let discovery = Arc::new(InMemoryDiscovery::new());
        ShoalEngine::start(test_config(dir), discovery)
            .await
            .unwrap()
    }

    async fn ingest_bytes(engine: &ShoalEngine, dir: &TempDir, name: &str, data: &[u8]) -> ContentId {
        let source = dir.path().join(name);
        tokio::fs::write(&source, data).await.unwrap();
        let outcome = engine.ingest_file(&source, None).await.unwrap();
        outcome.descriptor.content_id
    }

    #[tokio::test]
    async fn test_start_creates_storage_layout() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir).await;

        assert!(engine.config().storage.state_dir.is_dir());
        assert!(engine.config().storage.staging_dir().is_dir());
        assert!(engine.config().storage.library_dir.is_dir());

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_ingest_then_seed_then_stop() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir).await;
        let content_id = ingest_bytes(&engine, &dir, "clip.mp4", &[5u8; 30_000]).await;

        let snapshot = engine.start_seeding(content_id).await.unwrap();
        assert_eq!(snapshot.content_id, content_id);
        assert_eq!(snapshot.state, SessionState::Seeding);

        let stats = engine.global_stats().await;
        assert_eq!(stats.active_sessions, 1);
        assert_eq!(stats.sessions.len(), 1);

        engine.stop_seeding(content_id).await.unwrap();
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_content_deletes_everything() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir).await;
        let content_id = ingest_bytes(&engine, &dir, "clip.mp4", &[6u8; 20_000]).await;

        let descriptor = engine.content(content_id).await.unwrap();
        engine.start_seeding(content_id).await.unwrap();

        engine.remove_content(content_id).await.unwrap();

        assert!(engine.content(content_id).await.is_err());
        assert!(!descriptor.stored_path.exists());
        assert!(engine.content_list().await.is_empty());

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_unknown_content_errors() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir).await;

        let result = engine.remove_content(ContentId::new([9; 20])).await;
        assert!(result.is_err());

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reseed_starts_all_registered() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir).await;
        ingest_bytes(&engine, &dir, "one.mp4", &[1u8; 10_000]).await;
        ingest_bytes(&engine, &dir, "two.mp4", &[2u8; 10_000]).await;

        let started = engine.reseed_registered().await;
        assert_eq!(started, 2);

        let stats = engine.global_stats().await;
        assert_eq!(stats.active_sessions, 2);

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_registry_survives_engine_restart() {
        let dir = TempDir::new().unwrap();
        let content_id = {
            let engine = test_engine(&dir).await;
            let id = ingest_bytes(&engine, &dir, "clip.mp4", &[7u8; 15_000]).await;
            engine.shutdown().await.unwrap();
            id
        };

        let engine = test_engine(&dir).await;
        let descriptor = engine.content(content_id).await.unwrap();
        assert_eq!(descriptor.file_name, "clip.mp4");
        assert_eq!(engine.content_list().await.len(), 1);

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_latest_stats_without_sampler_history() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir).await;

        let stats = engine.latest_stats().await;
        assert_eq!(stats.active_sessions, 0);
        assert!(stats.sessions.is_empty());

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_locator_for_registered_content() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir).await;
        let content_id = ingest_bytes(&engine, &dir, "clip.mp4", &[8u8; 5_000]).await;

        let locator = engine.locator(content_id).await.unwrap();
        assert!(locator.starts_with("magnet:?xt=urn:btih:"));

        engine.shutdown().await.unwrap();
    }
}
