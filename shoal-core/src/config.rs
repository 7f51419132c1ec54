//! Centralized configuration for Shoal.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Shoal components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct ShoalConfig {
    pub ingest: IngestConfig,
    pub swarm: SwarmConfig,
    pub discovery: DiscoveryConfig,
    pub telemetry: TelemetryConfig,
    pub storage: StorageConfig,
}

/// Upload ingestion configuration.
///
/// Controls upload size limits, chunking parameters, and the set of
/// media types accepted by the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Hard limit on a single upload in bytes
    pub max_upload_bytes: u64,
    /// Chunk size used for content addressing
    pub chunk_size: u32,
    /// Media types accepted for upload
    pub allowed_media_types: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 2 * 1024 * 1024 * 1024, // 2 GiB
            chunk_size: crate::content::DEFAULT_CHUNK_SIZE,
            allowed_media_types: vec![
                "video/mp4".to_string(),
                "video/webm".to_string(),
                "video/x-matroska".to_string(),
                "video/quicktime".to_string(),
                "video/x-msvideo".to_string(),
                "video/ogg".to_string(),
            ],
        }
    }
}

/// Swarm session configuration.
///
/// Controls session lifecycle timing, peer limits, and chunk serving
/// behavior for active seeding sessions.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// TCP port reported to discovery for inbound peer connections
    pub listen_port: u16,
    /// Maximum time a graceful session stop may take before force close
    pub stop_grace_period: Duration,
    /// Interval between periodic re-announces while seeding
    pub reannounce_interval: Duration,
    /// Maximum tracked peer connections per session
    pub max_peer_connections: usize,
    /// Attempts per chunk read before the session degrades
    pub chunk_read_retry_limit: u32,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            listen_port: 6881,
            stop_grace_period: Duration::from_secs(5),
            reannounce_interval: Duration::from_secs(1800), // 30 minutes
            max_peer_connections: 50,
            chunk_read_retry_limit: 3,
        }
    }
}

/// Swarm discovery communication configuration.
///
/// Controls announce endpoints, HTTP timeouts, and the retry backoff
/// applied when discovery endpoints are unreachable.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Announce endpoints tried in order until one succeeds
    pub announce_urls: Vec<String>,
    /// HTTP request timeout for announce operations
    pub announce_timeout: Duration,
    /// Announce attempts before a session start fails or degrades
    pub announce_retry_limit: u32,
    /// Base delay for exponential announce backoff
    pub retry_base_delay: Duration,
    /// Maximum delay for exponential announce backoff
    pub retry_max_delay: Duration,
    /// User agent for HTTP requests
    pub user_agent: &'static str,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            announce_urls: vec!["http://tracker.opentrackr.org:1337/announce".to_string()],
            announce_timeout: Duration::from_secs(30),
            announce_retry_limit: 5,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
            user_agent: "shoal/0.1.0",
        }
    }
}

/// Telemetry sampling configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Interval between background global stats samples
    pub sample_interval: Duration,
    /// Window after which a silent peer's instantaneous rate reads as zero
    pub rate_window: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(5),
            rate_window: Duration::from_secs(5),
        }
    }
}

/// File storage and state persistence configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding the durable registry state and staging area
    pub state_dir: PathBuf,
    /// Directory holding stored content, one subdirectory per content id
    pub library_dir: PathBuf,
    /// Buffer size for file operations
    pub file_buffer_size: usize,
    /// Temporary file suffix for atomic writes
    pub temp_file_suffix: &'static str,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("./shoal-state"),
            library_dir: PathBuf::from("./shoal-library"),
            file_buffer_size: 65536, // 64 KiB
            temp_file_suffix: ".tmp",
        }
    }
}

impl StorageConfig {
    /// Path of the durable registry state file.
    pub fn registry_path(&self) -> PathBuf {
        self.state_dir.join("registry.json")
    }

    /// Directory where uploads are staged before addressing completes.
    pub fn staging_dir(&self) -> PathBuf {
        self.state_dir.join("staging")
    }
}

impl ShoalConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(max_bytes) = std::env::var("SHOAL_MAX_UPLOAD_BYTES") {
            if let Ok(bytes) = max_bytes.parse::<u64>() {
                config.ingest.max_upload_bytes = bytes;
            }
        }

        if let Ok(port) = std::env::var("SHOAL_LISTEN_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.swarm.listen_port = port;
            }
        }

        if let Ok(urls) = std::env::var("SHOAL_ANNOUNCE_URLS") {
            let urls: Vec<String> = urls
                .split(',')
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty())
                .collect();
            if !urls.is_empty() {
                config.discovery.announce_urls = urls;
            }
        }

        if let Ok(timeout) = std::env::var("SHOAL_ANNOUNCE_TIMEOUT") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.discovery.announce_timeout = Duration::from_secs(seconds);
            }
        }

        if let Ok(interval) = std::env::var("SHOAL_SAMPLE_INTERVAL") {
            if let Ok(seconds) = interval.parse::<u64>() {
                config.telemetry.sample_interval = Duration::from_secs(seconds);
            }
        }

        if let Ok(dir) = std::env::var("SHOAL_STATE_DIR") {
            config.storage.state_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("SHOAL_LIBRARY_DIR") {
            config.storage.library_dir = PathBuf::from(dir);
        }

        config
    }

    /// Creates a configuration with short timing intervals for tests.
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        config.swarm.stop_grace_period = Duration::from_secs(1);
        config.swarm.reannounce_interval = Duration::from_millis(50);
        config.discovery.announce_timeout = Duration::from_millis(500);
        config.discovery.announce_retry_limit = 2;
        config.discovery.retry_base_delay = Duration::from_millis(10);
        config.discovery.retry_max_delay = Duration::from_millis(50);
        config.telemetry.sample_interval = Duration::from_millis(50);
        config
    }
}
