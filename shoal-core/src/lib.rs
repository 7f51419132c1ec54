//! Shoal Core - Essential content distribution and swarm telemetry functionality
//!
//! This crate provides the fundamental building blocks for peer-to-peer video
//! distribution: content addressing, the durable content registry, swarm
//! session management, peer tracking, telemetry aggregation, and ingestion.

pub mod config;
pub mod content;
pub mod engine;
pub mod ingest;
pub mod swarm;
pub mod telemetry;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::ShoalConfig;
pub use content::{ContentAddressor, ContentDescriptor, ContentError, ContentId, ContentRegistry};
pub use engine::ShoalEngine;
pub use ingest::{IngestError, IngestOutcome, IngestRequest};
pub use swarm::{DiscoveryError, SessionState, SwarmError};
pub use telemetry::{GlobalStats, TelemetryAggregator};

use content::RegistryError;

/// Core errors that can bubble up from any Shoal subsystem.
///
/// High-level error types representing failures in core functionality.
#[derive(Debug, thiserror::Error)]
pub enum ShoalError {
    #[error("Content error: {0}")]
    Content(#[from] ContentError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Swarm error: {0}")]
    Swarm(#[from] SwarmError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShoalError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            ShoalError::Content(e) => match e {
                ContentError::EmptyContent => "Cannot address empty content".to_string(),
                ContentError::InvalidLocator { reason } => {
                    format!("Invalid content locator: {reason}")
                }
                ContentError::InvalidId { reason } => format!("Invalid content id: {reason}"),
                _ => "Content addressing error occurred".to_string(),
            },
            ShoalError::Registry(e) => match e {
                RegistryError::NotFound { content_id } => {
                    format!("Content {content_id} not found")
                }
                RegistryError::Conflict { content_id, .. } => {
                    format!("Content {content_id} already registered with different metadata")
                }
                _ => "Registry error occurred".to_string(),
            },
            ShoalError::Swarm(e) => match e {
                SwarmError::UnknownContent { content_id } => {
                    format!("No swarm session for content {content_id}")
                }
                SwarmError::DiscoveryUnavailable { .. } => {
                    "Swarm discovery is unavailable".to_string()
                }
                _ => "Swarm error occurred".to_string(),
            },
            ShoalError::Ingest(e) => match e {
                IngestError::Validation { reason } => format!("Upload rejected: {reason}"),
                _ => "Upload failed".to_string(),
            },
            ShoalError::Discovery(_) => "Swarm discovery error occurred".to_string(),
            ShoalError::Configuration { reason } => format!("Configuration error: {reason}"),
            ShoalError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ShoalError::Configuration { .. }
                | ShoalError::Ingest(IngestError::Validation { .. })
                | ShoalError::Content(ContentError::EmptyContent)
                | ShoalError::Content(ContentError::InvalidLocator { .. })
                | ShoalError::Content(ContentError::InvalidId { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, ShoalError>;
