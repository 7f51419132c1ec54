//! Peer discovery abstraction
//!
//! Sessions announce themselves through [`SwarmDiscovery`] without caring
//! whether the backend is a real HTTP endpoint or the in-memory simulator.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;

use crate::content::ContentId;

/// Errors from discovery operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Announce rejected by {url}: {reason}")]
    AnnounceRejected { url: String, reason: String },

    #[error("Discovery request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("All discovery endpoints failed: {reason}")]
    AllEndpointsFailed { reason: String },

    #[error("Invalid discovery response: {reason}")]
    InvalidResponse { reason: String },
}

/// Lifecycle event attached to an announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceEvent {
    /// Session began seeding
    Started,
    /// Session stopped seeding
    Stopped,
    /// Content fully acquired
    Completed,
}

impl AnnounceEvent {
    /// Wire name used in announce query strings.
    pub fn as_str(self) -> &'static str {
        match self {
            AnnounceEvent::Started => "started",
            AnnounceEvent::Stopped => "stopped",
            AnnounceEvent::Completed => "completed",
        }
    }
}

/// Parameters for one announce call.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    /// Content being announced
    pub content_id: ContentId,
    /// Port this node accepts peer connections on
    pub listen_port: u16,
    /// Total bytes uploaded in this session
    pub uploaded: u64,
    /// Total bytes downloaded in this session
    pub downloaded: u64,
    /// Bytes still needed (zero for a seeder)
    pub left: u64,
    /// Lifecycle event, absent for periodic reannounces
    pub event: Option<AnnounceEvent>,
}

impl AnnounceRequest {
    /// Announce for a fresh seeding session.
    pub fn started(content_id: ContentId, listen_port: u16) -> Self {
        Self {
            content_id,
            listen_port,
            uploaded: 0,
            downloaded: 0,
            left: 0,
            event: Some(AnnounceEvent::Started),
        }
    }

    /// Final announce when a session winds down.
    pub fn stopped(content_id: ContentId, listen_port: u16, uploaded: u64, downloaded: u64) -> Self {
        Self {
            content_id,
            listen_port,
            uploaded,
            downloaded,
            left: 0,
            event: Some(AnnounceEvent::Stopped),
        }
    }
}

/// Discovery answer: how long until reannounce, and who else is in the swarm.
#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    /// Requested reannounce interval
    pub interval: Duration,
    /// Known peer addresses for this content
    pub peers: Vec<SocketAddr>,
}

/// Backend-neutral peer discovery.
#[async_trait]
pub trait SwarmDiscovery: Send + Sync {
    /// Announces session presence and returns swarm membership.
    async fn announce(&self, request: AnnounceRequest) -> Result<AnnounceResponse, DiscoveryError>;

    /// Removes this node from the swarm for the given content.
    async fn deregister(
        &self,
        content_id: ContentId,
        listen_port: u16,
    ) -> Result<(), DiscoveryError>;

    /// Looks up current peers without announcing presence.
    async fn find_peers(&self, content_id: ContentId) -> Result<Vec<SocketAddr>, DiscoveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_names() {
        assert_eq!(AnnounceEvent::Started.as_str(), "started");
        assert_eq!(AnnounceEvent::Stopped.as_str(), "stopped");
        assert_eq!(AnnounceEvent::Completed.as_str(), "completed");
    }

    #[test]
    fn test_started_request_defaults() {
        let request = AnnounceRequest::started(ContentId::new([1; 20]), 6881);
        assert_eq!(request.listen_port, 6881);
        assert_eq!(request.uploaded, 0);
        assert_eq!(request.left, 0);
        assert_eq!(request.event, Some(AnnounceEvent::Started));
    }

    #[test]
    fn test_stopped_request_carries_totals() {
        let request = AnnounceRequest::stopped(ContentId::new([1; 20]), 6881, 500, 250);
        assert_eq!(request.uploaded, 500);
        assert_eq!(request.downloaded, 250);
        assert_eq!(request.event, Some(AnnounceEvent::Stopped));
    }
}
