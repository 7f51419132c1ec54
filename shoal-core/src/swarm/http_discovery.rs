//! HTTP discovery backend
//!
//! Speaks a small JSON protocol: announces go out as GET requests with query
//! parameters, responses carry a reannounce interval and a peer address list.
//! Multiple endpoints are tried in order until one succeeds.

use std::net::SocketAddr;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::discovery::{
    AnnounceEvent, AnnounceRequest, AnnounceResponse, DiscoveryError, SwarmDiscovery,
};
use crate::config::DiscoveryConfig;
use crate::content::ContentId;

/// Discovery client announcing over HTTP with endpoint failover.
pub struct HttpDiscovery {
    announce_urls: Vec<String>,
    client: reqwest::Client,
}

/// Announce response wire format.
#[derive(Debug, Deserialize)]
struct AnnounceWire {
    /// Reannounce interval in seconds
    interval: u64,
    /// Peer addresses as "ip:port" strings
    #[serde(default)]
    peers: Vec<String>,
}

impl HttpDiscovery {
    /// Creates a discovery client from configuration.
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            announce_urls: config.announce_urls.clone(),
            client: reqwest::Client::builder()
                .timeout(config.announce_timeout)
                .user_agent(config.user_agent)
                .redirect(reqwest::redirect::Policy::limited(3))
                .build()
                .expect("HTTP client creation should not fail"),
        }
    }

    /// Announces to a single endpoint.
    async fn announce_to(
        &self,
        endpoint: &str,
        request: &AnnounceRequest,
    ) -> Result<AnnounceResponse, DiscoveryError> {
        let url = build_announce_url(endpoint, request)?;

        let response =
            self.client
                .get(url)
                .send()
                .await
                .map_err(|e| DiscoveryError::RequestFailed {
                    reason: format!("{endpoint}: {e}"),
                })?;

        if !response.status().is_success() {
            return Err(DiscoveryError::AnnounceRejected {
                url: endpoint.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let wire: AnnounceWire =
            response
                .json()
                .await
                .map_err(|e| DiscoveryError::InvalidResponse {
                    reason: format!("{endpoint}: {e}"),
                })?;

        Ok(AnnounceResponse {
            interval: std::time::Duration::from_secs(wire.interval),
            peers: parse_peer_entries(&wire.peers),
        })
    }
}

#[async_trait]
impl SwarmDiscovery for HttpDiscovery {
    async fn announce(&self, request: AnnounceRequest) -> Result<AnnounceResponse, DiscoveryError> {
        if self.announce_urls.is_empty() {
            return Err(DiscoveryError::AllEndpointsFailed {
                reason: "no announce URLs configured".to_string(),
            });
        }

        let mut last_error = None;

        for endpoint in &self.announce_urls {
            match self.announce_to(endpoint, &request).await {
                Ok(response) => {
                    tracing::debug!(
                        endpoint,
                        content_id = %request.content_id,
                        peers = response.peers.len(),
                        "Announce accepted"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    tracing::warn!(endpoint, "Announce failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DiscoveryError::AllEndpointsFailed {
            reason: "all announce URLs failed".to_string(),
        }))
    }

    async fn deregister(
        &self,
        content_id: ContentId,
        listen_port: u16,
    ) -> Result<(), DiscoveryError> {
        let request = AnnounceRequest {
            content_id,
            listen_port,
            uploaded: 0,
            downloaded: 0,
            left: 0,
            event: Some(AnnounceEvent::Stopped),
        };
        self.announce(request).await.map(|_| ())
    }

    async fn find_peers(&self, content_id: ContentId) -> Result<Vec<SocketAddr>, DiscoveryError> {
        let request = AnnounceRequest {
            content_id,
            listen_port: 0,
            uploaded: 0,
            downloaded: 0,
            left: 0,
            event: None,
        };
        self.announce(request).await.map(|response| response.peers)
    }
}

/// Builds the announce URL with query parameters.
fn build_announce_url(endpoint: &str, request: &AnnounceRequest) -> Result<Url, DiscoveryError> {
    let mut params = vec![
        ("content_id".to_string(), request.content_id.to_string()),
        ("port".to_string(), request.listen_port.to_string()),
        ("uploaded".to_string(), request.uploaded.to_string()),
        ("downloaded".to_string(), request.downloaded.to_string()),
        ("left".to_string(), request.left.to_string()),
    ];
    if let Some(event) = request.event {
        params.push(("event".to_string(), event.as_str().to_string()));
    }

    Url::parse_with_params(endpoint, &params).map_err(|e| DiscoveryError::RequestFailed {
        reason: format!("invalid announce URL {endpoint}: {e}"),
    })
}

/// Parses "ip:port" entries, skipping any that do not parse.
fn parse_peer_entries(entries: &[String]) -> Vec<SocketAddr> {
    let mut peers = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry.parse::<SocketAddr>() {
            Ok(addr) => peers.push(addr),
            Err(_) => tracing::warn!(entry, "Skipping unparseable peer address"),
        }
    }
    peers
}
