//! API handlers for video management and swarm telemetry

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shoal_core::content::ContentDescriptor;
use shoal_core::content::RegistryError;
use shoal_core::ingest::IngestRequest;
use shoal_core::swarm::{ConnectionKind, PeerSnapshot, SessionSnapshot};
use shoal_core::telemetry::GlobalStats;
use shoal_core::{ContentId, IngestError, SessionState, ShoalError, SwarmError};

use crate::server::AppState;

/// An API failure with the HTTP status it maps to.
///
/// Serialized as `{ "success": false, "error": "..." }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message,
        }
    }
}

impl From<ShoalError> for ApiError {
    fn from(error: ShoalError) -> Self {
        let status = match &error {
            ShoalError::Registry(RegistryError::NotFound { .. })
            | ShoalError::Ingest(IngestError::Registry(RegistryError::NotFound { .. }))
            | ShoalError::Swarm(SwarmError::UnknownContent { .. }) => StatusCode::NOT_FOUND,
            ShoalError::Registry(RegistryError::Conflict { .. })
            | ShoalError::Ingest(IngestError::Registry(RegistryError::Conflict { .. }))
            | ShoalError::Swarm(SwarmError::SessionStopping { .. }) => StatusCode::CONFLICT,
            ShoalError::Swarm(SwarmError::DiscoveryUnavailable { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            other if other.is_user_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status.is_server_error() {
            tracing::error!("API request failed: {error}");
            error.user_message()
        } else {
            error.to_string()
        };

        Self { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": self.message,
        }));
        (self.status, body).into_response()
    }
}

/// One registered video, as the API presents it.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoBody {
    /// Hex content id
    pub id: String,
    /// Stored file name
    pub file_name: String,
    /// Size in bytes
    pub size: u64,
    /// Media type, e.g. `video/mp4`
    pub media_type: String,
    /// Shareable locator string
    pub locator: String,
    /// Chunk size the content was addressed with
    pub chunk_size: u32,
    /// Number of addressed chunks
    pub chunk_count: usize,
    /// Registration time
    pub created_at: DateTime<Utc>,
}

impl From<&ContentDescriptor> for VideoBody {
    fn from(descriptor: &ContentDescriptor) -> Self {
        Self {
            id: descriptor.content_id.to_string(),
            file_name: descriptor.file_name.clone(),
            size: descriptor.size,
            media_type: descriptor.media_type.clone(),
            locator: descriptor.locator.clone(),
            chunk_size: descriptor.chunk_size,
            chunk_count: descriptor.chunk_hashes.len(),
            created_at: descriptor.created_at,
        }
    }
}

/// One connected peer inside a session stats body.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStats {
    /// Peer IP address
    pub address: String,
    /// Peer port
    pub port: u16,
    /// How the peer reached us
    #[serde(rename = "type")]
    pub kind: ConnectionKind,
    /// When the connection was registered
    pub connected_at: DateTime<Utc>,
    /// Bytes sent to this peer
    pub uploaded: u64,
    /// Bytes received from this peer
    pub downloaded: u64,
    /// Recent upload rate in bytes per second
    pub upload_rate: f64,
    /// Recent download rate in bytes per second
    pub download_rate: f64,
}

impl From<&PeerSnapshot> for PeerStats {
    fn from(peer: &PeerSnapshot) -> Self {
        Self {
            address: peer.addr.ip().to_string(),
            port: peer.addr.port(),
            kind: peer.kind,
            connected_at: peer.connected_at,
            uploaded: peer.uploaded,
            downloaded: peer.downloaded,
            upload_rate: peer.upload_rate,
            download_rate: peer.download_rate,
        }
    }
}

/// Telemetry for one seeding session.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    /// Session identifier, fresh per start
    pub session_id: String,
    /// Content this session seeds
    pub content_id: String,
    /// Display name of the content
    pub file_name: String,
    /// Session lifecycle state
    pub state: SessionState,
    /// Why the session is degraded, when it is
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
    /// When the session started
    pub started_at: DateTime<Utc>,
    /// Lifetime bytes uploaded, departed peers included
    pub uploaded: u64,
    /// Lifetime bytes downloaded, departed peers included
    pub downloaded: u64,
    /// Aggregate upload rate in bytes per second
    pub upload_rate: f64,
    /// Aggregate download rate in bytes per second
    pub download_rate: f64,
    /// Live peer count
    pub peer_count: usize,
    /// Per-peer breakdown
    pub peers: Vec<PeerStats>,
}

impl From<&SessionSnapshot> for SessionStats {
    fn from(snapshot: &SessionSnapshot) -> Self {
        Self {
            session_id: snapshot.session_id.to_string(),
            content_id: snapshot.content_id.to_string(),
            file_name: snapshot.file_name.clone(),
            state: snapshot.state,
            degraded_reason: snapshot.degraded_reason.clone(),
            started_at: snapshot.started_at,
            uploaded: snapshot.uploaded,
            downloaded: snapshot.downloaded,
            upload_rate: snapshot.upload_rate,
            download_rate: snapshot.download_rate,
            peer_count: snapshot.peer_count,
            peers: snapshot.peers.iter().map(PeerStats::from).collect(),
        }
    }
}

/// Aggregated swarm telemetry across every session.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmStatsBody {
    /// Sessions currently starting, seeding, or degraded
    pub active_sessions: usize,
    /// Live peers across all sessions
    pub total_peers: usize,
    /// Bytes uploaded across all sessions
    pub total_uploaded: u64,
    /// Bytes downloaded across all sessions
    pub total_downloaded: u64,
    /// Aggregate upload rate in bytes per second
    pub upload_rate: f64,
    /// Aggregate download rate in bytes per second
    pub download_rate: f64,
    /// When this sweep was taken
    pub sampled_at: DateTime<Utc>,
    /// Per-session breakdown
    pub sessions: Vec<SessionStats>,
}

impl From<GlobalStats> for SwarmStatsBody {
    fn from(stats: GlobalStats) -> Self {
        Self {
            active_sessions: stats.active_sessions,
            total_peers: stats.total_peers,
            total_uploaded: stats.total_uploaded,
            total_downloaded: stats.total_downloaded,
            upload_rate: stats.upload_rate,
            download_rate: stats.download_rate,
            sampled_at: stats.sampled_at,
            sessions: stats.sessions.iter().map(SessionStats::from).collect(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadBody {
    #[serde(flatten)]
    video: VideoBody,
    /// Hex digest a peer client can verify received chunks against.
    /// Identical to `id`; kept as its own field for client compatibility.
    content_hash: String,
    deduplicated: bool,
    seeding: bool,
}

/// Query parameters for the swarm stats endpoint.
#[derive(Deserialize)]
pub struct StatsQuery {
    /// Force a fresh sweep instead of the cached sample
    #[serde(default)]
    pub fresh: bool,
}

fn parse_content_id(raw: &str) -> Result<ContentId, ApiError> {
    raw.parse::<ContentId>()
        .map_err(|e| ApiError::bad_request(e.to_string()))
}

/// `POST /api/videos/upload` - multipart upload of a `video` field.
pub async fn upload_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut outcome = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed upload: {e}")))?
    {
        if field.name() != Some("video") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let media_type = field.content_type().map(str::to_string);

        let mut staged = state
            .engine
            .begin_ingest(IngestRequest {
                file_name,
                declared_size: None,
                media_type,
            })
            .await?;

        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::bad_request(format!("upload interrupted: {e}")))?
        {
            staged.write_chunk(&chunk).await.map_err(ShoalError::from)?;
        }

        outcome = Some(staged.finish().await.map_err(ShoalError::from)?);
        break;
    }

    let outcome =
        outcome.ok_or_else(|| ApiError::bad_request("missing video field".to_string()))?;
    let content_id = outcome.descriptor.content_id;

    // Freshly ingested content starts seeding right away; failure to seed
    // does not fail the upload
    let seeding = match state.engine.start_seeding(content_id).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(%content_id, "Seeding did not start after upload: {e}");
            false
        }
    };

    let message = if outcome.deduplicated {
        "Video already in the library"
    } else {
        "Video uploaded"
    };

    Ok(Json(json!({
        "success": true,
        "message": message,
        "data": UploadBody {
            video: VideoBody::from(&outcome.descriptor),
            content_hash: content_id.to_string(),
            deduplicated: outcome.deduplicated,
            seeding,
        },
    })))
}

/// `GET /api/videos` - every registered video, oldest first.
pub async fn list_videos(State(state): State<AppState>) -> Json<serde_json::Value> {
    let videos: Vec<VideoBody> = state
        .engine
        .content_list()
        .await
        .iter()
        .map(VideoBody::from)
        .collect();

    Json(json!({
        "success": true,
        "count": videos.len(),
        "data": videos,
    }))
}

/// `GET /api/videos/stats` - aggregated swarm telemetry.
pub async fn swarm_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Json<serde_json::Value> {
    let stats = if query.fresh {
        state.engine.global_stats().await
    } else {
        state.engine.latest_stats().await
    };

    Json(json!({
        "success": true,
        "data": SwarmStatsBody::from(stats),
    }))
}

/// `GET /api/videos/{id}` - one registered video.
pub async fn get_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let content_id = parse_content_id(&id)?;
    let descriptor = state.engine.content(content_id).await?;

    Ok(Json(json!({
        "success": true,
        "data": VideoBody::from(&descriptor),
    })))
}

/// `GET /api/videos/{id}/locator` - the shareable locator string.
pub async fn get_video_locator(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let content_id = parse_content_id(&id)?;
    let locator = state.engine.locator(content_id).await?;

    Ok(Json(json!({
        "success": true,
        "data": { "locator": locator },
    })))
}

/// `GET /api/videos/{id}/stats` - per-session telemetry with peers.
pub async fn get_video_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let content_id = parse_content_id(&id)?;
    let snapshot = state.engine.session_stats(content_id).await?;

    Ok(Json(json!({
        "success": true,
        "data": SessionStats::from(&snapshot),
    })))
}

/// `POST /api/videos/{id}/seed` - start (or rejoin) the seeding session.
pub async fn seed_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let content_id = parse_content_id(&id)?;
    let snapshot = state.engine.start_seeding(content_id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Seeding",
        "data": SessionStats::from(&snapshot),
    })))
}

/// `POST /api/videos/{id}/stop` - stop seeding; idempotent.
pub async fn stop_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let content_id = parse_content_id(&id)?;
    state.engine.stop_seeding(content_id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Seeding stopped",
    })))
}

/// `DELETE /api/videos/{id}` - stop seeding and remove the video.
pub async fn delete_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let content_id = parse_content_id(&id)?;
    state.engine.remove_content(content_id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Video removed",
    })))
}

/// `GET /api/health` - liveness and uptime.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptimeSeconds": state.started_at.elapsed().as_secs(),
        }
    }))
}
