//! HTTP request handlers for the JSON API

pub mod api;

// Re-export handler functions
pub use api::{
    ApiError, PeerStats, SessionStats, StatsQuery, SwarmStatsBody, VideoBody, delete_video,
    get_video, get_video_locator, get_video_stats, health, list_videos, seed_video, stop_video,
    swarm_stats, upload_video,
};
