//! Swarm session management and peer discovery
//!
//! A swarm session is the unit of seeding: one registered content entry
//! announced to discovery, tracking its connected peers and transfer
//! counters. Sessions run as independent tasks behind message-passing
//! handles; the manager owns their lifecycle.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::content::ContentId;

pub mod discovery;
pub mod http_discovery;
pub mod manager;
pub mod memory;
pub mod peers;
pub mod session;

pub use discovery::{
    AnnounceEvent, AnnounceRequest, AnnounceResponse, DiscoveryError, SwarmDiscovery,
};
pub use http_discovery::HttpDiscovery;
pub use manager::{SessionTable, SwarmManagerHandle, spawn_swarm_manager};
pub use memory::{InMemoryDiscovery, SimulatorConfig, spawn_swarm_simulator};
pub use peers::{ConnectionKind, PeerSnapshot, PeerTable};
pub use session::{SessionHandle, SessionSnapshot, spawn_session};

/// Lifecycle state of a swarm session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Registered but never started
    Idle,
    /// Announcing to discovery, not yet serving
    Starting,
    /// Announced and serving chunks
    Seeding,
    /// Serving impaired (discovery unreachable or storage failing)
    Degraded,
    /// Stop requested, winding down
    Stopping,
    /// Fully wound down
    Stopped,
}

impl SessionState {
    /// Whether moving to `next` is a legal lifecycle step.
    pub fn can_transition(self, next: SessionState) -> bool {
        use SessionState::{Degraded, Idle, Seeding, Starting, Stopped, Stopping};
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Seeding | Stopping | Stopped)
                | (Seeding, Degraded | Stopping)
                | (Degraded, Seeding | Stopping)
                | (Stopping, Stopped)
        )
    }

    /// Whether a session in this state counts toward active sessions.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Starting | SessionState::Seeding | SessionState::Degraded
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Seeding => "seeding",
            SessionState::Degraded => "degraded",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}

/// Errors from swarm operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SwarmError {
    #[error("No registered content with id {content_id}")]
    UnknownContent { content_id: ContentId },

    #[error("Session for {content_id} is stopping, wait for it to finish")]
    SessionStopping { content_id: ContentId },

    #[error("Invalid session state transition: {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("Chunk {index} out of range for {content_id}")]
    ChunkOutOfRange { content_id: ContentId, index: u32 },

    #[error("Chunk {index} failed verification against its recorded digest")]
    ChunkVerificationFailed { index: u32 },

    #[error("Discovery unavailable: {reason}")]
    DiscoveryUnavailable { reason: String },

    #[error("Storage error: {reason}")]
    Storage { reason: String },

    #[error("Swarm manager is no longer running")]
    ManagerClosed,

    #[error("Swarm manager dropped the response channel")]
    ResponseDropped,

    #[error("Session is no longer running")]
    SessionClosed,
}

/// Bounded exponential backoff for announce retries.
///
/// Delay doubles per attempt starting from the base, capped at the maximum.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    /// Delay before the given attempt (1-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(2_u32.pow(exponent));
        delay.min(self.max_delay)
    }

    /// Whether the given attempt (1-based) is still within bounds.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl From<&crate::config::DiscoveryConfig> for RetryPolicy {
    fn from(config: &crate::config::DiscoveryConfig) -> Self {
        Self::new(
            config.retry_base_delay,
            config.retry_max_delay,
            config.announce_retry_limit,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        use SessionState::{Degraded, Idle, Seeding, Starting, Stopped, Stopping};

        assert!(Idle.can_transition(Starting));
        assert!(Starting.can_transition(Seeding));
        assert!(Starting.can_transition(Stopped));
        assert!(Seeding.can_transition(Degraded));
        assert!(Degraded.can_transition(Seeding));
        assert!(Degraded.can_transition(Stopping));
        assert!(Stopping.can_transition(Stopped));

        assert!(!Idle.can_transition(Seeding));
        assert!(!Seeding.can_transition(Starting));
        assert!(!Stopped.can_transition(Seeding));
        assert!(!Stopping.can_transition(Seeding));
    }

    #[test]
    fn test_active_states() {
        assert!(SessionState::Starting.is_active());
        assert!(SessionState::Seeding.is_active());
        assert!(SessionState::Degraded.is_active());
        assert!(!SessionState::Idle.is_active());
        assert!(!SessionState::Stopping.is_active());
        assert!(!SessionState::Stopped.is_active());
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&SessionState::Seeding).unwrap();
        assert_eq!(json, "\"seeding\"");
    }

    #[test]
    fn test_retry_delays_double_until_cap() {
        let policy = RetryPolicy::new(
            Duration::from_millis(100),
            Duration::from_secs(1),
            5,
        );

        assert_eq!(policy.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(400));
        assert_eq!(policy.calculate_delay(4), Duration::from_millis(800));
        assert_eq!(policy.calculate_delay(5), Duration::from_secs(1));
        assert_eq!(policy.calculate_delay(10), Duration::from_secs(1));
    }

    #[test]
    fn test_retry_bounds() {
        let policy = RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(50), 3);

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }
}
