//! In-memory discovery and swarm simulation
//!
//! Offline stand-ins for the real network: [`InMemoryDiscovery`] keeps swarm
//! membership in a process-local table and fabricates deterministic peers,
//! while the swarm simulator drives live sessions with seeded peer churn and
//! chunk reads. Same seed, same behavior.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use uuid::Uuid;

use super::discovery::{
    AnnounceEvent, AnnounceRequest, AnnounceResponse, DiscoveryError, SwarmDiscovery,
};
use super::manager::SessionTable;
use super::peers::ConnectionKind;
use super::session::SessionHandle;
use crate::content::ContentId;

/// Process-local discovery backend.
pub struct InMemoryDiscovery {
    swarms: Mutex<HashMap<ContentId, HashSet<SocketAddr>>>,
    seed: u64,
    fabricated_peer_count: usize,
    interval: Duration,
}

impl Default for InMemoryDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDiscovery {
    /// Creates a discovery backend with the default seed.
    pub fn new() -> Self {
        Self::with_seed(42)
    }

    /// Creates a discovery backend with a custom seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            swarms: Mutex::new(HashMap::new()),
            seed,
            fabricated_peer_count: 3,
            interval: Duration::from_secs(60),
        }
    }

    /// Sets how many peers get fabricated per swarm.
    pub fn with_fabricated_peers(mut self, count: usize) -> Self {
        self.fabricated_peer_count = count;
        self
    }

    /// Sets the reannounce interval handed to sessions.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Number of known members for a swarm.
    pub fn swarm_size(&self, content_id: ContentId) -> usize {
        self.swarms
            .lock()
            .get(&content_id)
            .map_or(0, HashSet::len)
    }

    /// Fabricated swarm members, a pure function of seed and content id.
    fn fabricated_peers(&self, content_id: ContentId) -> Vec<SocketAddr> {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&content_id.as_bytes()[..8]);
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ u64::from_be_bytes(prefix));

        let mut peers = Vec::new();
        for i in 0..self.fabricated_peer_count {
            let ip = format!(
                "192.168.{}.{}",
                1 + (i / 250),
                rng.random_range(2..=254)
            );
            let port = rng.random_range(6881..=6999);
            if let Ok(addr) = format!("{ip}:{port}").parse() {
                peers.push(addr);
            }
        }
        peers
    }
}

#[async_trait]
impl SwarmDiscovery for InMemoryDiscovery {
    async fn announce(&self, request: AnnounceRequest) -> Result<AnnounceResponse, DiscoveryError> {
        let fabricated = self.fabricated_peers(request.content_id);
        let self_addr: Option<SocketAddr> = if request.listen_port > 0 {
            format!("127.0.0.1:{}", request.listen_port).parse().ok()
        } else {
            None
        };

        let mut swarms = self.swarms.lock();
        let members = swarms.entry(request.content_id).or_default();
        members.extend(fabricated);

        if let Some(addr) = self_addr {
            if request.event == Some(AnnounceEvent::Stopped) {
                members.remove(&addr);
            } else {
                members.insert(addr);
            }
        }

        let mut peers: Vec<SocketAddr> = members
            .iter()
            .filter(|addr| Some(**addr) != self_addr)
            .copied()
            .collect();
        peers.sort();

        Ok(AnnounceResponse {
            interval: self.interval,
            peers,
        })
    }

    async fn deregister(
        &self,
        content_id: ContentId,
        listen_port: u16,
    ) -> Result<(), DiscoveryError> {
        if let Ok(addr) = format!("127.0.0.1:{listen_port}").parse::<SocketAddr>() {
            let mut swarms = self.swarms.lock();
            if let Some(members) = swarms.get_mut(&content_id) {
                members.remove(&addr);
            }
        }
        Ok(())
    }

    async fn find_peers(&self, content_id: ContentId) -> Result<Vec<SocketAddr>, DiscoveryError> {
        let swarms = self.swarms.lock();
        let mut peers: Vec<SocketAddr> = swarms
            .get(&content_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default();
        peers.sort();
        Ok(peers)
    }
}

/// Tuning knobs for the swarm simulator.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Time between churn rounds
    pub tick_interval: Duration,
    /// Peer connections per session before connects pause
    pub max_peers_per_session: usize,
    /// Chance of a new peer connecting per tick
    pub connect_probability: f64,
    /// Chance of each peer reporting a transfer per tick
    pub transfer_probability: f64,
    /// Chance of each peer disconnecting per tick
    pub disconnect_probability: f64,
    /// Upper bound on a single transfer report
    pub max_transfer_bytes: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(500),
            max_peers_per_session: 6,
            connect_probability: 0.6,
            transfer_probability: 0.8,
            disconnect_probability: 0.1,
            max_transfer_bytes: 262_144,
        }
    }
}

/// Spawns a task that drives every live session with seeded peer churn.
///
/// Each tick the simulator may connect fabricated peers, report transfers,
/// disconnect peers, and read chunks through the session handles it finds in
/// the table. Sessions that disappear are forgotten; errors from sessions
/// mid-stop are ignored.
pub fn spawn_swarm_simulator(
    table: SessionTable,
    config: SimulatorConfig,
    seed: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut connected: HashMap<Uuid, Vec<SocketAddr>> = HashMap::new();
        let mut ticker = tokio::time::interval(config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!(seed, "Swarm simulator running");

        loop {
            ticker.tick().await;

            let handles: Vec<SessionHandle> =
                table.read().await.values().cloned().collect();
            let live: HashSet<Uuid> = handles.iter().map(SessionHandle::session_id).collect();
            connected.retain(|session_id, _| live.contains(session_id));

            for handle in handles {
                let peers = connected.entry(handle.session_id()).or_default();

                if peers.len() < config.max_peers_per_session
                    && rng.random_bool(config.connect_probability)
                {
                    let candidate = format!(
                        "172.16.{}.{}:{}",
                        rng.random_range(0..=15),
                        rng.random_range(1..=254),
                        rng.random_range(6881..=6999)
                    );
                    if let Ok(addr) = candidate.parse::<SocketAddr>() {
                        let kind = if rng.random_bool(0.7) {
                            ConnectionKind::Direct
                        } else {
                            ConnectionKind::Relayed
                        };
                        if handle.peer_connected(addr, kind).await.is_ok() {
                            peers.push(addr);
                        }
                    }
                }

                let mut departed = Vec::new();
                for &addr in peers.iter() {
                    if rng.random_bool(config.transfer_probability) {
                        let uploaded = rng.random_range(4096..=config.max_transfer_bytes);
                        let downloaded = rng.random_range(0..=uploaded / 4);
                        let _ = handle.peer_transferred(addr, uploaded, downloaded).await;
                    }
                    if rng.random_bool(config.disconnect_probability) {
                        let _ = handle.peer_disconnected(addr).await;
                        departed.push(addr);
                    }
                }
                peers.retain(|addr| !departed.contains(addr));

                if rng.random_bool(0.5) {
                    let index = rng.random_range(0..4);
                    let _ = handle.read_chunk(index).await;
                }
            }
        }
    })
}
