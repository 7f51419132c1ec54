//! Per-session peer connection tracking
//!
//! Tracks live peer connections with cumulative transfer counters and
//! recent transfer rates. Counters from departed peers are handed back to
//! the caller on removal so session totals never lose bytes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a peer reached this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    /// Peer connected directly
    Direct,
    /// Peer connected through a relay
    Relayed,
}

/// Live connection entry.
#[derive(Debug, Clone)]
struct PeerRecord {
    kind: ConnectionKind,
    connected_at: DateTime<Utc>,
    uploaded: u64,
    downloaded: u64,
    upload_rate: f64,
    download_rate: f64,
    last_transfer: Instant,
}

/// Serializable view of one connected peer.
#[derive(Debug, Clone, Serialize)]
pub struct PeerSnapshot {
    /// Peer address
    pub addr: SocketAddr,
    /// Connection kind
    pub kind: ConnectionKind,
    /// When the connection was registered
    pub connected_at: DateTime<Utc>,
    /// Bytes sent to this peer over the current connection
    pub uploaded: u64,
    /// Bytes received from this peer over the current connection
    pub downloaded: u64,
    /// Recent upload rate in bytes per second
    pub upload_rate: f64,
    /// Recent download rate in bytes per second
    pub download_rate: f64,
}

/// Connection table for one session.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<SocketAddr, PeerRecord>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
        }
    }

    /// Registers a connection.
    ///
    /// A reconnect from an address already in the table replaces the old
    /// record and returns its `(uploaded, downloaded)` counters so the
    /// caller can fold them into its session totals.
    pub fn connect(&mut self, addr: SocketAddr, kind: ConnectionKind) -> Option<(u64, u64)> {
        let record = PeerRecord {
            kind,
            connected_at: Utc::now(),
            uploaded: 0,
            downloaded: 0,
            upload_rate: 0.0,
            download_rate: 0.0,
            last_transfer: Instant::now(),
        };
        self.peers
            .insert(addr, record)
            .map(|old| (old.uploaded, old.downloaded))
    }

    /// Adds transfer deltas to a connected peer.
    ///
    /// Returns false when the address is unknown; the deltas are dropped
    /// rather than attributed to a phantom connection.
    pub fn record_transfer(
        &mut self,
        addr: SocketAddr,
        uploaded_delta: u64,
        downloaded_delta: u64,
    ) -> bool {
        let Some(peer) = self.peers.get_mut(&addr) else {
            return false;
        };

        let elapsed = peer.last_transfer.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            peer.upload_rate = uploaded_delta as f64 / elapsed;
            peer.download_rate = downloaded_delta as f64 / elapsed;
        }

        peer.uploaded += uploaded_delta;
        peer.downloaded += downloaded_delta;
        peer.last_transfer = Instant::now();
        true
    }

    /// Removes a connection, returning its counters for folding.
    pub fn disconnect(&mut self, addr: SocketAddr) -> Option<(u64, u64)> {
        self.peers
            .remove(&addr)
            .map(|old| (old.uploaded, old.downloaded))
    }

    /// Removes all connections, returning their summed counters.
    pub fn drain(&mut self) -> (u64, u64) {
        let mut uploaded = 0;
        let mut downloaded = 0;
        for (_, record) in self.peers.drain() {
            uploaded += record.uploaded;
            downloaded += record.downloaded;
        }
        (uploaded, downloaded)
    }

    /// Summed counters across live connections.
    pub fn totals(&self) -> (u64, u64) {
        self.peers.values().fold((0, 0), |(up, down), record| {
            (up + record.uploaded, down + record.downloaded)
        })
    }

    /// Summed transfer rates across peers active within the window.
    pub fn aggregate_rates(&self, window: Duration) -> (f64, f64) {
        self.peers.values().fold((0.0, 0.0), |(up, down), record| {
            if record.last_transfer.elapsed() <= window {
                (up + record.upload_rate, down + record.download_rate)
            } else {
                (up, down)
            }
        })
    }

    /// Snapshots of all live connections, oldest connection first.
    ///
    /// Rates read as zero for peers idle longer than the window.
    pub fn snapshots(&self, window: Duration) -> Vec<PeerSnapshot> {
        let mut snapshots: Vec<PeerSnapshot> = self
            .peers
            .iter()
            .map(|(addr, record)| {
                let stale = record.last_transfer.elapsed() > window;
                PeerSnapshot {
                    addr: *addr,
                    kind: record.kind,
                    connected_at: record.connected_at,
                    uploaded: record.uploaded,
                    downloaded: record.downloaded,
                    upload_rate: if stale { 0.0 } else { record.upload_rate },
                    download_rate: if stale { 0.0 } else { record.download_rate },
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.connected_at.cmp(&b.connected_at).then_with(|| a.addr.cmp(&b.addr)));
        snapshots
    }

    pub fn contains(&self, addr: SocketAddr) -> bool {
        self.peers.contains_key(&addr)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last_octet: u8, port: u16) -> SocketAddr {
        format!("10.0.0.{last_octet}:{port}").parse().unwrap()
    }

    #[test]
    fn test_connect_and_transfer() {
        let mut table = PeerTable::new();
        table.connect(addr(1, 6881), ConnectionKind::Direct);
        table.connect(addr(2, 6882), ConnectionKind::Relayed);

        assert!(table.record_transfer(addr(1, 6881), 100, 50));
        assert!(table.record_transfer(addr(2, 6882), 200, 0));

        assert_eq!(table.len(), 2);
        assert_eq!(table.totals(), (300, 50));
    }

    #[test]
    fn test_unknown_peer_transfer_dropped() {
        let mut table = PeerTable::new();
        assert!(!table.record_transfer(addr(1, 6881), 100, 0));
        assert_eq!(table.totals(), (0, 0));
    }

    #[test]
    fn test_disconnect_returns_counters() {
        let mut table = PeerTable::new();
        table.connect(addr(1, 6881), ConnectionKind::Direct);
        table.record_transfer(addr(1, 6881), 150, 75);

        let folded = table.disconnect(addr(1, 6881));
        assert_eq!(folded, Some((150, 75)));
        assert!(table.is_empty());

        assert_eq!(table.disconnect(addr(1, 6881)), None);
    }

    #[test]
    fn test_reconnect_folds_old_counters() {
        let mut table = PeerTable::new();
        table.connect(addr(1, 6881), ConnectionKind::Direct);
        table.record_transfer(addr(1, 6881), 500, 0);

        let folded = table.connect(addr(1, 6881), ConnectionKind::Direct);
        assert_eq!(folded, Some((500, 0)));

        // Fresh connection starts from zero
        assert_eq!(table.totals(), (0, 0));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_drain_sums_everything() {
        let mut table = PeerTable::new();
        table.connect(addr(1, 6881), ConnectionKind::Direct);
        table.connect(addr(2, 6882), ConnectionKind::Direct);
        table.record_transfer(addr(1, 6881), 100, 10);
        table.record_transfer(addr(2, 6882), 200, 20);

        assert_eq!(table.drain(), (300, 30));
        assert!(table.is_empty());
    }

    #[test]
    fn test_rates_computed_from_deltas() {
        let mut table = PeerTable::new();
        table.connect(addr(1, 6881), ConnectionKind::Direct);

        std::thread::sleep(Duration::from_millis(20));
        table.record_transfer(addr(1, 6881), 1000, 0);

        let (upload_rate, _) = table.aggregate_rates(Duration::from_secs(5));
        assert!(upload_rate > 0.0);

        let snapshots = table.snapshots(Duration::from_secs(5));
        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].upload_rate > 0.0);
    }

    #[test]
    fn test_stale_rates_read_zero() {
        let mut table = PeerTable::new();
        table.connect(addr(1, 6881), ConnectionKind::Direct);

        std::thread::sleep(Duration::from_millis(10));
        table.record_transfer(addr(1, 6881), 1000, 500);
        std::thread::sleep(Duration::from_millis(30));

        let (up, down) = table.aggregate_rates(Duration::from_millis(5));
        assert_eq!(up, 0.0);
        assert_eq!(down, 0.0);

        let snapshots = table.snapshots(Duration::from_millis(5));
        assert_eq!(snapshots[0].upload_rate, 0.0);
        // Counters are unaffected by rate staleness
        assert_eq!(snapshots[0].uploaded, 1000);
        assert_eq!(snapshots[0].downloaded, 500);
    }

    #[test]
    fn test_snapshots_ordered_by_connection_time() {
        let mut table = PeerTable::new();
        table.connect(addr(1, 6881), ConnectionKind::Direct);
        std::thread::sleep(Duration::from_millis(5));
        table.connect(addr(2, 6882), ConnectionKind::Relayed);

        let snapshots = table.snapshots(Duration::from_secs(5));
        assert_eq!(snapshots[0].addr, addr(1, 6881));
        assert_eq!(snapshots[1].addr, addr(2, 6882));
    }
}
