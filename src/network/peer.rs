// Peer registry - Other sidecar instances, ranked by reliability
// Reliability is an exponential moving average of fetch outcomes; peers
// never leave the registry on their own, they just stop being selected.

use std::collections::HashMap;
use std::time::Instant;

// =============================================================================
// CONSTANTS
// =============================================================================

/// EMA smoothing factor
pub const RELIABILITY_ALPHA: f64 = 0.1;

/// Peers below this reliability are considered dead
pub const DEAD_THRESHOLD: f64 = 0.1;

// =============================================================================
// PEER
// =============================================================================

/// One known sidecar peer
#[derive(Debug, Clone)]
pub struct Peer {
    /// Stable identifier
    pub id: String,

    /// Base URL of the peer's HTTP surface
    pub url: String,

    /// Liveness; false once reliability drops below the threshold
    pub alive: bool,

    /// Success EMA in [0, 1]
    pub reliability: f64,

    /// Last successful interaction
    pub last_seen: Option<Instant>,
}

impl Peer {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            alive: true,
            reliability: 1.0,
            last_seen: None,
        }
    }

    /// Fold one outcome into the EMA and refresh liveness
    pub fn record(&mut self, success: bool) {
        let sample = if success { 1.0 } else { 0.0 };
        self.reliability = (1.0 - RELIABILITY_ALPHA) * self.reliability + RELIABILITY_ALPHA * sample;
        self.alive = self.reliability >= DEAD_THRESHOLD;
        if success {
            self.last_seen = Some(Instant::now());
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.alive
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Registry of known peers. Single-writer: only the gossip controller
/// mutates it; readers take snapshots.
#[derive(Default)]
pub struct PeerRegistry {
    peers: HashMap<String, Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer; an existing entry keeps its track record
    pub fn register(&mut self, id: impl Into<String>, url: impl Into<String>) {
        let id = id.into();
        let url = url.into();
        self.peers
            .entry(id.clone())
            .and_modify(|p| p.url = url.clone())
            .or_insert_with(|| Peer::new(id, url));
    }

    pub fn update_reliability(&mut self, id: &str, success: bool) {
        if let Some(peer) = self.peers.get_mut(id) {
            peer.record(success);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Peer> {
        self.peers.get(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Snapshot of live peers, most reliable first
    pub fn healthy_peers(&self) -> Vec<Peer> {
        let mut healthy: Vec<Peer> = self
            .peers
            .values()
            .filter(|p| p.is_healthy())
            .cloned()
            .collect();
        healthy.sort_by(|a, b| {
            b.reliability
                .partial_cmp(&a.reliability)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        healthy
    }

    /// Snapshot of every peer (diagnostics)
    pub fn all_peers(&self) -> Vec<Peer> {
        self.peers.values().cloned().collect()
    }
}
