// Network - Peer gossip, gap detection, verified block recovery
pub mod client;
pub mod fetch;
pub mod gap;
pub mod peer;
pub mod sync;

pub use client::{NetworkError, PeerClient, PeerEntry, PEER_ID_HEADER};
pub use fetch::{BlockFetcher, BlockSource};
pub use gap::{find_gaps, gap_size};
pub use peer::{Peer, PeerRegistry, DEAD_THRESHOLD, RELIABILITY_ALPHA};
pub use sync::{SyncConfig, SyncController, SyncOutcome};
