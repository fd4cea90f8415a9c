// Block fetch - Recover missing blocks from peers with hash agreement
//
// With three or more healthy peers a block is accepted only when a strict
// majority of the queried peers agree on its hash; a thin peer set falls
// back to first-success, and the EMA quietly sorts the liars out over time.

use crate::network::client::{NetworkError, PeerClient};
use crate::network::peer::{Peer, PeerRegistry};
use crate::types::{BlockNumber, PeerBlock};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info, warn};

/// Peers queried per block
pub const DEFAULT_FETCH_PEERS: usize = 3;

/// Concurrent block fetches
pub const DEFAULT_FETCH_CONCURRENCY: usize = 3;

/// Seam over the outbound block request, so verification logic is testable
/// without sockets
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn fetch_block(
        &self,
        peer_url: &str,
        block: BlockNumber,
    ) -> Result<PeerBlock, NetworkError>;
}

#[async_trait]
impl BlockSource for PeerClient {
    async fn fetch_block(
        &self,
        peer_url: &str,
        block: BlockNumber,
    ) -> Result<PeerBlock, NetworkError> {
        PeerClient::fetch_block(self, peer_url, block, None).await
    }
}

/// Fetches blocks from the healthiest peers and verifies hash agreement
pub struct BlockFetcher {
    source: Arc<dyn BlockSource>,
    registry: Arc<RwLock<PeerRegistry>>,

    /// Peers queried per block for the vote
    fetch_peers: usize,

    /// Global throttle across concurrent block fetches
    slots: Semaphore,
}

impl BlockFetcher {
    pub fn new(
        source: Arc<dyn BlockSource>,
        registry: Arc<RwLock<PeerRegistry>>,
        fetch_peers: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            source,
            registry,
            fetch_peers: fetch_peers.max(1),
            slots: Semaphore::new(concurrency.max(1)),
        }
    }

    /// Fetch one block, verified. `Ok(None)` means no peer could supply an
    /// agreeable block this round.
    pub async fn fetch_verified(
        &self,
        block: BlockNumber,
    ) -> Result<Option<PeerBlock>, NetworkError> {
        let _permit = match self.slots.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                // Throttle closed: the fetcher is shutting down
                debug!(block, "fetch throttle closed; skipping block");
                return Ok(None);
            }
        };

        let healthy = self.registry.read().await.healthy_peers();
        if healthy.is_empty() {
            return Ok(None);
        }

        if healthy.len() >= 3 {
            self.fetch_with_vote(block, &healthy).await
        } else {
            self.fetch_first_success(block, &healthy).await
        }
    }

    /// Query up to `fetch_peers` peers in parallel and require a strict
    /// majority on the block hash.
    async fn fetch_with_vote(
        &self,
        block: BlockNumber,
        healthy: &[Peer],
    ) -> Result<Option<PeerBlock>, NetworkError> {
        let candidates: Vec<&Peer> = healthy.iter().take(self.fetch_peers).collect();

        let fetches = candidates.iter().map(|peer| {
            let source = self.source.clone();
            let url = peer.url.clone();
            let id = peer.id.clone();
            async move { (id, source.fetch_block(&url, block).await) }
        });
        let responses: Vec<(String, Result<PeerBlock, NetworkError>)> = join_all(fetches).await;

        let mut votes: HashMap<String, usize> = HashMap::new();
        let mut successes = 0usize;
        for (_, result) in &responses {
            if let Ok(body) = result {
                successes += 1;
                *votes.entry(body.block_hash.clone()).or_insert(0) += 1;
            }
        }

        let winner = votes
            .iter()
            .find(|(_, count)| **count * 2 > successes)
            .map(|(hash, _)| hash.clone());

        let mut registry = self.registry.write().await;
        let mut chosen = None;
        match winner {
            Some(hash) => {
                for (peer_id, result) in responses {
                    match result {
                        Ok(body) if body.block_hash == hash => {
                            registry.update_reliability(&peer_id, true);
                            if chosen.is_none() {
                                chosen = Some(body);
                            }
                        }
                        // Minority hash or error both count as failed fetch
                        _ => registry.update_reliability(&peer_id, false),
                    }
                }
                debug!(block, hash = %hash, "block accepted by majority vote");
                Ok(chosen)
            }
            None => {
                warn!(block, successes, "no majority hash among peers; rejecting block");
                for (peer_id, _) in responses {
                    registry.update_reliability(&peer_id, false);
                }
                Ok(None)
            }
        }
    }

    /// Thin peer set: take the first block anyone serves, downgrading the
    /// ones that fail.
    async fn fetch_first_success(
        &self,
        block: BlockNumber,
        healthy: &[Peer],
    ) -> Result<Option<PeerBlock>, NetworkError> {
        for peer in healthy.iter().take(self.fetch_peers) {
            match self.source.fetch_block(&peer.url, block).await {
                Ok(body) => {
                    self.registry.write().await.update_reliability(&peer.id, true);
                    info!(block, peer = %peer.id, "block fetched without quorum (few peers)");
                    return Ok(Some(body));
                }
                Err(e) => {
                    debug!(block, peer = %peer.id, error = %e, "peer fetch failed");
                    self.registry.write().await.update_reliability(&peer.id, false);
                }
            }
        }
        Ok(None)
    }
}
