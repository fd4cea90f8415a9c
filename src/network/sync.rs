// Continuous sync - Keep the local store caught up with the network
//
// Every sync interval the controller compares the local head against the
// highest peer-reported head, detects contiguous missing ranges, and feeds
// verified block bodies into the replication queue as BLOCK_IMPORT jobs.
// Only one pass runs at a time; overlapping requests return immediately.

use crate::graph::GraphClient;
use crate::network::client::PeerClient;
use crate::network::fetch::BlockFetcher;
use crate::network::gap::{find_gaps, gap_size};
use crate::network::peer::PeerRegistry;
use crate::queue::ReplicationQueue;
use crate::types::BlockNumber;
use futures::future::join_all;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default sync cadence
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Catch-up bound per pass; deeper holes drain across passes
pub const MAX_BLOCKS_PER_SYNC: u64 = 1000;

/// Sync controller configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub enabled: bool,
    pub interval: Duration,

    /// Peers queried per block for hash agreement
    pub fetch_peers: usize,

    /// Concurrent block fetches
    pub fetch_concurrency: usize,

    /// Seed peers consulted for discovery
    pub seeds: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_SYNC_INTERVAL,
            fetch_peers: crate::network::fetch::DEFAULT_FETCH_PEERS,
            fetch_concurrency: crate::network::fetch::DEFAULT_FETCH_CONCURRENCY,
            seeds: vec![],
        }
    }
}

/// What one sync pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Disabled,
    /// Another pass is running
    InProgress,
    NoPeers,
    /// Already at the network head
    Synced,
    Imported {
        imported: u64,
        failed: u64,
        network_head: BlockNumber,
    },
}

pub struct SyncController {
    client: Arc<PeerClient>,
    registry: Arc<RwLock<PeerRegistry>>,
    fetcher: Arc<BlockFetcher>,
    graph: Arc<dyn GraphClient>,
    queue: Arc<ReplicationQueue>,
    config: SyncConfig,

    in_progress: AtomicBool,
    last_sync_block: AtomicU64,
    running: AtomicBool,
}

impl SyncController {
    pub fn new(
        client: Arc<PeerClient>,
        registry: Arc<RwLock<PeerRegistry>>,
        graph: Arc<dyn GraphClient>,
        queue: Arc<ReplicationQueue>,
        config: SyncConfig,
    ) -> Self {
        let fetcher = Arc::new(BlockFetcher::new(
            client.clone(),
            registry.clone(),
            config.fetch_peers,
            config.fetch_concurrency,
        ));
        Self {
            client,
            registry,
            fetcher,
            graph,
            queue,
            config,
            in_progress: AtomicBool::new(false),
            last_sync_block: AtomicU64::new(0),
            running: AtomicBool::new(false),
        }
    }

    /// Ask each seed for its peer list and register everything found.
    /// Seeds themselves are registered too; they are peers like any other.
    pub async fn discover(&self) {
        for seed in &self.config.seeds {
            {
                let mut registry = self.registry.write().await;
                registry.register(seed.clone(), seed.clone());
            }
            match self.client.fetch_peer_list(seed).await {
                Ok(entries) => {
                    let mut registry = self.registry.write().await;
                    for entry in &entries {
                        registry.register(entry.id.clone(), entry.url.clone());
                    }
                    info!(seed = %seed, peers = entries.len(), "peer discovery complete");
                }
                Err(e) => warn!(seed = %seed, error = %e, "peer discovery failed"),
            }
        }
    }

    /// Probe every known peer in parallel and fold outcomes into the EMA
    pub async fn health_check_all(&self) {
        let peers = self.registry.read().await.all_peers();
        if peers.is_empty() {
            return;
        }

        let probes = peers.iter().map(|peer| {
            let client = self.client.clone();
            let url = peer.url.clone();
            let id = peer.id.clone();
            async move { (id, client.check_health(&url).await) }
        });
        let results = join_all(probes).await;

        let mut registry = self.registry.write().await;
        for (id, healthy) in results {
            registry.update_reliability(&id, healthy);
        }
    }

    /// One sync pass. Single-flight: a pass already underway short-circuits.
    pub async fn sync_once(&self) -> SyncOutcome {
        if !self.config.enabled {
            return SyncOutcome::Disabled;
        }
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("sync already in progress");
            return SyncOutcome::InProgress;
        }

        let outcome = self.sync_pass().await;
        self.in_progress.store(false, Ordering::SeqCst);
        outcome
    }

    async fn sync_pass(&self) -> SyncOutcome {
        let healthy = self.registry.read().await.healthy_peers();
        if healthy.is_empty() {
            return SyncOutcome::NoPeers;
        }

        // Network head = max of peer-reported heads
        let head_queries = healthy.iter().map(|peer| {
            let client = self.client.clone();
            let url = peer.url.clone();
            let id = peer.id.clone();
            async move { (id, client.fetch_head(&url).await) }
        });
        let head_results = join_all(head_queries).await;

        let mut network_head = 0;
        {
            let mut registry = self.registry.write().await;
            for (id, result) in head_results {
                match result {
                    Ok(head) => {
                        registry.update_reliability(&id, true);
                        network_head = network_head.max(head);
                    }
                    Err(e) => {
                        debug!(peer = %id, error = %e, "head query failed");
                        registry.update_reliability(&id, false);
                    }
                }
            }
        }

        let local_head = match self.graph.head_block().await {
            Ok(head) => head,
            Err(e) => {
                warn!(error = %e, "cannot read local head; skipping sync pass");
                return SyncOutcome::NoPeers;
            }
        };

        if network_head <= local_head {
            self.last_sync_block.store(local_head, Ordering::SeqCst);
            return SyncOutcome::Synced;
        }

        // Resume from where the previous pass left off
        let mut from = self.last_sync_block.load(Ordering::SeqCst);
        if from == 0 {
            from = local_head;
        }
        from = from.max(1);
        let to = network_head.min(from + MAX_BLOCKS_PER_SYNC - 1);

        // Presence scan, then contiguous gap ranges
        let mut present = HashSet::new();
        for block in from..=to {
            if self.graph.has_block(block).await.unwrap_or(false) {
                present.insert(block);
            }
        }
        let gaps = find_gaps(from, to, |b| present.contains(&b));
        if gaps.is_empty() {
            self.last_sync_block.store(to, Ordering::SeqCst);
            return SyncOutcome::Synced;
        }

        info!(
            local_head,
            network_head,
            missing = gap_size(&gaps),
            ranges = gaps.len(),
            "gap sync starting"
        );

        let imported = AtomicU64::new(0);
        let failed = AtomicU64::new(0);

        let missing: Vec<BlockNumber> = gaps
            .iter()
            .flat_map(|(start, end)| *start..=*end)
            .collect();

        futures::stream::iter(missing)
            .for_each_concurrent(self.config.fetch_concurrency, |block| {
                let fetcher = self.fetcher.clone();
                let queue = self.queue.clone();
                let imported = &imported;
                let failed = &failed;
                async move {
                    match fetcher.fetch_verified(block).await {
                        Ok(Some(body)) => match queue.add_block_replication(body) {
                            Ok(_) => {
                                imported.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                warn!(block, error = %e, "failed to enqueue block import");
                                failed.fetch_add(1, Ordering::Relaxed);
                            }
                        },
                        Ok(None) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            warn!(block, error = %e, "block fetch failed");
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
            .await;

        let imported = imported.into_inner();
        let failed = failed.into_inner();

        // Only advance past ranges we fully recovered
        if failed == 0 {
            self.last_sync_block.store(to, Ordering::SeqCst);
        }

        info!(imported, failed, network_head, "gap sync pass finished");
        SyncOutcome::Imported {
            imported,
            failed,
            network_head,
        }
    }

    /// Spawn the periodic discovery + health + sync loop
    pub fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("sync controller already running");
            return;
        }
        if !self.config.enabled {
            info!("continuous sync disabled by configuration");
            return;
        }

        let controller = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(controller.config.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            info!(
                interval_secs = controller.config.interval.as_secs(),
                "sync controller started"
            );
            controller.discover().await;

            while controller.running.load(Ordering::SeqCst) {
                interval.tick().await;
                if !controller.running.load(Ordering::SeqCst) {
                    break;
                }
                controller.health_check_all().await;
                let outcome = controller.sync_once().await;
                debug!(?outcome, "sync tick");
            }
            info!("sync controller stopped");
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn last_sync_block(&self) -> BlockNumber {
        self.last_sync_block.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> Arc<RwLock<PeerRegistry>> {
        self.registry.clone()
    }
}
