// Runner - Build every component from configuration and run the node
use crate::cli::config::NodeConfig;
use crate::forks::{EventSender, ForkManager, ForkRegistry};
use crate::graph::{GraphClient, HttpGraphClient};
use crate::network::{PeerClient, PeerRegistry, SyncController};
use crate::node::Node;
use crate::queue::{QueueStore, ReplicationQueue};
use crate::rpc::ApiServer;
use crate::session::{AuthVerifier, SessionConfig, SessionHub, StaticIdentityRegistry};
use crate::snapshot::{NullSnapshotEngine, SnapshotOrchestrator};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Assemble and run the sidecar until shutdown
pub async fn run_node(config: NodeConfig) -> anyhow::Result<()> {
    info!(name = %config.name, path = %config.base_path.display(), "starting honeygraph node");
    std::fs::create_dir_all(&config.base_path)?;

    // Durable queue state
    let store = QueueStore::open(config.base_path.join("queue"))?;

    // External collaborators
    let graph: Arc<dyn GraphClient> = Arc::new(HttpGraphClient::new(&config.graph_url)?);
    let snapshot_engine = Arc::new(NullSnapshotEngine::new());
    let snapshots = Arc::new(SnapshotOrchestrator::new(
        snapshot_engine,
        graph.clone(),
        config.snapshots.dataset.clone(),
        config.snapshots.max_snapshots,
    ));
    let identity = Arc::new(StaticIdentityRegistry::new());

    // Core pipeline
    let manager = Arc::new(ForkManager::new(graph.clone()));
    let queue = Arc::new(ReplicationQueue::new(
        store,
        graph.clone(),
        manager.clone(),
        snapshots,
        config.queue.clone(),
    ));
    let events = EventSender::new();
    let registry = Arc::new(RwLock::new(ForkRegistry::new(
        config.registry.clone(),
        events.clone(),
    )));

    // Producer sessions
    let verifier = Arc::new(AuthVerifier::new(
        identity,
        config.auth.authorized_accounts.clone(),
    ));
    let sessions = Arc::new(SessionHub::new(
        SessionConfig {
            node_id: config.name.clone(),
            require_auth: config.auth.required,
        },
        verifier,
        registry.clone(),
    ));

    // Peer gossip
    let peer_client = Arc::new(PeerClient::new(config.name.clone())?);
    let peer_registry = Arc::new(RwLock::new(PeerRegistry::new()));
    let sync = Arc::new(SyncController::new(
        peer_client,
        peer_registry,
        graph.clone(),
        queue.clone(),
        config.sync.clone(),
    ));

    let api = ApiServer::new(config.api.clone());

    let mut node = Node::new(
        registry, events, queue, manager, graph, sync, sessions, api,
    );
    node.start().await?;
    node.run_until_shutdown().await;

    Ok(())
}
