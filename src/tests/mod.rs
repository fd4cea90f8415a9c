// Integration tests - End-to-end flows across registry, queue, projection,
// peer gossip and the HTTP/WebSocket surface

mod networking;
mod scenarios;

use crate::forks::{EventSender, ForkManager, ForkRegistry, RegistryConfig, RegistryEvent};
use crate::graph::MemoryGraph;
use crate::node::service::handle_event;
use crate::queue::{QueueConfig, QueueStore, ReplicationQueue};
use crate::snapshot::{NullSnapshotEngine, SnapshotOrchestrator};
use crate::types::{ForkId, OpKind, Operation, Payload, ProducerId};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// A wired pipeline without the network: registry events are drained
/// explicitly so scenarios stay deterministic.
pub(crate) struct Harness {
    pub registry: ForkRegistry,
    pub queue: Arc<ReplicationQueue>,
    pub manager: Arc<ForkManager>,
    pub graph: Arc<MemoryGraph>,
    pub engine: Arc<NullSnapshotEngine>,
    rx: broadcast::Receiver<RegistryEvent>,
    _dir: TempDir,
}

impl Harness {
    pub fn new(config: RegistryConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let store = QueueStore::open(dir.path()).unwrap();
        let graph = Arc::new(MemoryGraph::new());
        let engine = Arc::new(NullSnapshotEngine::new());
        let snapshots = Arc::new(SnapshotOrchestrator::new(
            engine.clone(),
            graph.clone(),
            "hive".to_string(),
            10,
        ));
        let manager = Arc::new(ForkManager::new(graph.clone()));
        let queue = Arc::new(ReplicationQueue::new(
            store,
            graph.clone(),
            manager.clone(),
            snapshots,
            QueueConfig {
                apply_workers: 2,
                ..QueueConfig::default()
            },
        ));
        queue.start().unwrap();

        let events = EventSender::new();
        let rx = events.subscribe();
        let registry = ForkRegistry::new(config, events);

        Self {
            registry,
            queue,
            manager,
            graph,
            engine,
            rx,
            _dir: dir,
        }
    }

    /// Feed every buffered registry event through the glue and wait for the
    /// queue to go idle. Returns the drained events for assertions.
    pub async fn drain(&mut self) -> Vec<RegistryEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            handle_event(event.clone(), &self.queue, &self.manager).await;
            drained.push(event);
        }
        assert!(
            self.queue.wait_idle(Duration::from_secs(10)).await,
            "queue failed to drain"
        );
        drained
    }
}

pub(crate) fn put_op(producer: &str, fork: &str, block: u64, index: u64, path: &str) -> Operation {
    Operation {
        kind: OpKind::Put,
        block_num: block,
        index,
        path: path.to_string(),
        data: Some(Payload::json(&serde_json::json!({ "v": index }))),
        fork: ForkId::from(fork),
        producer: ProducerId::from(producer),
        timestamp: index,
        prev_checkpoint_hash: None,
    }
}

pub(crate) fn marker_op(producer: &str, fork: &str, block: u64, index: u64) -> Operation {
    Operation {
        kind: OpKind::WriteMarker,
        block_num: block,
        index,
        path: String::new(),
        data: None,
        fork: ForkId::from(fork),
        producer: ProducerId::from(producer),
        timestamp: index,
        prev_checkpoint_hash: None,
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub(crate) async fn wait_until<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
