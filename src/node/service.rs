// Node service - Wires the registry, queue, projection, sessions, API and
// gossip together and owns the process lifecycle
//
// The event pump is the only bridge between the in-memory registry and the
// durable side: registry events fan out over the broadcast channel and are
// turned into queue jobs and projection writes here, never under the
// registry lock.

use crate::forks::{EventSender, ForkManager, ForkRegistry, RegistryEvent};
use crate::graph::GraphClient;
use crate::network::SyncController;
use crate::queue::{QueueError, ReplicationQueue};
use crate::rpc::{ApiServer, ApiServerHandle, ApiState};
use crate::session::{now_millis, SessionHub};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Periodic cleanup cadence (registry GC, orphan pruning)
pub const GC_INTERVAL: Duration = Duration::from_secs(60);

/// Queue drain deadline on shutdown
pub const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

/// Orphaned fork records older than this many blocks behind the head are
/// pruned from the projection
pub const ORPHAN_PRUNE_HORIZON: u64 = 28_800;

/// Node lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("node already running")]
    AlreadyRunning,
}

/// The assembled sidecar
pub struct Node {
    registry: Arc<RwLock<ForkRegistry>>,
    events: EventSender,
    queue: Arc<ReplicationQueue>,
    manager: Arc<ForkManager>,
    graph: Arc<dyn GraphClient>,
    sync: Arc<SyncController>,
    sessions: Arc<SessionHub>,
    api: Option<ApiServer>,

    running: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    api_handle: Mutex<Option<ApiServerHandle>>,
}

impl Node {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<RwLock<ForkRegistry>>,
        events: EventSender,
        queue: Arc<ReplicationQueue>,
        manager: Arc<ForkManager>,
        graph: Arc<dyn GraphClient>,
        sync: Arc<SyncController>,
        sessions: Arc<SessionHub>,
        api: ApiServer,
    ) -> Self {
        Self {
            registry,
            events,
            queue,
            manager,
            graph,
            sync,
            sessions,
            api: Some(api),
            running: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
            api_handle: Mutex::new(None),
        }
    }

    /// Bring every subsystem up
    pub async fn start(&mut self) -> Result<(), NodeError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyRunning);
        }

        self.queue.start()?;

        // Registry events -> queue jobs + projection writes
        let pump = tokio::spawn(event_pump(
            self.events.subscribe(),
            self.queue.clone(),
            self.manager.clone(),
        ));
        self.tasks.lock().push(pump);

        // Peer HTTP surface + producer WebSocket
        if let Some(api) = self.api.take() {
            let state = ApiState {
                graph: self.graph.clone(),
                peers: self.sync.registry(),
            };
            let handle = api.start_background(state, self.sessions.clone()).await;
            *self.api_handle.lock() = Some(handle);
        }

        self.sync.clone().start();

        // Periodic cleanup
        let gc = tokio::spawn(gc_loop(
            self.running.clone(),
            self.registry.clone(),
            self.manager.clone(),
            self.graph.clone(),
        ));
        self.tasks.lock().push(gc);

        info!("honeygraph node started");
        Ok(())
    }

    /// Block until ctrl-c or a fatal subsystem error, then shut down
    pub async fn run_until_shutdown(&self) {
        let fatal = self.queue.fatal_signal();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
            }
            _ = fatal.fatal_raised() => {
                error!("fatal subsystem error; shutting down");
            }
        }
        self.stop().await;
    }

    /// Ordered shutdown: sessions and gossip stop feeding the queue, the
    /// queue drains with a bounded deadline, then everything exits.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("stopping honeygraph node");

        self.sync.stop();

        // Dropping the API handle closes the listener and the producer
        // sockets with it
        self.api_handle.lock().take();

        self.queue.shutdown(DRAIN_DEADLINE).await;

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
        info!("honeygraph node stopped");
    }

    pub fn registry(&self) -> Arc<RwLock<ForkRegistry>> {
        self.registry.clone()
    }
}

/// Turn registry events into durable work
pub(crate) async fn event_pump(
    mut rx: tokio::sync::broadcast::Receiver<RegistryEvent>,
    queue: Arc<ReplicationQueue>,
    manager: Arc<ForkManager>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => handle_event(event, &queue, &manager).await,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event pump lagged; registry events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("event pump stopped");
}

pub(crate) async fn handle_event(
    event: RegistryEvent,
    queue: &ReplicationQueue,
    manager: &ForkManager,
) {
    match event {
        RegistryEvent::OperationAppended { op } => {
            if let Err(e) = queue.add_operation(op) {
                error!(error = %e, "failed to enqueue operation");
            }
        }

        RegistryEvent::ForkNew {
            fork,
            block_num,
            implicit,
        } => {
            debug!(fork = %fork, block = block_num, implicit, "fork observed");
            if let Err(e) = manager.create_fork(None, block_num, fork).await {
                error!(error = %e, "failed to project new fork");
            }
        }

        RegistryEvent::ForkConfirmed { fork, checkpoint } => {
            info!(fork = %fork, block = checkpoint.block_num, "fork confirmed");
            if let Err(e) = queue.process_checkpoint(checkpoint) {
                error!(error = %e, "failed to enqueue checkpoint confirmation");
            }
        }

        RegistryEvent::ForkInvalid {
            fork,
            block_num,
            reason,
        } => {
            debug!(fork = %fork, block = block_num, ?reason, "fork dropped from registry");
        }

        RegistryEvent::ForkSwitch { producer, from, to } => {
            debug!(producer = %producer, from = ?from, to = %to, "producer switched fork");
        }

        RegistryEvent::CheckpointReceived { checkpoint } => {
            debug!(block = checkpoint.block_num, hash = %checkpoint.hash, "checkpoint received");
        }

        RegistryEvent::CheckpointInvalid {
            fork,
            checkpoint,
            reason,
        } => {
            warn!(
                fork = %fork,
                block = checkpoint.block_num,
                %reason,
                "checkpoint rejected at boundary validation"
            );
        }
    }
}

/// Registry retention GC and projection pruning on a timer
async fn gc_loop(
    running: Arc<AtomicBool>,
    registry: Arc<RwLock<ForkRegistry>>,
    manager: Arc<ForkManager>,
    graph: Arc<dyn GraphClient>,
) {
    let mut interval = tokio::time::interval(GC_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;

    while running.load(Ordering::SeqCst) {
        interval.tick().await;

        registry.write().await.gc_old(now_millis());

        match graph.head_block().await {
            Ok(head) if head > ORPHAN_PRUNE_HORIZON => {
                if let Err(e) = manager.prune_before(head - ORPHAN_PRUNE_HORIZON).await {
                    warn!(error = %e, "orphan pruning failed");
                }
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "skipping prune; graph head unavailable"),
        }
    }
    debug!("gc loop stopped");
}
