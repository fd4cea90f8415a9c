// Replication queue - Durable, prioritized, at-least-once application
//
// Jobs are persisted before execution, deduplicated by idempotency key, and
// dispatched to fork-sharded worker lanes: every job of one fork lands in
// the same lane, so APPLY_OP runs in (block, index) order and a
// CHECKPOINT_CONFIRM runs after the operations it finalizes. Across forks no
// ordering is promised. Block imports share the lanes but are throttled by a
// separate semaphore.

pub mod job;
pub mod store;

pub use job::{backoff_delay, Job, JobKind, Priority, DEFAULT_MAX_ATTEMPTS, HANDLER_TIMEOUT};
pub use store::{QueueStore, QueueStoreError};

use crate::forks::ForkManager;
use crate::graph::{GraphClient, GraphError};
use crate::snapshot::{SnapshotError, SnapshotOrchestrator};
use crate::types::{Checkpoint, ForkStatus, Operation, PeerBlock};
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Queue tuning knobs
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Attempts before a job is terminally FAILED
    pub max_attempts: u32,

    /// Fork-sharded worker lanes for operation application
    pub apply_workers: usize,

    /// Concurrent gap-sync block imports
    pub import_concurrency: usize,

    /// Per-handler execution ceiling
    pub handler_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            apply_workers: 8,
            import_concurrency: 3,
            handler_timeout: HANDLER_TIMEOUT,
        }
    }
}

/// Queue errors
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] QueueStoreError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("handler timed out")]
    HandlerTimeout,

    #[error("queue worker interrupted: {0}")]
    Interrupted(String),
}

impl QueueError {
    fn is_transient(&self) -> bool {
        match self {
            QueueError::Graph(e) => e.is_transient(),
            QueueError::Snapshot(SnapshotError::Engine(_)) => true,
            QueueError::Snapshot(_) => false,
            QueueError::HandlerTimeout => true,
            QueueError::Interrupted(_) => true,
            QueueError::Store(_) => false,
        }
    }

    /// Fatal errors halt the subsystem and signal process shutdown
    fn is_fatal(&self) -> bool {
        matches!(
            self,
            QueueError::Graph(GraphError::SchemaIncompatible(_))
                | QueueError::Snapshot(SnapshotError::Corruption(_))
                | QueueError::Snapshot(SnapshotError::ServiceUnhealthy)
        )
    }
}

/// State shared between the facade and its workers; exposed only for the
/// fatal-error notification.
pub struct QueueShared {
    store: QueueStore,
    graph: Arc<dyn GraphClient>,
    manager: Arc<ForkManager>,
    snapshots: Arc<SnapshotOrchestrator>,
    config: QueueConfig,
    import_slots: Semaphore,
    inflight: AtomicUsize,
    /// Raised on fatal errors; the node supervisor listens
    fatal: Notify,
}

/// The replication queue facade shared across the node
pub struct ReplicationQueue {
    shared: Arc<QueueShared>,
    lanes: Mutex<Option<Vec<mpsc::UnboundedSender<Job>>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next_lane: AtomicUsize,
}

impl ReplicationQueue {
    pub fn new(
        store: QueueStore,
        graph: Arc<dyn GraphClient>,
        manager: Arc<ForkManager>,
        snapshots: Arc<SnapshotOrchestrator>,
        config: QueueConfig,
    ) -> Self {
        let import_slots = Semaphore::new(config.import_concurrency);
        Self {
            shared: Arc::new(QueueShared {
                store,
                graph,
                manager,
                snapshots,
                config,
                import_slots,
                inflight: AtomicUsize::new(0),
                fatal: Notify::new(),
            }),
            lanes: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
            next_lane: AtomicUsize::new(0),
        }
    }

    /// Spawn worker lanes and re-dispatch any work that survived a crash
    pub fn start(&self) -> Result<(), QueueError> {
        let worker_count = self.shared.config.apply_workers.max(1);
        let mut senders = Vec::with_capacity(worker_count);
        let mut handles = self.handles.lock();

        for lane in 0..worker_count {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            handles.push(tokio::spawn(worker_loop(lane, self.shared.clone(), rx)));
        }
        *self.lanes.lock() = Some(senders);
        drop(handles);

        let recovered = self.shared.store.pending_jobs()?;
        if !recovered.is_empty() {
            info!(jobs = recovered.len(), "re-dispatching persisted queue state");
            for job in recovered {
                self.dispatch(job);
            }
        }
        Ok(())
    }

    /// Enqueue an operation for application. Write markers are boundary
    /// signals, not data; they are swallowed here.
    pub fn add_operation(&self, op: Operation) -> Result<Option<u64>, QueueError> {
        if op.is_write_marker() {
            debug!(fork = %op.fork, block = op.block_num, "write marker swallowed by queue");
            return Ok(None);
        }
        self.enqueue(JobKind::ApplyOp(op))
    }

    /// Enqueue a checkpoint confirmation at high priority
    pub fn process_checkpoint(&self, checkpoint: Checkpoint) -> Result<Option<u64>, QueueError> {
        self.enqueue(JobKind::CheckpointConfirm(checkpoint))
    }

    /// Gap-sync path: one atomic block import
    pub fn add_block_replication(&self, block: PeerBlock) -> Result<Option<u64>, QueueError> {
        self.enqueue(JobKind::BlockImport(block))
    }

    /// Persist and dispatch; duplicates collapse to `None`
    pub fn enqueue(&self, kind: JobKind) -> Result<Option<u64>, QueueError> {
        match self.shared.store.enqueue(kind)? {
            Some(job) => {
                let seq = job.seq;
                self.dispatch(job);
                Ok(Some(seq))
            }
            None => Ok(None),
        }
    }

    fn dispatch(&self, job: Job) {
        let lanes = self.lanes.lock();
        let Some(senders) = lanes.as_ref() else {
            warn!(job = %job.kind.describe(), "queue not started; job stays persisted");
            return;
        };

        let lane = match job.kind.fork_lane() {
            Some(fork) => {
                let mut hasher = DefaultHasher::new();
                fork.as_str().hash(&mut hasher);
                (hasher.finish() as usize) % senders.len()
            }
            None => self.next_lane.fetch_add(1, Ordering::Relaxed) % senders.len(),
        };

        if senders[lane].send(job).is_err() {
            warn!("queue lane closed; job stays persisted for next start");
        }
    }

    pub fn pending_count(&self) -> Result<usize, QueueError> {
        Ok(self.shared.store.pending_count()?)
    }

    /// Completion signal for fatal errors (schema break, snapshot
    /// corruption); the node supervisor initiates shutdown on it.
    pub fn fatal_signal(&self) -> Arc<QueueShared> {
        self.shared.clone()
    }

    /// Wait until no jobs are pending or running, up to `timeout`.
    /// Returns whether the queue drained.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let pending = self.shared.store.pending_count().unwrap_or(usize::MAX);
            let inflight = self.shared.inflight.load(Ordering::SeqCst);
            if pending == 0 && inflight == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(pending, inflight, "queue drain deadline reached");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Stop accepting work, drain with a bounded deadline, stop workers
    pub async fn shutdown(&self, drain_deadline: Duration) {
        let drained = self.wait_idle(drain_deadline).await;
        if !drained {
            warn!("shutting down queue with undrained jobs; they stay persisted");
        }

        // Closing the lanes ends the worker loops
        self.lanes.lock().take();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
        info!("replication queue stopped");
    }
}

impl QueueShared {
    /// Awaitable fatal-error notification
    pub async fn fatal_raised(&self) {
        self.fatal.notified().await
    }
}

async fn worker_loop(
    lane: usize,
    shared: Arc<QueueShared>,
    mut rx: mpsc::UnboundedReceiver<Job>,
) {
    debug!(lane, "queue worker started");
    while let Some(job) = rx.recv().await {
        shared.inflight.fetch_add(1, Ordering::SeqCst);
        run_job(&shared, job).await;
        shared.inflight.fetch_sub(1, Ordering::SeqCst);
    }
    debug!(lane, "queue worker stopped");
}

/// Execute one job to a terminal state, retrying transient failures with
/// exponential backoff. Retries happen inline so the lane's FIFO holds.
async fn run_job(shared: &QueueShared, mut job: Job) {
    loop {
        job.attempts += 1;
        let result = tokio::time::timeout(shared.config.handler_timeout, execute(shared, &job))
            .await
            .unwrap_or(Err(QueueError::HandlerTimeout));

        match result {
            Ok(()) => {
                if let Err(e) = shared.store.mark_succeeded(&job) {
                    error!(job = %job.kind.describe(), error = %e, "failed to persist job success");
                }
                return;
            }
            Err(e) if e.is_fatal() => {
                error!(job = %job.kind.describe(), error = %e, "fatal queue error; signaling shutdown");
                let _ = shared.store.mark_failed(&job);
                shared.fatal.notify_waiters();
                return;
            }
            Err(e) if e.is_transient() && job.attempts < shared.config.max_attempts => {
                let delay = backoff_delay(job.attempts);
                warn!(
                    job = %job.kind.describe(),
                    attempt = job.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "job failed; backing off"
                );
                if let Err(e) = shared.store.record_attempt(&job) {
                    error!(error = %e, "failed to persist attempt count");
                }
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(
                    job = %job.kind.describe(),
                    attempts = job.attempts,
                    error = %e,
                    "job terminally failed"
                );
                if let Err(e) = shared.store.mark_failed(&job) {
                    error!(error = %e, "failed to persist job failure");
                }
                return;
            }
        }
    }
}

async fn execute(shared: &QueueShared, job: &Job) -> Result<(), QueueError> {
    match &job.kind {
        JobKind::ApplyOp(op) => {
            // AlreadyApplied is success: at-least-once with idempotent keys
            shared.graph.apply_operation(op).await?;
            Ok(())
        }

        JobKind::CheckpointConfirm(cp) => {
            // Forks carrying block B's operations were settled by the
            // checkpoint at B + 1
            let fork_block = cp.block_num.saturating_sub(1);
            let outcome = shared
                .manager
                .reconcile(fork_block, cp.hash.as_str(), 1)
                .await?;
            shared
                .manager
                .update_status(&outcome.canonical, ForkStatus::Canonical, Some(cp.block_num))
                .await?;

            shared
                .snapshots
                .create_checkpoint(cp.block_num, cp.hash.as_str())
                .await?;
            Ok(())
        }

        JobKind::BlockImport(block) => {
            // Import is transactional at the store; a failure leaves no
            // partial write to clean up here
            let _permit = shared
                .import_slots
                .acquire()
                .await
                .map_err(|e| QueueError::Interrupted(e.to_string()))?;
            shared.graph.import_block(block).await?;
            Ok(())
        }
    }
}
