// In-memory graph backend - Test double and single-process backend
//
// Faithful to the trait contract: applied-triple idempotency, fork-scoped
// reverts, transactional block import. State is coarse (path -> payload per
// fork); schema concerns stay out of scope.

use crate::graph::{ApplyOutcome, ForkRecord, GraphClient, GraphError};
use crate::types::{BlockNumber, ForkId, ForkStatus, OpKind, Operation, Payload, PeerBlock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct Inner {
    /// path -> (writing fork, payload)
    state: HashMap<String, (ForkId, Option<Payload>)>,

    /// applied (fork, block, index) triples
    applied: HashSet<(ForkId, BlockNumber, u64)>,

    /// full operation log per fork, for revert scoping
    ops: HashMap<ForkId, Vec<Operation>>,

    forks: HashMap<ForkId, ForkRecord>,

    blocks: BTreeMap<BlockNumber, PeerBlock>,
}

/// Shared in-memory graph store
#[derive(Default)]
pub struct MemoryGraph {
    inner: RwLock<Inner>,
    healthy: AtomicBool,
    fail_imports: AtomicBool,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            healthy: AtomicBool::new(true),
            fail_imports: AtomicBool::new(false),
        }
    }

    /// Flip health for endpoint tests
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Make the next imports fail, to exercise retry paths
    pub fn set_fail_imports(&self, fail: bool) {
        self.fail_imports.store(fail, Ordering::SeqCst);
    }

    /// Payload currently stored at `path`, if any
    pub fn value_at(&self, path: &str) -> Option<Payload> {
        self.inner
            .read()
            .state
            .get(path)
            .and_then(|(_, p)| p.clone())
    }

    /// Number of applied operation triples
    pub fn applied_count(&self) -> usize {
        self.inner.read().applied.len()
    }

    /// Applied triples for one fork
    pub fn applied_for(&self, fork: &ForkId) -> usize {
        self.inner
            .read()
            .applied
            .iter()
            .filter(|(f, _, _)| f == fork)
            .count()
    }

    fn guard(&self) -> Result<(), GraphError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GraphError::Unreachable("memory graph marked down".to_string()))
        }
    }
}

#[async_trait]
impl GraphClient for MemoryGraph {
    async fn apply_operation(&self, op: &Operation) -> Result<ApplyOutcome, GraphError> {
        self.guard()?;
        let mut inner = self.inner.write();
        let key = (op.fork.clone(), op.block_num, op.index);
        if inner.applied.contains(&key) {
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        match op.kind {
            OpKind::Put => {
                inner
                    .state
                    .insert(op.path.clone(), (op.fork.clone(), op.data.clone()));
            }
            OpKind::Del => {
                inner.state.remove(&op.path);
            }
            OpKind::WriteMarker => {}
        }

        inner.applied.insert(key);
        inner.ops.entry(op.fork.clone()).or_default().push(op.clone());
        Ok(ApplyOutcome::Applied)
    }

    async fn upsert_fork(&self, record: &ForkRecord) -> Result<bool, GraphError> {
        self.guard()?;
        let mut inner = self.inner.write();
        if inner.forks.contains_key(&record.fork_id) {
            return Ok(false);
        }
        inner.forks.insert(record.fork_id.clone(), record.clone());
        Ok(true)
    }

    async fn fork_record(&self, id: &ForkId) -> Result<Option<ForkRecord>, GraphError> {
        self.guard()?;
        Ok(self.inner.read().forks.get(id).cloned())
    }

    async fn forks_at_block(&self, block: BlockNumber) -> Result<Vec<ForkRecord>, GraphError> {
        self.guard()?;
        Ok(self
            .inner
            .read()
            .forks
            .values()
            .filter(|r| r.created_at_block == block)
            .cloned()
            .collect())
    }

    async fn orphaned_forks_before(
        &self,
        block: BlockNumber,
    ) -> Result<Vec<ForkRecord>, GraphError> {
        self.guard()?;
        Ok(self
            .inner
            .read()
            .forks
            .values()
            .filter(|r| r.status == ForkStatus::Orphaned && r.last_block < block)
            .cloned()
            .collect())
    }

    async fn set_fork_status(
        &self,
        id: &ForkId,
        status: ForkStatus,
        last_block: Option<BlockNumber>,
        orphaned_at: Option<DateTime<Utc>>,
    ) -> Result<(), GraphError> {
        self.guard()?;
        let mut inner = self.inner.write();
        if let Some(record) = inner.forks.get_mut(id) {
            record.status = status;
            if let Some(last) = last_block {
                record.last_block = last;
            }
            if orphaned_at.is_some() {
                record.orphaned_at = orphaned_at;
            }
        }
        Ok(())
    }

    async fn revert_fork_from(
        &self,
        fork: &ForkId,
        from_block: BlockNumber,
    ) -> Result<u64, GraphError> {
        self.guard()?;
        let mut inner = self.inner.write();

        let reverted: Vec<Operation> = match inner.ops.get_mut(fork) {
            Some(ops) => {
                let (keep, drop): (Vec<_>, Vec<_>) =
                    ops.drain(..).partition(|o| o.block_num < from_block);
                *ops = keep;
                drop
            }
            None => return Ok(0),
        };

        for op in &reverted {
            inner
                .applied
                .remove(&(op.fork.clone(), op.block_num, op.index));
            // Only drop state this fork still owns
            if inner
                .state
                .get(&op.path)
                .map(|(owner, _)| owner == fork)
                .unwrap_or(false)
            {
                inner.state.remove(&op.path);
            }
        }

        Ok(reverted.len() as u64)
    }

    async fn delete_fork(&self, id: &ForkId) -> Result<(), GraphError> {
        self.guard()?;
        let mut inner = self.inner.write();
        inner.forks.remove(id);
        inner.ops.remove(id);
        Ok(())
    }

    async fn head_block(&self) -> Result<BlockNumber, GraphError> {
        self.guard()?;
        Ok(self
            .inner
            .read()
            .blocks
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0))
    }

    async fn has_block(&self, block: BlockNumber) -> Result<bool, GraphError> {
        self.guard()?;
        Ok(self.inner.read().blocks.contains_key(&block))
    }

    async fn block_full(
        &self,
        block: BlockNumber,
        _fork: Option<&ForkId>,
    ) -> Result<Option<PeerBlock>, GraphError> {
        self.guard()?;
        Ok(self.inner.read().blocks.get(&block).cloned())
    }

    async fn import_block(&self, block: &PeerBlock) -> Result<(), GraphError> {
        self.guard()?;
        if self.fail_imports.load(Ordering::SeqCst) {
            return Err(GraphError::Unreachable("import failure injected".to_string()));
        }
        let mut inner = self.inner.write();

        // All-or-nothing: stage, then commit
        let mut staged = Vec::with_capacity(block.operations.len());
        for op in &block.operations {
            let key = (op.fork.clone(), op.block_num, op.index);
            if !inner.applied.contains(&key) {
                staged.push(op.clone());
            }
        }
        for op in staged {
            match op.kind {
                OpKind::Put => {
                    inner
                        .state
                        .insert(op.path.clone(), (op.fork.clone(), op.data.clone()));
                }
                OpKind::Del => {
                    inner.state.remove(&op.path);
                }
                OpKind::WriteMarker => {}
            }
            inner
                .applied
                .insert((op.fork.clone(), op.block_num, op.index));
            inner.ops.entry(op.fork.clone()).or_default().push(op);
        }

        inner.blocks.insert(block.block_num, block.clone());
        Ok(())
    }

    async fn health(&self) -> Result<(), GraphError> {
        self.guard()
    }
}
