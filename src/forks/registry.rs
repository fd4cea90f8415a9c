// Fork registry - In-memory universe of live forks and their operations
//
// Single-writer discipline: the registry is owned behind one lock and never
// performs I/O while mutating; observable effects leave through the typed
// event channel.

use crate::forks::boundary::validate_boundary;
use crate::forks::events::{EventSender, PruneReason, RegistryEvent};
use crate::types::{
    BlockNumber, Checkpoint, Fork, ForkId, Operation, ProducerId, Timestamp,
    DEFAULT_FORK_CAP, DEFAULT_FORK_RETENTION_SECS, DEFAULT_OP_BUFFER_SIZE,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// What to do with a fork auto-created by a stray operation (no fork_start)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrayForkPolicy {
    /// Accept it like any declared fork
    #[default]
    Trust,
    /// Track it but refuse checkpoint confirmation until a fork_start
    /// claims it
    Quarantine,
}

/// Registry tuning knobs, injected at construction
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Per-fork operation buffer bound (FIFO head eviction)
    pub op_buffer_size: usize,

    /// Max live forks per block (keep the ones with the most owners)
    pub fork_cap: usize,

    /// Drop forks untouched for this long (seconds)
    pub retention_secs: u64,

    pub stray_fork_policy: StrayForkPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            op_buffer_size: DEFAULT_OP_BUFFER_SIZE,
            fork_cap: DEFAULT_FORK_CAP,
            retention_secs: DEFAULT_FORK_RETENTION_SECS,
            stray_fork_policy: StrayForkPolicy::Trust,
        }
    }
}

/// Live fork tracker. One instance per node, guarded by the owner.
pub struct ForkRegistry {
    config: RegistryConfig,

    /// All live forks by identity
    forks: HashMap<ForkId, Fork>,

    /// Each producer's active fork; invariant: at most one entry per
    /// producer, always pointing at a live fork
    active: HashMap<ProducerId, ForkId>,

    /// Last confirmed checkpoint observed
    last_confirmed: Option<Checkpoint>,

    events: EventSender,
}

impl ForkRegistry {
    pub fn new(config: RegistryConfig, events: EventSender) -> Self {
        Self {
            config,
            forks: HashMap::new(),
            active: HashMap::new(),
            last_confirmed: None,
            events,
        }
    }

    // -------------------------------------------------------------------
    // Producer message handlers
    // -------------------------------------------------------------------

    /// A producer declared it is building on `fork_id` from `block_num`
    pub fn on_fork_start(
        &mut self,
        producer: &ProducerId,
        fork_id: ForkId,
        block_num: BlockNumber,
        ts: Timestamp,
    ) {
        if !self.forks.contains_key(&fork_id) {
            self.forks
                .insert(fork_id.clone(), Fork::new(fork_id.clone(), block_num, ts));
            self.events.emit(RegistryEvent::ForkNew {
                fork: fork_id.clone(),
                block_num,
                implicit: false,
            });
        }

        self.switch_producer(producer, &fork_id, ts);
        self.enforce_block_cap(block_num);
    }

    /// An operation arrived from a producer. The operation's fork tag is
    /// authoritative: a mismatch with the producer's active fork is an
    /// implicit switch, and an unknown fork is auto-created under the
    /// stray-fork policy.
    pub fn on_operation(&mut self, producer: &ProducerId, op: Operation) {
        let fork_id = op.fork.clone();

        if !self.forks.contains_key(&fork_id) {
            info!(fork = %fork_id, block = op.block_num, "implicit fork creation from stray operation");
            let mut fork = Fork::new(fork_id.clone(), op.block_num, op.timestamp);
            fork.quarantined = self.config.stray_fork_policy == StrayForkPolicy::Quarantine;
            self.forks.insert(fork_id.clone(), fork);
            self.events.emit(RegistryEvent::ForkNew {
                fork: fork_id.clone(),
                block_num: op.block_num,
                implicit: true,
            });
        }

        if self.active.get(producer) != Some(&fork_id) {
            self.switch_producer(producer, &fork_id, op.timestamp);
        }

        if op.is_write_marker() {
            if let (Some(prev), Some(confirmed)) =
                (op.prev_checkpoint_hash.as_deref(), self.last_confirmed.as_ref())
            {
                if prev != confirmed.hash.as_str() {
                    warn!(
                        fork = %fork_id,
                        marker_prev = prev,
                        confirmed = %confirmed.hash,
                        "write marker prevCheckpointHash does not match last confirmed checkpoint"
                    );
                }
            }
        }

        let capacity = self.config.op_buffer_size;
        if let Some(fork) = self.forks.get_mut(&fork_id) {
            fork.push_operation(op.clone(), capacity);
        }
        self.events.emit(RegistryEvent::OperationAppended { op });
    }

    /// A consensus checkpoint arrived: confirm the matching fork, prune its
    /// siblings, or report the boundary violation.
    pub fn on_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.events.emit(RegistryEvent::CheckpointReceived {
            checkpoint: checkpoint.clone(),
        });

        let fork_block = checkpoint.block_num.saturating_sub(1);

        match self.forks.get(&checkpoint.hash) {
            None => {
                // Nothing local matches the confirmed hash: finalize on a
                // fresh fork and move on
                info!(hash = %checkpoint.hash, block = checkpoint.block_num,
                      "checkpoint hash unknown; finalizing on a new fork");
                let mut fork = Fork::new(checkpoint.hash.clone(), fork_block, checkpoint.timestamp);
                fork.confirmed = true;
                self.forks.insert(checkpoint.hash.clone(), fork);
                self.events.emit(RegistryEvent::ForkNew {
                    fork: checkpoint.hash.clone(),
                    block_num: fork_block,
                    implicit: true,
                });
                self.confirm(checkpoint, fork_block);
            }
            Some(fork) if fork.quarantined => {
                warn!(fork = %checkpoint.hash, "checkpoint names a quarantined fork; refusing confirmation");
                self.events.emit(RegistryEvent::CheckpointInvalid {
                    fork: checkpoint.hash.clone(),
                    checkpoint,
                    reason: crate::forks::boundary::BoundaryViolation::MissingWriteMarker,
                });
            }
            Some(fork) => match validate_boundary(fork, checkpoint.block_num) {
                Ok(()) => {
                    if let Some(f) = self.forks.get_mut(&checkpoint.hash) {
                        f.confirmed = true;
                    }
                    self.confirm(checkpoint, fork_block);
                }
                Err(reason) => {
                    warn!(fork = %checkpoint.hash, %reason, "checkpoint boundary validation failed");
                    self.events.emit(RegistryEvent::CheckpointInvalid {
                        fork: checkpoint.hash.clone(),
                        checkpoint,
                        reason,
                    });
                }
            },
        }
    }

    /// Producer socket closed: detach it everywhere
    pub fn on_disconnect(&mut self, producer: &ProducerId) {
        self.active.remove(producer);
        for fork in self.forks.values_mut() {
            fork.remove_producer(producer);
        }
    }

    // -------------------------------------------------------------------
    // Bounds enforcement
    // -------------------------------------------------------------------

    /// Keep at most `fork_cap` live forks at `block_num`, preferring the
    /// ones with the most owners.
    pub fn enforce_block_cap(&mut self, block_num: BlockNumber) {
        let cap = self.config.fork_cap;
        let mut at_block: Vec<(ForkId, usize)> = self
            .forks
            .values()
            .filter(|f| f.block_num == block_num && !f.confirmed)
            .map(|f| (f.id.clone(), f.owner_count()))
            .collect();

        if at_block.len() <= cap {
            return;
        }

        // Most owners first; ties broken by identity for determinism
        at_block.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));

        for (fork_id, owners) in at_block.split_off(cap) {
            debug!(fork = %fork_id, owners, block = block_num, "evicting fork over per-block cap");
            self.drop_fork(&fork_id, block_num, PruneReason::CapExceeded);
        }
    }

    /// Discard forks whose last update is older than the retention window.
    /// `now` is epoch millis.
    pub fn gc_old(&mut self, now: Timestamp) {
        let horizon = now.saturating_sub(self.config.retention_secs * 1000);
        let expired: Vec<(ForkId, BlockNumber)> = self
            .forks
            .values()
            .filter(|f| f.last_updated < horizon)
            .map(|f| (f.id.clone(), f.block_num))
            .collect();

        for (fork_id, block_num) in expired {
            debug!(fork = %fork_id, "dropping fork past retention window");
            self.drop_fork(&fork_id, block_num, PruneReason::Expired);
        }
    }

    // -------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------

    pub fn fork(&self, id: &ForkId) -> Option<&Fork> {
        self.forks.get(id)
    }

    pub fn forks_at(&self, block_num: BlockNumber) -> Vec<&Fork> {
        self.forks
            .values()
            .filter(|f| f.block_num == block_num)
            .collect()
    }

    pub fn active_fork(&self, producer: &ProducerId) -> Option<&ForkId> {
        self.active.get(producer)
    }

    pub fn fork_count(&self) -> usize {
        self.forks.len()
    }

    pub fn last_confirmed(&self) -> Option<&Checkpoint> {
        self.last_confirmed.as_ref()
    }

    // -------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------

    fn switch_producer(&mut self, producer: &ProducerId, to: &ForkId, ts: Timestamp) {
        let from = self.active.insert(producer.clone(), to.clone());

        if let Some(ref old) = from {
            if old != to {
                if let Some(old_fork) = self.forks.get_mut(old) {
                    old_fork.remove_producer(producer);
                }
            }
        }

        if let Some(fork) = self.forks.get_mut(to) {
            fork.add_producer(producer.clone(), ts);
        }

        if from.as_ref() != Some(to) {
            self.events.emit(RegistryEvent::ForkSwitch {
                producer: producer.clone(),
                from,
                to: to.clone(),
            });
        }
    }

    fn confirm(&mut self, checkpoint: Checkpoint, fork_block: BlockNumber) {
        // Siblings at the confirmed fork's block lose
        let losers: Vec<ForkId> = self
            .forks
            .values()
            .filter(|f| f.block_num == fork_block && f.id != checkpoint.hash)
            .map(|f| f.id.clone())
            .collect();

        for fork_id in losers {
            self.drop_fork(&fork_id, fork_block, PruneReason::LostToSibling);
        }

        self.events.emit(RegistryEvent::ForkConfirmed {
            fork: checkpoint.hash.clone(),
            checkpoint: checkpoint.clone(),
        });
        self.last_confirmed = Some(checkpoint);
    }

    fn drop_fork(&mut self, fork_id: &ForkId, block_num: BlockNumber, reason: PruneReason) {
        if let Some(fork) = self.forks.remove(fork_id) {
            for producer in &fork.producers {
                if self.active.get(producer) == Some(fork_id) {
                    self.active.remove(producer);
                }
            }
            self.events.emit(RegistryEvent::ForkInvalid {
                fork: fork_id.clone(),
                block_num,
                reason,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OpKind, Operation};

    fn registry() -> ForkRegistry {
        ForkRegistry::new(RegistryConfig::default(), EventSender::new())
    }

    fn registry_with(config: RegistryConfig) -> ForkRegistry {
        ForkRegistry::new(config, EventSender::new())
    }

    fn put(fork: &str, block: u64, index: u64) -> Operation {
        Operation {
            kind: OpKind::Put,
            block_num: block,
            index,
            path: format!("/k/{}", index),
            data: None,
            fork: ForkId::from(fork),
            producer: ProducerId::from("p1"),
            timestamp: index,
            prev_checkpoint_hash: None,
        }
    }

    fn marker(fork: &str, block: u64, index: u64) -> Operation {
        Operation {
            kind: OpKind::WriteMarker,
            block_num: block,
            index,
            path: String::new(),
            data: None,
            fork: ForkId::from(fork),
            producer: ProducerId::from("p1"),
            timestamp: index,
            prev_checkpoint_hash: None,
        }
    }

    #[test]
    fn test_fork_start_creates_and_attaches() {
        let mut reg = registry();
        let p = ProducerId::from("p1");
        reg.on_fork_start(&p, ForkId::from("f1"), 100, 1);

        assert_eq!(reg.fork_count(), 1);
        assert_eq!(reg.active_fork(&p), Some(&ForkId::from("f1")));
        assert_eq!(reg.fork(&ForkId::from("f1")).unwrap().owner_count(), 1);
    }

    #[test]
    fn test_producer_owns_at_most_one_fork() {
        let mut reg = registry();
        let p = ProducerId::from("p1");
        reg.on_fork_start(&p, ForkId::from("f1"), 100, 1);
        reg.on_fork_start(&p, ForkId::from("f2"), 100, 2);

        assert_eq!(reg.fork(&ForkId::from("f1")).unwrap().owner_count(), 0);
        assert_eq!(reg.fork(&ForkId::from("f2")).unwrap().owner_count(), 1);
        assert_eq!(reg.active_fork(&p), Some(&ForkId::from("f2")));
    }

    #[test]
    fn test_stray_operation_creates_fork() {
        let mut reg = registry();
        let p = ProducerId::from("p1");
        reg.on_operation(&p, put("f9", 100, 1));

        let fork = reg.fork(&ForkId::from("f9")).unwrap();
        assert_eq!(fork.operation_count, 1);
        assert!(!fork.quarantined);
        assert_eq!(reg.active_fork(&p), Some(&ForkId::from("f9")));
    }

    #[test]
    fn test_stray_operation_quarantined_by_policy() {
        let mut reg = registry_with(RegistryConfig {
            stray_fork_policy: StrayForkPolicy::Quarantine,
            ..RegistryConfig::default()
        });
        let p = ProducerId::from("p1");
        reg.on_operation(&p, put("f9", 100, 1));
        assert!(reg.fork(&ForkId::from("f9")).unwrap().quarantined);

        // A checkpoint naming a quarantined fork is refused
        reg.on_checkpoint(Checkpoint::new(101, ForkId::from("f9"), ForkId::from("f0"), 10));
        assert!(!reg.fork(&ForkId::from("f9")).unwrap().confirmed);
    }

    #[test]
    fn test_checkpoint_confirms_and_prunes_siblings() {
        let mut reg = registry();
        let pa = ProducerId::from("pa");
        let pb = ProducerId::from("pb");
        reg.on_fork_start(&pa, ForkId::from("fa"), 200, 1);
        reg.on_fork_start(&pb, ForkId::from("fb"), 200, 1);
        reg.on_operation(&pa, put("fa", 200, 1));
        reg.on_operation(&pa, marker("fa", 200, 2));
        reg.on_operation(&pb, put("fb", 200, 1));

        reg.on_checkpoint(Checkpoint::new(201, ForkId::from("fa"), ForkId::from("f0"), 10));

        assert!(reg.fork(&ForkId::from("fa")).unwrap().confirmed);
        assert!(reg.fork(&ForkId::from("fb")).is_none());
        // The losing producer's active pointer is cleared
        assert_eq!(reg.active_fork(&pb), None);
        assert_eq!(reg.last_confirmed().unwrap().block_num, 201);
    }

    #[test]
    fn test_checkpoint_missing_marker_retains_fork() {
        let mut reg = registry();
        let p = ProducerId::from("p1");
        reg.on_fork_start(&p, ForkId::from("fx"), 300, 1);
        reg.on_operation(&p, put("fx", 300, 1));
        reg.on_operation(&p, put("fx", 300, 2));

        reg.on_checkpoint(Checkpoint::new(301, ForkId::from("fx"), ForkId::from("f0"), 10));

        let fork = reg.fork(&ForkId::from("fx")).unwrap();
        assert!(!fork.confirmed);
        assert_eq!(fork.operation_count, 2);
    }

    #[test]
    fn test_unknown_checkpoint_hash_finalizes_new_fork() {
        let mut reg = registry();
        let p = ProducerId::from("p1");
        reg.on_fork_start(&p, ForkId::from("old"), 400, 1);

        reg.on_checkpoint(Checkpoint::new(401, ForkId::from("new"), ForkId::from("f0"), 10));

        assert!(reg.fork(&ForkId::from("new")).unwrap().confirmed);
        // Sibling at the same block is pruned
        assert!(reg.fork(&ForkId::from("old")).is_none());
    }

    #[test]
    fn test_block_cap_keeps_most_owned() {
        let mut reg = registry_with(RegistryConfig {
            fork_cap: 3,
            ..RegistryConfig::default()
        });

        // Five forks at block 500 with owner counts 4,3,2,1,1
        let owners = [4usize, 3, 2, 1, 1];
        for (i, n) in owners.iter().enumerate() {
            let fork = ForkId::new(format!("f{}", i));
            for j in 0..*n {
                let p = ProducerId::new(format!("p{}-{}", i, j));
                reg.on_fork_start(&p, fork.clone(), 500, 1);
            }
        }

        assert_eq!(reg.forks_at(500).len(), 3);
        assert!(reg.fork(&ForkId::from("f0")).is_some());
        assert!(reg.fork(&ForkId::from("f1")).is_some());
        assert!(reg.fork(&ForkId::from("f2")).is_some());
        assert!(reg.fork(&ForkId::from("f3")).is_none());
        assert!(reg.fork(&ForkId::from("f4")).is_none());
    }

    #[test]
    fn test_gc_drops_stale_forks() {
        let mut reg = registry_with(RegistryConfig {
            retention_secs: 10,
            ..RegistryConfig::default()
        });
        let p = ProducerId::from("p1");
        reg.on_fork_start(&p, ForkId::from("stale"), 100, 1_000);
        reg.on_fork_start(&ProducerId::from("p2"), ForkId::from("fresh"), 100, 50_000);

        reg.gc_old(55_000);

        assert!(reg.fork(&ForkId::from("stale")).is_none());
        assert!(reg.fork(&ForkId::from("fresh")).is_some());
        assert_eq!(reg.active_fork(&p), None);
    }

    #[test]
    fn test_disconnect_detaches_everywhere() {
        let mut reg = registry();
        let p = ProducerId::from("p1");
        reg.on_fork_start(&p, ForkId::from("f1"), 100, 1);
        reg.on_disconnect(&p);

        assert_eq!(reg.active_fork(&p), None);
        assert_eq!(reg.fork(&ForkId::from("f1")).unwrap().owner_count(), 0);
    }

    #[test]
    fn test_operation_order_preserved_per_producer() {
        let mut reg = registry();
        let p = ProducerId::from("p1");
        for i in 1..=5 {
            reg.on_operation(&p, put("f1", 100, i));
        }
        let fork = reg.fork(&ForkId::from("f1")).unwrap();
        let indices: Vec<u64> = fork.operations.iter().map(|o| o.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5]);
    }
}
