// Fork types - Competing candidate histories proposed by producers
//
// A fork is a candidate linear history identified by the producer's pending
// hash. Many forks may be live for the same block; at most one becomes
// canonical when a checkpoint confirms it.

use crate::types::operation::Operation;
use crate::types::primitives::{BlockNumber, ForkId, ProducerId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// Default bound on the per-fork operation buffer
pub const DEFAULT_OP_BUFFER_SIZE: usize = 10_000;

/// Default cap on live forks per block
pub const DEFAULT_FORK_CAP: usize = 10;

/// Default retention window for inactive forks (seconds)
pub const DEFAULT_FORK_RETENTION_SECS: u64 = 3600;

/// Lifecycle status of a fork in the persistent projection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForkStatus {
    /// Live, accumulating operations
    Active,
    /// Confirmed by a checkpoint
    Canonical,
    /// Lost to a sibling at the same block
    Orphaned,
}

/// In-memory fork state owned by the fork registry
#[derive(Debug, Clone)]
pub struct Fork {
    /// Pending-hash identity
    pub id: ForkId,

    /// Block height the fork originated at
    pub block_num: BlockNumber,

    /// Producer-side start timestamp (epoch millis)
    pub started_at: Timestamp,

    /// Last time any producer touched this fork (epoch millis)
    pub last_updated: Timestamp,

    /// Producers currently advertising this fork
    pub producers: HashSet<ProducerId>,

    /// Ordered operation buffer, head-evicted at capacity
    pub operations: VecDeque<Operation>,

    /// Total operations ever appended; not reduced by eviction
    pub operation_count: u64,

    /// Last write marker observed, if any
    pub last_write_marker: Option<Operation>,

    /// Set when a checkpoint confirmed this fork
    pub confirmed: bool,

    /// Auto-created from a stray operation under the quarantine policy;
    /// excluded from checkpoint confirmation until a fork_start claims it
    pub quarantined: bool,
}

impl Fork {
    pub fn new(id: ForkId, block_num: BlockNumber, ts: Timestamp) -> Self {
        Self {
            id,
            block_num,
            started_at: ts,
            last_updated: ts,
            producers: HashSet::new(),
            operations: VecDeque::new(),
            operation_count: 0,
            last_write_marker: None,
            confirmed: false,
            quarantined: false,
        }
    }

    /// Append an operation, evicting the head first when at capacity.
    /// `operation_count` always increments.
    pub fn push_operation(&mut self, op: Operation, capacity: usize) {
        if self.operations.len() >= capacity {
            self.operations.pop_front();
        }
        if op.is_write_marker() {
            self.last_write_marker = Some(op.clone());
        }
        self.last_updated = op.timestamp.max(self.last_updated);
        self.operations.push_back(op);
        self.operation_count += 1;
    }

    pub fn add_producer(&mut self, producer: ProducerId, ts: Timestamp) {
        self.producers.insert(producer);
        self.last_updated = self.last_updated.max(ts);
        // A producer explicitly claiming the fork lifts quarantine
        self.quarantined = false;
    }

    pub fn remove_producer(&mut self, producer: &ProducerId) {
        self.producers.remove(producer);
    }

    pub fn owner_count(&self) -> usize {
        self.producers.len()
    }

    /// The final buffered operation, if any
    pub fn last_operation(&self) -> Option<&Operation> {
        self.operations.back()
    }
}
