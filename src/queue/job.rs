// Replication jobs - Typed units of durable, at-least-once work
use crate::types::{Checkpoint, Digest, ForkId, Operation, PeerBlock};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Attempts before a job goes terminal FAILED
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// First retry delay; doubles per attempt
pub const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Ceiling on any single retry delay
pub const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Default per-handler execution ceiling
pub const HANDLER_TIMEOUT: Duration = Duration::from_secs(60);

/// Scheduling class; smaller runs first at equal arrival
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    /// Checkpoint confirmations outrank everything
    High = 0,
    /// Operation application
    Normal = 1,
    /// Gap-sync block imports
    Low = 2,
}

impl Priority {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// The work itself
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobKind {
    ApplyOp(Operation),
    CheckpointConfirm(Checkpoint),
    BlockImport(PeerBlock),
}

impl JobKind {
    pub fn priority(&self) -> Priority {
        match self {
            JobKind::CheckpointConfirm(_) => Priority::High,
            JobKind::ApplyOp(_) => Priority::Normal,
            JobKind::BlockImport(_) => Priority::Low,
        }
    }

    /// Kind-specific dedup key; duplicate enqueues collapse on it
    pub fn idempotency_key(&self) -> Digest {
        match self {
            JobKind::ApplyOp(op) => op.idempotency_key(),
            JobKind::CheckpointConfirm(cp) => {
                let mut data = Vec::with_capacity(cp.hash.as_str().len() + 9);
                data.push(b'c');
                data.extend_from_slice(&cp.block_num.to_le_bytes());
                data.extend_from_slice(cp.hash.as_str().as_bytes());
                Digest::hash(&data)
            }
            JobKind::BlockImport(block) => block.idempotency_key(),
        }
    }

    /// Fork whose per-fork FIFO this job belongs to. Checkpoint
    /// confirmations share their fork's lane so they run after the fork's
    /// buffered operations.
    pub fn fork_lane(&self) -> Option<&ForkId> {
        match self {
            JobKind::ApplyOp(op) => Some(&op.fork),
            JobKind::CheckpointConfirm(cp) => Some(&cp.hash),
            JobKind::BlockImport(_) => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            JobKind::ApplyOp(op) => {
                format!("apply {} {}#{} {}", op.kind, op.block_num, op.index, op.path)
            }
            JobKind::CheckpointConfirm(cp) => {
                format!("checkpoint {} @{}", cp.hash, cp.block_num)
            }
            JobKind::BlockImport(b) => format!("import block {}", b.block_num),
        }
    }
}

/// A persisted queue entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Monotonic sequence, FIFO within a priority class
    pub seq: u64,

    pub kind: JobKind,

    pub attempts: u32,
}

/// Exponential backoff for a given attempt count (1-based)
pub fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    BACKOFF_BASE.saturating_mul(factor).min(BACKOFF_CAP)
}
