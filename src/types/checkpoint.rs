// Checkpoint types - Producer attestations that a fork hash is final
use crate::types::primitives::{BlockNumber, ForkId, Timestamp};
use serde::{Deserialize, Serialize};

/// A producer-level attestation that `hash` is the finalized fork for
/// `block_num`. At most one canonical checkpoint per height in steady state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub block_num: BlockNumber,

    /// Confirmed fork hash
    pub hash: ForkId,

    /// Previously confirmed hash
    pub prev_hash: ForkId,

    /// Producer-side timestamp (epoch millis)
    pub timestamp: Timestamp,
}

impl Checkpoint {
    pub fn new(block_num: BlockNumber, hash: ForkId, prev_hash: ForkId, timestamp: Timestamp) -> Self {
        Self {
            block_num,
            hash,
            prev_hash,
            timestamp,
        }
    }
}
