// Block types - Full block bodies exchanged between sidecar peers
use crate::types::operation::Operation;
use crate::types::primitives::BlockNumber;
use serde::{Deserialize, Serialize};

/// A full block body as served by a peer's `/api/query/block/{n}/full`.
/// This is the unit of gap-sync import.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerBlock {
    pub block_num: BlockNumber,

    /// Hash the peer holds for this block; subject to majority vote
    pub block_hash: String,

    pub previous_hash: String,

    pub operations: Vec<Operation>,

    /// Optional IPFS pointer to the raw block body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipfs_hash: Option<String>,
}

impl PeerBlock {
    /// Idempotency key for BLOCK_IMPORT jobs
    pub fn idempotency_key(&self) -> crate::types::primitives::Digest {
        let mut data = Vec::with_capacity(self.block_hash.len() + 8);
        data.extend_from_slice(&self.block_num.to_le_bytes());
        data.extend_from_slice(self.block_hash.as_bytes());
        crate::types::primitives::Digest::hash(&data)
    }
}
