// Operation types - State mutations streamed by producers
//
// An operation is one entry of a fork's ordered buffer. PUT and DEL carry a
// hierarchical path into the graph store; WRITE_MARKER is a boundary-only
// entry that must terminate a block before a checkpoint can finalize it.

use crate::types::primitives::{BlockNumber, Digest, ForkId, ProducerId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    /// Write a payload at a path
    Put,
    /// Remove a path
    Del,
    /// Terminal boundary entry for a block
    WriteMarker,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OpKind::Put => write!(f, "put"),
            OpKind::Del => write!(f, "del"),
            OpKind::WriteMarker => write!(f, "write_marker"),
        }
    }
}

/// Opaque operation payload: raw bytes plus a companion content-type tag.
/// The sidecar never interprets payloads; they pass verbatim to the
/// data-transformer behind the graph store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Payload {
    /// Wrap an arbitrary JSON value as an opaque payload
    pub fn json(value: &serde_json::Value) -> Self {
        Self {
            content_type: "application/json".to_string(),
            bytes: serde_json::to_vec(value).unwrap_or_default(),
        }
    }
}

/// A single state-mutation operation within a fork
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Operation kind
    pub kind: OpKind,

    /// Block height this operation belongs to
    pub block_num: BlockNumber,

    /// Monotonic index within the block
    pub index: u64,

    /// Hierarchical path key ("/accounts/alice/balance")
    pub path: String,

    /// Payload (PUT only)
    pub data: Option<Payload>,

    /// Fork this operation was streamed for
    pub fork: ForkId,

    /// Producer that sent it
    pub producer: ProducerId,

    /// Receive timestamp (epoch millis)
    pub timestamp: Timestamp,

    /// Hash of the previous confirmed checkpoint (write markers only;
    /// recorded, compared with a warning on mismatch, never enforced)
    pub prev_checkpoint_hash: Option<String>,
}

impl Operation {
    /// Idempotency key for APPLY_OP jobs: fork ⊕ block ⊕ index
    pub fn idempotency_key(&self) -> Digest {
        let mut data = Vec::with_capacity(self.fork.as_str().len() + 16);
        data.extend_from_slice(self.fork.as_str().as_bytes());
        data.extend_from_slice(&self.block_num.to_le_bytes());
        data.extend_from_slice(&self.index.to_le_bytes());
        Digest::hash(&data)
    }

    pub fn is_write_marker(&self) -> bool {
        self.kind == OpKind::WriteMarker
    }
}
