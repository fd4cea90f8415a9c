// Graph store client - Transport to the external graph database
//
// The sidecar never interprets graph schema or queries; it writes operations
// through the store's data-transformer, maintains the fork projection, and
// reads block presence/head for gap sync. Everything else about the store is
// out of scope.

pub mod http;
pub mod memory;

use crate::types::{BlockNumber, ForkId, ForkStatus, Operation, PeerBlock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use http::HttpGraphClient;
pub use memory::MemoryGraph;

/// Graph-store errors
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("graph store unreachable: {0}")]
    Unreachable(String),

    #[error("graph store rejected the write: {0}")]
    Rejected(String),

    #[error("graph store timed out")]
    Timeout,

    /// Fatal: the store no longer speaks our projection's shape
    #[error("schema incompatibility: {0}")]
    SchemaIncompatible(String),
}

impl GraphError {
    /// Transient errors are retried with backoff; fatal ones halt the
    /// affected subsystem.
    pub fn is_transient(&self) -> bool {
        matches!(self, GraphError::Unreachable(_) | GraphError::Timeout)
    }
}

/// Result of applying one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The (fork, block, index) triple was already applied; success
    AlreadyApplied,
}

/// Persistent fork projection record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkRecord {
    pub fork_id: ForkId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_fork: Option<ForkId>,

    pub created_at_block: BlockNumber,

    pub status: ForkStatus,

    pub last_block: BlockNumber,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphaned_at: Option<DateTime<Utc>>,
}

/// Async seam to the graph store. Implementations must be thread-safe;
/// the client is shared across queue workers and the API server.
#[async_trait]
pub trait GraphClient: Send + Sync {
    /// Write one operation through the data-transformer. Conflicts with an
    /// already-applied triple succeed with `AlreadyApplied`.
    async fn apply_operation(&self, op: &Operation) -> Result<ApplyOutcome, GraphError>;

    /// Idempotent creation; returns true when the record was created
    async fn upsert_fork(&self, record: &ForkRecord) -> Result<bool, GraphError>;

    async fn fork_record(&self, id: &ForkId) -> Result<Option<ForkRecord>, GraphError>;

    /// All projection records created at `block`
    async fn forks_at_block(&self, block: BlockNumber) -> Result<Vec<ForkRecord>, GraphError>;

    /// Orphaned records whose history ended before `block` (pruning)
    async fn orphaned_forks_before(
        &self,
        block: BlockNumber,
    ) -> Result<Vec<ForkRecord>, GraphError>;

    async fn set_fork_status(
        &self,
        id: &ForkId,
        status: ForkStatus,
        last_block: Option<BlockNumber>,
        orphaned_at: Option<DateTime<Utc>>,
    ) -> Result<(), GraphError>;

    /// Remove operation nodes and derived entities scoped to `fork` at or
    /// after `from_block`. Idempotent; returns the number removed.
    async fn revert_fork_from(
        &self,
        fork: &ForkId,
        from_block: BlockNumber,
    ) -> Result<u64, GraphError>;

    /// Drop a fork projection record outright (pruning)
    async fn delete_fork(&self, id: &ForkId) -> Result<(), GraphError>;

    /// Highest block present locally
    async fn head_block(&self) -> Result<BlockNumber, GraphError>;

    async fn has_block(&self, block: BlockNumber) -> Result<bool, GraphError>;

    /// Full block body for the peer HTTP surface
    async fn block_full(
        &self,
        block: BlockNumber,
        fork: Option<&ForkId>,
    ) -> Result<Option<PeerBlock>, GraphError>;

    /// Transactional import of a full block; failure leaves no partial write
    async fn import_block(&self, block: &PeerBlock) -> Result<(), GraphError>;

    async fn health(&self) -> Result<(), GraphError>;
}
