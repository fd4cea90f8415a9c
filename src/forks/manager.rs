// Fork manager - Persistent fork lifecycle projection in the graph store
//
// The in-memory registry answers "what is live right now"; this projection
// answers "what happened to every fork we ever saw". It owns the persisted
// Fork records exclusively and is driven from checkpoint confirmations.

use crate::graph::{ForkRecord, GraphClient, GraphError};
use crate::types::{BlockNumber, ForkId, ForkStatus};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ForkManager {
    graph: Arc<dyn GraphClient>,
}

/// Outcome of a reconcile pass at one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub canonical: ForkId,
    pub orphaned: Vec<ForkId>,
    /// Operation nodes removed by reverts
    pub reverted_ops: u64,
}

impl ForkManager {
    pub fn new(graph: Arc<dyn GraphClient>) -> Self {
        Self { graph }
    }

    /// Idempotent: a second call with identical arguments leaves exactly one
    /// record.
    pub async fn create_fork(
        &self,
        parent: Option<ForkId>,
        at_block: BlockNumber,
        id: ForkId,
    ) -> Result<(), GraphError> {
        let record = ForkRecord {
            fork_id: id.clone(),
            parent_fork: parent,
            created_at_block: at_block,
            status: ForkStatus::Active,
            last_block: at_block,
            created_at: Utc::now(),
            orphaned_at: None,
        };
        let created = self.graph.upsert_fork(&record).await?;
        if created {
            debug!(fork = %id, block = at_block, "fork projection record created");
        }
        Ok(())
    }

    pub async fn update_status(
        &self,
        id: &ForkId,
        status: ForkStatus,
        last_block: Option<BlockNumber>,
    ) -> Result<(), GraphError> {
        let orphaned_at = (status == ForkStatus::Orphaned).then(Utc::now);
        self.graph
            .set_fork_status(id, status, last_block, orphaned_at)
            .await
    }

    /// A block hash disagreed with what we expected: record the divergence
    /// as a derived fork and return its identity.
    pub async fn detect_fork(
        &self,
        block_num: BlockNumber,
        observed_hash: &str,
        expected_hash: &str,
    ) -> Result<Option<ForkId>, GraphError> {
        if observed_hash == expected_hash {
            return Ok(None);
        }
        warn!(
            block = block_num,
            observed = observed_hash,
            expected = expected_hash,
            "hash divergence; recording derived fork"
        );
        let derived = ForkId::new(observed_hash);
        self.create_fork(Some(ForkId::new(expected_hash)), block_num, derived.clone())
            .await?;
        Ok(Some(derived))
    }

    /// Settle one block: the fork matching the consensus hash becomes
    /// CANONICAL; every other fork at the block is ORPHANED and its
    /// operations at and after the block are reverted. Safe to replay.
    pub async fn reconcile(
        &self,
        block: BlockNumber,
        consensus_hash: &str,
        agreed_nodes: usize,
    ) -> Result<ReconcileOutcome, GraphError> {
        let canonical = ForkId::new(consensus_hash);

        // The winner may be new to the projection (checkpoint on an unknown
        // hash finalizes a fresh fork)
        self.create_fork(None, block, canonical.clone()).await?;
        self.update_status(&canonical, ForkStatus::Canonical, Some(block))
            .await?;

        let mut orphaned = Vec::new();
        let mut reverted_ops = 0;

        for record in self.graph.forks_at_block(block).await? {
            if record.fork_id == canonical {
                continue;
            }
            if record.status == ForkStatus::Orphaned {
                // Replay: already settled
                continue;
            }
            reverted_ops += self.graph.revert_fork_from(&record.fork_id, block).await?;
            self.update_status(&record.fork_id, ForkStatus::Orphaned, None)
                .await?;
            orphaned.push(record.fork_id);
        }

        info!(
            block,
            canonical = %canonical,
            orphaned = orphaned.len(),
            agreed_nodes,
            "fork reconciliation complete"
        );

        Ok(ReconcileOutcome {
            canonical,
            orphaned,
            reverted_ops,
        })
    }

    /// Delete ORPHANED records whose history ended before `block`. The
    /// fork-scoped revert already purged their operation nodes; this drops
    /// metadata only.
    pub async fn prune_before(&self, block: BlockNumber) -> Result<usize, GraphError> {
        let mut pruned = 0;
        for record in self.graph.orphaned_forks_before(block).await? {
            self.graph.delete_fork(&record.fork_id).await?;
            pruned += 1;
        }
        if pruned > 0 {
            info!(before = block, pruned, "pruned orphaned fork records");
        }
        Ok(pruned)
    }
}
