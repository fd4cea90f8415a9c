// Snapshot collaborator - Interface to the external copy-on-write engine
//
// The engine itself (dataset snapshots, restores, clones) lives outside this
// process. The sidecar drives it through the `SnapshotEngine` seam and owns
// the one piece of sequencing the engine cannot: after a rollback the graph
// service must come back healthy before replication resumes.

use crate::graph::GraphClient;
use crate::types::BlockNumber;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How long to wait for the graph service after a restore
pub const ROLLBACK_HEALTH_TIMEOUT: Duration = Duration::from_secs(60);

/// Poll cadence while waiting for health
pub const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Snapshot errors
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot engine error: {0}")]
    Engine(String),

    /// Fatal: a rollback found corrupt state; the process must exit
    #[error("snapshot corruption during rollback: {0}")]
    Corruption(String),

    #[error("graph service did not recover after rollback")]
    ServiceUnhealthy,
}

/// Metadata for one point-in-time image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub snapshot_id: String,
    pub block_num: BlockNumber,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

/// One entry of a snapshot diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotChange {
    pub path: String,
    pub change: String,
}

/// Seam to the external snapshot/rollback engine
#[async_trait]
pub trait SnapshotEngine: Send + Sync {
    /// Take a point-in-time image tagged by block; returns the snapshot id
    async fn create_checkpoint(
        &self,
        block: BlockNumber,
        hash: &str,
    ) -> Result<String, SnapshotError>;

    /// Stop the graph service, restore the image for `block`, restart.
    /// Returns whether a restore actually happened.
    async fn rollback(&self, block: BlockNumber) -> Result<bool, SnapshotError>;

    /// Clone the dataset at `block` under a suffixed name
    async fn clone_dataset(
        &self,
        block: BlockNumber,
        suffix: &str,
    ) -> Result<String, SnapshotError>;

    async fn diff(
        &self,
        from_block: BlockNumber,
        to_block: BlockNumber,
    ) -> Result<Vec<SnapshotChange>, SnapshotError>;

    async fn list_existing(&self) -> Result<Vec<SnapshotInfo>, SnapshotError>;

    /// Drop one image (snapshot-count pruning)
    async fn drop_checkpoint(&self, snapshot_id: &str) -> Result<(), SnapshotError>;
}

/// Engine stub that records requests without touching any filesystem.
/// Used when no engine is configured, and by tests.
#[derive(Default)]
pub struct NullSnapshotEngine {
    created: Mutex<Vec<SnapshotInfo>>,
}

impl NullSnapshotEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> Vec<SnapshotInfo> {
        self.created.lock().clone()
    }
}

#[async_trait]
impl SnapshotEngine for NullSnapshotEngine {
    async fn create_checkpoint(
        &self,
        block: BlockNumber,
        hash: &str,
    ) -> Result<String, SnapshotError> {
        let id = format!("checkpoint-{}", block);
        self.created.lock().push(SnapshotInfo {
            snapshot_id: id.clone(),
            block_num: block,
            hash: hash.to_string(),
            created_at: Utc::now(),
        });
        info!(block, snapshot = %id, "snapshot requested (null engine)");
        Ok(id)
    }

    async fn rollback(&self, block: BlockNumber) -> Result<bool, SnapshotError> {
        warn!(block, "rollback requested but no snapshot engine is configured");
        Ok(false)
    }

    async fn clone_dataset(
        &self,
        block: BlockNumber,
        suffix: &str,
    ) -> Result<String, SnapshotError> {
        Ok(format!("dataset-{}-{}", block, suffix))
    }

    async fn diff(
        &self,
        _from_block: BlockNumber,
        _to_block: BlockNumber,
    ) -> Result<Vec<SnapshotChange>, SnapshotError> {
        Ok(vec![])
    }

    async fn list_existing(&self) -> Result<Vec<SnapshotInfo>, SnapshotError> {
        Ok(self.created.lock().clone())
    }

    async fn drop_checkpoint(&self, snapshot_id: &str) -> Result<(), SnapshotError> {
        self.created
            .lock()
            .retain(|s| s.snapshot_id != snapshot_id);
        Ok(())
    }
}

/// Sequencing layer over the engine: bounded snapshot count on create,
/// health-gated return on rollback.
pub struct SnapshotOrchestrator {
    engine: Arc<dyn SnapshotEngine>,
    graph: Arc<dyn GraphClient>,

    /// Dataset label, carried for operator-facing logs
    dataset: String,

    /// Keep at most this many images; oldest dropped after create
    max_snapshots: usize,
}

impl SnapshotOrchestrator {
    pub fn new(
        engine: Arc<dyn SnapshotEngine>,
        graph: Arc<dyn GraphClient>,
        dataset: String,
        max_snapshots: usize,
    ) -> Self {
        Self {
            engine,
            graph,
            dataset,
            max_snapshots,
        }
    }

    pub async fn create_checkpoint(
        &self,
        block: BlockNumber,
        hash: &str,
    ) -> Result<String, SnapshotError> {
        let id = self.engine.create_checkpoint(block, hash).await?;
        info!(dataset = %self.dataset, block, snapshot = %id, "snapshot created");

        let mut existing = self.engine.list_existing().await?;
        if existing.len() > self.max_snapshots {
            existing.sort_by_key(|s| s.block_num);
            let excess = existing.len() - self.max_snapshots;
            for old in existing.into_iter().take(excess) {
                self.engine.drop_checkpoint(&old.snapshot_id).await?;
                info!(snapshot = %old.snapshot_id, "dropped snapshot over retention cap");
            }
        }

        Ok(id)
    }

    /// Restore the image for `block` and wait for the graph service to come
    /// back healthy. Not cancellable: corruption or an unhealthy service is
    /// fatal to the process.
    pub async fn rollback(&self, block: BlockNumber) -> Result<bool, SnapshotError> {
        let restored = self.engine.rollback(block).await?;
        if !restored {
            return Ok(false);
        }

        let deadline = tokio::time::Instant::now() + ROLLBACK_HEALTH_TIMEOUT;
        loop {
            if self.graph.health().await.is_ok() {
                info!(block, "graph service healthy after rollback");
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                error!(block, "graph service failed to recover after rollback");
                return Err(SnapshotError::ServiceUnhealthy);
            }
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }
    }

    pub async fn clone_dataset(
        &self,
        block: BlockNumber,
        suffix: &str,
    ) -> Result<String, SnapshotError> {
        self.engine.clone_dataset(block, suffix).await
    }

    pub async fn diff(
        &self,
        from_block: BlockNumber,
        to_block: BlockNumber,
    ) -> Result<Vec<SnapshotChange>, SnapshotError> {
        self.engine.diff(from_block, to_block).await
    }

    pub async fn list_existing(&self) -> Result<Vec<SnapshotInfo>, SnapshotError> {
        self.engine.list_existing().await
    }
}
