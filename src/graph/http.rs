// HTTP graph client - reqwest transport to the graph store's sidecar API
use crate::graph::{ApplyOutcome, ForkRecord, GraphClient, GraphError};
use crate::types::{BlockNumber, ForkId, ForkStatus, Operation, PeerBlock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use std::time::Duration;

/// Default ceiling for graph-store calls
pub const GRAPH_TIMEOUT: Duration = Duration::from_secs(60);

pub struct HttpGraphClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpGraphClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, GraphError> {
        let client = reqwest::Client::builder()
            .timeout(GRAPH_TIMEOUT)
            .build()
            .map_err(|e| GraphError::Unreachable(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn map_err(e: reqwest::Error) -> GraphError {
        if e.is_timeout() {
            GraphError::Timeout
        } else {
            GraphError::Unreachable(e.to_string())
        }
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, GraphError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            // The store no longer understands our projection shape
            return Err(GraphError::SchemaIncompatible(body));
        }
        if status.is_server_error() {
            return Err(GraphError::Unreachable(format!("{}: {}", status, body)));
        }
        Err(GraphError::Rejected(format!("{}: {}", status, body)))
    }
}

#[async_trait]
impl GraphClient for HttpGraphClient {
    async fn apply_operation(&self, op: &Operation) -> Result<ApplyOutcome, GraphError> {
        let resp = self
            .client
            .post(self.url("/op"))
            .json(op)
            .send()
            .await
            .map_err(Self::map_err)?;

        if resp.status() == StatusCode::CONFLICT {
            return Ok(ApplyOutcome::AlreadyApplied);
        }
        Self::check(resp).await?;
        Ok(ApplyOutcome::Applied)
    }

    async fn upsert_fork(&self, record: &ForkRecord) -> Result<bool, GraphError> {
        let resp = self
            .client
            .put(self.url("/forks"))
            .json(record)
            .send()
            .await
            .map_err(Self::map_err)?;
        let created = resp.status() == StatusCode::CREATED;
        Self::check(resp).await?;
        Ok(created)
    }

    async fn fork_record(&self, id: &ForkId) -> Result<Option<ForkRecord>, GraphError> {
        let resp = self
            .client
            .get(self.url(&format!("/forks/{}", id.as_str())))
            .send()
            .await
            .map_err(Self::map_err)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = Self::check(resp).await?;
        resp.json().await.map(Some).map_err(Self::map_err)
    }

    async fn forks_at_block(&self, block: BlockNumber) -> Result<Vec<ForkRecord>, GraphError> {
        let resp = self
            .client
            .get(self.url(&format!("/forks?block={}", block)))
            .send()
            .await
            .map_err(Self::map_err)?;
        let resp = Self::check(resp).await?;
        resp.json().await.map_err(Self::map_err)
    }

    async fn orphaned_forks_before(
        &self,
        block: BlockNumber,
    ) -> Result<Vec<ForkRecord>, GraphError> {
        let resp = self
            .client
            .get(self.url(&format!("/forks?status=ORPHANED&before={}", block)))
            .send()
            .await
            .map_err(Self::map_err)?;
        let resp = Self::check(resp).await?;
        resp.json().await.map_err(Self::map_err)
    }

    async fn set_fork_status(
        &self,
        id: &ForkId,
        status: ForkStatus,
        last_block: Option<BlockNumber>,
        orphaned_at: Option<DateTime<Utc>>,
    ) -> Result<(), GraphError> {
        let body = serde_json::json!({
            "status": status,
            "lastBlock": last_block,
            "orphanedAt": orphaned_at,
        });
        let resp = self
            .client
            .patch(self.url(&format!("/forks/{}", id.as_str())))
            .json(&body)
            .send()
            .await
            .map_err(Self::map_err)?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn revert_fork_from(
        &self,
        fork: &ForkId,
        from_block: BlockNumber,
    ) -> Result<u64, GraphError> {
        let body = serde_json::json!({ "fromBlock": from_block });
        let resp = self
            .client
            .post(self.url(&format!("/forks/{}/revert", fork.as_str())))
            .json(&body)
            .send()
            .await
            .map_err(Self::map_err)?;
        let resp = Self::check(resp).await?;
        #[derive(serde::Deserialize)]
        struct Reverted {
            removed: u64,
        }
        let r: Reverted = resp.json().await.map_err(Self::map_err)?;
        Ok(r.removed)
    }

    async fn delete_fork(&self, id: &ForkId) -> Result<(), GraphError> {
        let resp = self
            .client
            .delete(self.url(&format!("/forks/{}", id.as_str())))
            .send()
            .await
            .map_err(Self::map_err)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(resp).await?;
        Ok(())
    }

    async fn head_block(&self) -> Result<BlockNumber, GraphError> {
        let resp = self
            .client
            .get(self.url("/head"))
            .send()
            .await
            .map_err(Self::map_err)?;
        let resp = Self::check(resp).await?;
        #[derive(serde::Deserialize)]
        struct Head {
            head: BlockNumber,
        }
        let h: Head = resp.json().await.map_err(Self::map_err)?;
        Ok(h.head)
    }

    async fn has_block(&self, block: BlockNumber) -> Result<bool, GraphError> {
        let resp = self
            .client
            .get(self.url(&format!("/block/{}", block)))
            .send()
            .await
            .map_err(Self::map_err)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(resp).await?;
        Ok(true)
    }

    async fn block_full(
        &self,
        block: BlockNumber,
        fork: Option<&ForkId>,
    ) -> Result<Option<PeerBlock>, GraphError> {
        let mut url = self.url(&format!("/block/{}/full", block));
        if let Some(fork) = fork {
            url.push_str(&format!("?fork={}", fork.as_str()));
        }
        let resp = self.client.get(url).send().await.map_err(Self::map_err)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = Self::check(resp).await?;
        resp.json().await.map(Some).map_err(Self::map_err)
    }

    async fn import_block(&self, block: &PeerBlock) -> Result<(), GraphError> {
        let resp = self
            .client
            .post(self.url("/block"))
            .json(block)
            .send()
            .await
            .map_err(Self::map_err)?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn health(&self) -> Result<(), GraphError> {
        let resp = self
            .client
            .get(self.url("/health"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(Self::map_err)?;
        Self::check(resp).await?;
        Ok(())
    }
}
