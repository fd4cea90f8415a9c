// Peer HTTP client - Outbound fetches against other sidecar instances
use crate::types::{BlockNumber, PeerBlock};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ceiling for peer data requests
pub const PEER_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Ceiling for health probes
pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Header naming this node on outbound fetches
pub const PEER_ID_HEADER: &str = "x-honeygraph-peer";

/// Peer networking errors
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("peer request failed: {0}")]
    Request(String),

    #[error("peer returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("peer response malformed: {0}")]
    Malformed(String),
}

/// One entry of a peer's known-peer list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEntry {
    pub id: String,
    pub url: String,
}

/// HTTP client over the peer surface
pub struct PeerClient {
    client: reqwest::Client,

    /// This node's identifier, announced on every request
    node_id: String,
}

impl PeerClient {
    pub fn new(node_id: impl Into<String>) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .timeout(PEER_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NetworkError::Request(e.to_string()))?;
        Ok(Self {
            client,
            node_id: node_id.into(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<T, NetworkError> {
        let resp = self
            .client
            .get(url)
            .header(PEER_ID_HEADER, &self.node_id)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| NetworkError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NetworkError::Status {
                status: status.as_u16(),
                body,
            });
        }
        resp.json()
            .await
            .map_err(|e| NetworkError::Malformed(e.to_string()))
    }

    /// GET /api/honeygraph-peers
    pub async fn fetch_peer_list(&self, base_url: &str) -> Result<Vec<PeerEntry>, NetworkError> {
        let url = format!("{}/api/honeygraph-peers", base_url.trim_end_matches('/'));
        self.get_json(&url, PEER_REQUEST_TIMEOUT).await
    }

    /// GET /api/query/head
    pub async fn fetch_head(&self, base_url: &str) -> Result<BlockNumber, NetworkError> {
        #[derive(Deserialize)]
        struct Head {
            head: BlockNumber,
        }
        let url = format!("{}/api/query/head", base_url.trim_end_matches('/'));
        let head: Head = self.get_json(&url, PEER_REQUEST_TIMEOUT).await?;
        Ok(head.head)
    }

    /// GET /api/query/block/{n}/full
    pub async fn fetch_block(
        &self,
        base_url: &str,
        block: BlockNumber,
        fork: Option<&str>,
    ) -> Result<PeerBlock, NetworkError> {
        let mut url = format!(
            "{}/api/query/block/{}/full",
            base_url.trim_end_matches('/'),
            block
        );
        if let Some(fork) = fork {
            url.push_str(&format!("?fork={}", fork));
        }
        let body: PeerBlock = self.get_json(&url, PEER_REQUEST_TIMEOUT).await?;

        if body.block_num != block {
            return Err(NetworkError::Malformed(format!(
                "asked for block {}, peer sent {}",
                block, body.block_num
            )));
        }
        Ok(body)
    }

    /// GET /health with the short probe timeout
    pub async fn check_health(&self, base_url: &str) -> bool {
        #[derive(Deserialize)]
        struct Health {
            status: String,
        }
        let url = format!("{}/health", base_url.trim_end_matches('/'));
        match self.get_json::<Health>(&url, HEALTH_PROBE_TIMEOUT).await {
            Ok(h) => h.status == "healthy",
            Err(_) => false,
        }
    }
}
