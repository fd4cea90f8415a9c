// API server - Peer HTTP surface and producer WebSocket endpoint (warp)
//
// Routes:
//   GET /api/honeygraph-peers            known healthy peers
//   GET /api/query/head                  local head block
//   GET /api/query/block/{n}/full        full block body (?fork= filter)
//   GET /health                          503 + error when the graph is down
//   GET /ws                              producer WebSocket upgrade

use crate::graph::GraphClient;
use crate::network::{PeerEntry, PeerRegistry};
use crate::rpc::types::{ApiError, HealthBody, HeadBody};
use crate::session::SessionHub;
use crate::types::ForkId;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use warp::http::StatusCode;
use warp::Filter;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub port: u16,
    pub address: [u8; 4],
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: 3030,
            address: [127, 0, 0, 1],
        }
    }
}

/// State shared with the warp handlers
#[derive(Clone)]
pub struct ApiState {
    pub graph: Arc<dyn GraphClient>,
    pub peers: Arc<RwLock<PeerRegistry>>,
}

/// Peer HTTP surface + producer WebSocket
pub struct ApiServer {
    config: ApiConfig,
}

impl ApiServer {
    pub fn new(config: ApiConfig) -> Self {
        Self { config }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.config.address, self.config.port))
    }

    /// Start in the background; the handle shuts the server down on drop
    pub async fn start_background(
        self,
        state: ApiState,
        sessions: Arc<SessionHub>,
    ) -> ApiServerHandle {
        let addr = self.socket_addr();
        let routes = routes(state, sessions);

        let (tx, rx) = oneshot::channel::<()>();
        let (bound_addr, server) =
            warp::serve(routes).bind_with_graceful_shutdown(addr, async {
                rx.await.ok();
            });

        info!("api server ready on http://{}", bound_addr);
        tokio::spawn(server);

        ApiServerHandle {
            addr: bound_addr,
            shutdown_tx: Some(tx),
        }
    }
}

/// Handle for a running API server
pub struct ApiServerHandle {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ApiServerHandle {
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for ApiServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// The full route tree: peer surface, health, producer WebSocket
pub fn routes(
    state: ApiState,
    sessions: Arc<SessionHub>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let peers = warp::path!("api" / "honeygraph-peers")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_peer_list);

    let head = warp::path!("api" / "query" / "head")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_head);

    let block_full = warp::path!("api" / "query" / "block" / u64 / "full")
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_state(state.clone()))
        .and_then(handle_block_full);

    let health = warp::path!("health")
        .and(warp::get())
        .and(with_state(state))
        .and_then(handle_health);

    let ws = warp::path!("ws")
        .and(warp::ws())
        .map(move |upgrade: warp::ws::Ws| {
            let hub = sessions.clone();
            upgrade.on_upgrade(move |socket| hub.handle(socket))
        });

    peers.or(head).or(block_full).or(health).or(ws)
}

fn with_state(state: ApiState) -> impl Filter<Extract = (ApiState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

async fn handle_peer_list(state: ApiState) -> Result<impl warp::Reply, Infallible> {
    let healthy = state.peers.read().await.healthy_peers();
    let entries: Vec<PeerEntry> = healthy
        .into_iter()
        .map(|p| PeerEntry { id: p.id, url: p.url })
        .collect();
    Ok(warp::reply::json(&entries))
}

async fn handle_head(state: ApiState) -> Result<impl warp::Reply, Infallible> {
    match state.graph.head_block().await {
        Ok(head) => Ok(warp::reply::with_status(
            warp::reply::json(&HeadBody { head }),
            StatusCode::OK,
        )),
        Err(e) => Ok(warp::reply::with_status(
            warp::reply::json(
                &ApiError::new("head unavailable").with_details(e.to_string()),
            ),
            StatusCode::INTERNAL_SERVER_ERROR,
        )),
    }
}

async fn handle_block_full(
    block: u64,
    query: HashMap<String, String>,
    state: ApiState,
) -> Result<impl warp::Reply, Infallible> {
    let fork = query.get("fork").map(|f| ForkId::new(f.clone()));
    debug!(block, fork = ?fork, "full block requested");

    match state.graph.block_full(block, fork.as_ref()).await {
        Ok(Some(body)) => Ok(warp::reply::with_status(
            warp::reply::json(&body),
            StatusCode::OK,
        )),
        Ok(None) => Ok(warp::reply::with_status(
            warp::reply::json(
                &ApiError::new("block not found")
                    .with_path(format!("/api/query/block/{}/full", block)),
            ),
            StatusCode::NOT_FOUND,
        )),
        Err(e) => Ok(warp::reply::with_status(
            warp::reply::json(
                &ApiError::new("block query failed").with_details(e.to_string()),
            ),
            StatusCode::INTERNAL_SERVER_ERROR,
        )),
    }
}

async fn handle_health(state: ApiState) -> Result<impl warp::Reply, Infallible> {
    match state.graph.health().await {
        Ok(()) => Ok(warp::reply::with_status(
            warp::reply::json(&HealthBody::healthy()),
            StatusCode::OK,
        )),
        Err(e) => Ok(warp::reply::with_status(
            warp::reply::json(&HealthBody::unhealthy(e.to_string())),
            StatusCode::SERVICE_UNAVAILABLE,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_addr() {
        let server = ApiServer::new(ApiConfig {
            port: 3031,
            address: [0, 0, 0, 0],
        });
        let addr = server.socket_addr();
        assert_eq!(addr.port(), 3031);
        assert_eq!(addr.ip().to_string(), "0.0.0.0");
    }

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert_eq!(config.port, 3030);
        assert_eq!(config.address, [127, 0, 0, 1]);
    }
}
