// Producer sessions - One task per WebSocket connection
//
// State machine: CONNECTED -> (AWAIT_AUTH) -> IDENTIFIED -> CLOSED. The
// session terminates the socket, enforces the auth window, classifies
// frames, and dispatches producer messages into the fork registry. Protocol
// mistakes are soft (typed error frame, session kept); auth failures close
// with code 1008; two missed pongs kill the connection.

use crate::forks::ForkRegistry;
use crate::session::auth::{AuthVerifier, AUTH_CLOSE_CODE, AUTH_TIMEOUT};
use crate::session::message::{Challenge, ProducerMessage};
use crate::types::{Checkpoint, ForkId, OpKind, Operation, Payload, ProducerId, Timestamp};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use warp::ws::{Message, WebSocket};

/// Ping cadence
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Unanswered pings before the session is terminated
pub const MISSED_PONG_LIMIT: u32 = 2;

/// Message kinds producers are allowed to send; anything else with a
/// well-formed "type" is logged and ignored
const PRODUCER_KINDS: &[&str] = &[
    "auth_response",
    "identify",
    "fork_start",
    "fork_detected",
    "put",
    "del",
    "write_marker",
    "checkpoint",
    "sendCheckpoint",
    "sync_status",
    "error",
];

/// Session layer configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// This node's identifier, announced in the welcome frame
    pub node_id: String,

    /// Demand a signed challenge before accepting producer traffic
    pub require_auth: bool,
}

/// Shared session acceptor; one `handle` call per connection
pub struct SessionHub {
    config: SessionConfig,
    verifier: Arc<AuthVerifier>,
    registry: Arc<RwLock<ForkRegistry>>,
    session_counter: AtomicU64,
}

enum SessionState {
    /// Challenge sent, signature pending
    AwaitAuth { challenge: Challenge },
    /// Streaming; producer set on first identify
    Identified { producer: Option<ProducerId> },
}

impl SessionHub {
    pub fn new(
        config: SessionConfig,
        verifier: Arc<AuthVerifier>,
        registry: Arc<RwLock<ForkRegistry>>,
    ) -> Self {
        Self {
            config,
            verifier,
            registry,
            session_counter: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> Arc<RwLock<ForkRegistry>> {
        self.registry.clone()
    }

    /// Drive one producer connection to completion
    pub async fn handle(self: Arc<Self>, socket: WebSocket) {
        let session = self.session_counter.fetch_add(1, Ordering::Relaxed);
        let (mut tx, mut rx) = socket.split();

        let now = now_millis();
        let welcome = ProducerMessage::Welcome {
            node_id: self.config.node_id.clone(),
            timestamp: now,
        };
        if tx.send(Message::text(welcome.to_frame())).await.is_err() {
            return;
        }

        let mut state = if self.config.require_auth {
            let challenge = self.verifier.make_challenge(&self.config.node_id, now);
            let frame = ProducerMessage::AuthRequired {
                challenge: challenge.clone(),
            };
            if tx.send(Message::text(frame.to_frame())).await.is_err() {
                return;
            }
            SessionState::AwaitAuth { challenge }
        } else {
            SessionState::Identified { producer: None }
        };

        let auth_deadline = tokio::time::Instant::now() + AUTH_TIMEOUT;
        let mut outstanding_pings: u32 = 0;
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping.tick().await; // immediate first tick

        debug!(session, "producer session connected");

        loop {
            let awaiting_auth = matches!(state, SessionState::AwaitAuth { .. });
            tokio::select! {
                _ = tokio::time::sleep_until(auth_deadline), if awaiting_auth => {
                    warn!(session, "authentication window expired");
                    let _ = tx
                        .send(Message::close_with(AUTH_CLOSE_CODE, "auth timeout"))
                        .await;
                    break;
                }

                _ = ping.tick() => {
                    if outstanding_pings >= MISSED_PONG_LIMIT {
                        warn!(session, "missed pongs; terminating session");
                        break;
                    }
                    outstanding_pings += 1;
                    if tx.send(Message::ping(Vec::new())).await.is_err() {
                        break;
                    }
                }

                frame = rx.next() => {
                    match frame {
                        None => break,
                        Some(Err(e)) => {
                            debug!(session, error = %e, "socket error");
                            break;
                        }
                        Some(Ok(msg)) if msg.is_pong() => {
                            outstanding_pings = 0;
                        }
                        Some(Ok(msg)) if msg.is_close() => break,
                        Some(Ok(msg)) if msg.is_text() => {
                            let text = msg.to_str().unwrap_or_default();
                            match self.on_frame(session, text, &mut state, &mut tx).await {
                                FrameOutcome::Continue => {}
                                FrameOutcome::Close(code, reason) => {
                                    let _ = tx.send(Message::close_with(code, reason)).await;
                                    break;
                                }
                            }
                        }
                        Some(Ok(_)) => {
                            // Binary frames are not part of the protocol
                            let frame = ProducerMessage::Error {
                                error: "expected text JSON frames".to_string(),
                            };
                            let _ = tx.send(Message::text(frame.to_frame())).await;
                        }
                    }
                }
            }
        }

        if let SessionState::Identified {
            producer: Some(producer),
        } = &state
        {
            self.registry.write().await.on_disconnect(producer);
            info!(session, producer = %producer, "producer session closed");
        } else {
            debug!(session, "session closed before identification");
        }
    }

    async fn on_frame(
        &self,
        session: u64,
        text: &str,
        state: &mut SessionState,
        tx: &mut (impl SinkExt<Message> + Unpin),
    ) -> FrameOutcome {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                let frame = ProducerMessage::Error {
                    error: format!("invalid frame: {}", e),
                };
                let _ = tx.send(Message::text(frame.to_frame())).await;
                return FrameOutcome::Continue;
            }
        };

        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .to_string();
        let message = match serde_json::from_value::<ProducerMessage>(value) {
            Ok(m) => m,
            Err(e) => {
                if PRODUCER_KINDS.contains(&kind.as_str()) {
                    // Known kind with broken fields: tell the producer
                    let frame = ProducerMessage::Error {
                        error: format!("invalid {} payload: {}", kind, e),
                    };
                    let _ = tx.send(Message::text(frame.to_frame())).await;
                } else {
                    debug!(session, kind, "ignoring unknown message kind");
                }
                return FrameOutcome::Continue;
            }
        };

        match state {
            SessionState::AwaitAuth { challenge } => {
                if let ProducerMessage::AuthResponse {
                    account,
                    signature,
                    message,
                } = message
                {
                    match self
                        .verifier
                        .verify(&account, &signature, &message, challenge)
                        .await
                    {
                        Ok(()) => {
                            let account = account.to_lowercase();
                            info!(session, account = %account, "producer authenticated");
                            let frame = ProducerMessage::AuthSuccess {
                                account: account.clone(),
                            };
                            let _ = tx.send(Message::text(frame.to_frame())).await;
                            *state = SessionState::Identified { producer: None };
                        }
                        Err(e) => {
                            warn!(session, error = %e, "authentication failed");
                            let frame = ProducerMessage::AuthFailed {
                                error: e.to_string(),
                            };
                            let _ = tx.send(Message::text(frame.to_frame())).await;
                            return FrameOutcome::Close(AUTH_CLOSE_CODE, "auth failed");
                        }
                    }
                } else {
                    let frame = ProducerMessage::Error {
                        error: "authentication required".to_string(),
                    };
                    let _ = tx.send(Message::text(frame.to_frame())).await;
                }
                FrameOutcome::Continue
            }

            SessionState::Identified { producer } => {
                self.on_stream_message(session, message, producer, tx).await
            }
        }
    }

    async fn on_stream_message(
        &self,
        session: u64,
        message: ProducerMessage,
        producer: &mut Option<ProducerId>,
        tx: &mut (impl SinkExt<Message> + Unpin),
    ) -> FrameOutcome {
        match message {
            ProducerMessage::Identify {
                source,
                version,
                prefix,
                token,
            } => {
                // Duplicate identify: accept latest
                if let Some(old) = producer.replace(ProducerId::new(source.clone())) {
                    if old.as_str() != source {
                        self.registry.write().await.on_disconnect(&old);
                    }
                }
                info!(session, source = %source, %version, %prefix, "producer identified");
                let frame = ProducerMessage::Ack { token };
                let _ = tx.send(Message::text(frame.to_frame())).await;
                FrameOutcome::Continue
            }

            ProducerMessage::ForkStart {
                fork_hash,
                block_num,
                timestamp,
            } => {
                let Some(producer) = producer else {
                    return self.not_identified(tx).await;
                };
                self.registry.write().await.on_fork_start(
                    producer,
                    ForkId::new(fork_hash),
                    block_num,
                    timestamp,
                );
                FrameOutcome::Continue
            }

            ProducerMessage::ForkDetected {
                old_fork_hash,
                new_fork_hash,
                block_num,
            } => {
                let Some(producer) = producer else {
                    return self.not_identified(tx).await;
                };
                info!(
                    session,
                    old = %old_fork_hash,
                    new = %new_fork_hash,
                    block = block_num,
                    "producer reported fork divergence"
                );
                self.registry.write().await.on_fork_start(
                    producer,
                    ForkId::new(new_fork_hash),
                    block_num,
                    now_millis(),
                );
                FrameOutcome::Continue
            }

            ProducerMessage::Put {
                fork_hash,
                block_num,
                index,
                path,
                data,
                timestamp: _,
            } => {
                self.append_op(
                    producer,
                    OpKind::Put,
                    fork_hash,
                    block_num,
                    index,
                    path,
                    data.as_ref().map(Payload::json),
                    None,
                    tx,
                )
                .await
            }

            ProducerMessage::Del {
                fork_hash,
                block_num,
                index,
                path,
                timestamp: _,
            } => {
                self.append_op(
                    producer,
                    OpKind::Del,
                    fork_hash,
                    block_num,
                    index,
                    path,
                    None,
                    None,
                    tx,
                )
                .await
            }

            ProducerMessage::WriteMarker {
                fork_hash,
                block_num,
                index,
                timestamp: _,
                prev_checkpoint_hash,
            } => {
                self.append_op(
                    producer,
                    OpKind::WriteMarker,
                    fork_hash,
                    block_num,
                    index,
                    String::new(),
                    None,
                    Some(prev_checkpoint_hash),
                    tx,
                )
                .await
            }

            ProducerMessage::CheckpointNotice {
                fork_hash,
                confirmed_hash,
                block_num,
                matches,
            } => {
                debug!(
                    session,
                    fork = %fork_hash,
                    confirmed = %confirmed_hash,
                    block = block_num,
                    matches,
                    "producer checkpoint observation"
                );
                FrameOutcome::Continue
            }

            ProducerMessage::SendCheckpoint {
                block_num,
                hash,
                prev_hash,
                timestamp,
            } => {
                if producer.is_none() {
                    return self.not_identified(tx).await;
                }
                self.registry.write().await.on_checkpoint(Checkpoint::new(
                    block_num,
                    ForkId::new(hash),
                    ForkId::new(prev_hash),
                    timestamp,
                ));
                FrameOutcome::Continue
            }

            ProducerMessage::SyncStatus { last_index, status } => {
                debug!(session, last_index, %status, "producer sync status");
                let reply = {
                    let registry = self.registry.read().await;
                    let count = producer
                        .as_ref()
                        .and_then(|p| registry.active_fork(p))
                        .and_then(|fork| registry.fork(fork))
                        .map(|f| f.operation_count)
                        .unwrap_or(0);
                    ProducerMessage::SyncStatus {
                        last_index: count,
                        status: "ok".to_string(),
                    }
                };
                let _ = tx.send(Message::text(reply.to_frame())).await;
                FrameOutcome::Continue
            }

            ProducerMessage::Error { error } => {
                warn!(session, %error, "producer reported error");
                FrameOutcome::Continue
            }

            // Server-originated kinds arriving inbound: ignore
            other => {
                debug!(session, kind = ?std::mem::discriminant(&other), "ignoring server-kind frame from producer");
                FrameOutcome::Continue
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn append_op(
        &self,
        producer: &mut Option<ProducerId>,
        kind: OpKind,
        fork_hash: String,
        block_num: u64,
        index: u64,
        path: String,
        data: Option<Payload>,
        prev_checkpoint_hash: Option<String>,
        tx: &mut (impl SinkExt<Message> + Unpin),
    ) -> FrameOutcome {
        let Some(producer) = producer else {
            return self.not_identified(tx).await;
        };

        let op = Operation {
            kind,
            block_num,
            index,
            path,
            data,
            fork: ForkId::new(fork_hash),
            producer: producer.clone(),
            timestamp: now_millis(),
            prev_checkpoint_hash,
        };
        self.registry.write().await.on_operation(producer, op);
        FrameOutcome::Continue
    }

    async fn not_identified(&self, tx: &mut (impl SinkExt<Message> + Unpin)) -> FrameOutcome {
        let frame = ProducerMessage::Error {
            error: "identify before streaming".to_string(),
        };
        let _ = tx.send(Message::text(frame.to_frame())).await;
        FrameOutcome::Continue
    }
}

enum FrameOutcome {
    Continue,
    Close(u16, &'static str),
}

/// Epoch milliseconds from the system clock
pub fn now_millis() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
