// Producer protocol - Text JSON frames, one message per frame
//
// The producer WebSocket speaks a tagged JSON protocol: every frame is one
// object with a "type" field. Field names on the wire are camelCase.

use crate::types::{BlockNumber, Timestamp};
use serde::{Deserialize, Serialize};

/// Authentication challenge sent inside `auth_required`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub nonce: String,
    pub timestamp: Timestamp,
    pub node_id: String,
}

/// Messages exchanged with a producer, tagged by "type"
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProducerMessage {
    /// server→producer greeting
    #[serde(rename = "welcome", rename_all = "camelCase")]
    Welcome { node_id: String, timestamp: Timestamp },

    /// server→producer when authentication is enabled
    #[serde(rename = "auth_required")]
    AuthRequired { challenge: Challenge },

    /// producer→server: signature over sha256(message); message must
    /// JSON-contain the exact challenge previously sent
    #[serde(rename = "auth_response")]
    AuthResponse {
        account: String,
        signature: String,
        message: String,
    },

    #[serde(rename = "auth_success")]
    AuthSuccess { account: String },

    #[serde(rename = "auth_failed")]
    AuthFailed { error: String },

    /// producer→server self-identification
    #[serde(rename = "identify")]
    Identify {
        source: String,
        version: String,
        prefix: String,
        token: String,
    },

    /// server→producer acknowledgement of identify
    #[serde(rename = "ack")]
    Ack { token: String },

    #[serde(rename = "fork_start", rename_all = "camelCase")]
    ForkStart {
        fork_hash: String,
        block_num: BlockNumber,
        timestamp: Timestamp,
    },

    /// Producer-side notice that it moved off a fork
    #[serde(rename = "fork_detected", rename_all = "camelCase")]
    ForkDetected {
        old_fork_hash: String,
        new_fork_hash: String,
        block_num: BlockNumber,
    },

    #[serde(rename = "put", rename_all = "camelCase")]
    Put {
        fork_hash: String,
        block_num: BlockNumber,
        index: u64,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        timestamp: Timestamp,
    },

    #[serde(rename = "del", rename_all = "camelCase")]
    Del {
        fork_hash: String,
        block_num: BlockNumber,
        index: u64,
        path: String,
        timestamp: Timestamp,
    },

    #[serde(rename = "write_marker", rename_all = "camelCase")]
    WriteMarker {
        fork_hash: String,
        block_num: BlockNumber,
        index: u64,
        timestamp: Timestamp,
        prev_checkpoint_hash: String,
    },

    /// Producer-local checkpoint observation (informational)
    #[serde(rename = "checkpoint", rename_all = "camelCase")]
    CheckpointNotice {
        fork_hash: String,
        confirmed_hash: String,
        block_num: BlockNumber,
        matches: bool,
    },

    /// Consensus checkpoint carrying the confirmed block hash
    #[serde(rename = "sendCheckpoint", rename_all = "camelCase")]
    SendCheckpoint {
        block_num: BlockNumber,
        hash: String,
        prev_hash: String,
        timestamp: Timestamp,
    },

    #[serde(rename = "sync_status", rename_all = "camelCase")]
    SyncStatus { last_index: u64, status: String },

    #[serde(rename = "error")]
    Error { error: String },
}

impl ProducerMessage {
    /// Serialize to a single text frame
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","error":"serialization failure"}"#.to_string()
        })
    }
}
