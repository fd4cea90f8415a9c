// Producer authentication - Challenge/response over account signatures
//
// When authentication is enabled, a connecting producer receives a one-time
// challenge and must answer with an ed25519 signature over the SHA-256 of a
// message that JSON-contains that exact challenge. Account keys come from an
// external identity registry; the sidecar only verifies.

use crate::session::message::Challenge;
use crate::types::Timestamp;
use async_trait::async_trait;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::Rng;
use sha2::{Digest as _, Sha256};
use std::collections::HashMap;
use std::time::Duration;

/// Window a producer has to answer the challenge
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(30);

/// WebSocket close code for auth failures (policy violation)
pub const AUTH_CLOSE_CODE: u16 = 1008;

/// Authentication errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("account not authorized: {0}")]
    Unauthorized(String),

    #[error("account unknown to identity registry: {0}")]
    UnknownAccount(String),

    #[error("challenge missing from signed message")]
    ChallengeMismatch,

    #[error("invalid signature encoding: {0}")]
    MalformedSignature(String),

    #[error("signature verification failed")]
    BadSignature,

    #[error("challenge expired")]
    Expired,

    #[error("identity registry error: {0}")]
    Registry(String),
}

/// External identity registry: resolves an account to its active-auth key.
/// Key custody and rotation live outside the sidecar.
#[async_trait]
pub trait IdentityRegistry: Send + Sync {
    async fn active_key(&self, account: &str) -> Result<VerifyingKey, AuthError>;
}

/// Registry backed by a static account→key table (configuration/tests)
#[derive(Default)]
pub struct StaticIdentityRegistry {
    keys: HashMap<String, VerifyingKey>,
}

impl StaticIdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, account: impl Into<String>, key: VerifyingKey) {
        self.keys.insert(account.into(), key);
    }
}

#[async_trait]
impl IdentityRegistry for StaticIdentityRegistry {
    async fn active_key(&self, account: &str) -> Result<VerifyingKey, AuthError> {
        self.keys
            .get(account)
            .copied()
            .ok_or_else(|| AuthError::UnknownAccount(account.to_string()))
    }
}

/// Verifies producer auth responses against a pending challenge
pub struct AuthVerifier {
    registry: std::sync::Arc<dyn IdentityRegistry>,

    /// Lowercase account allowlist; empty means any known account
    authorized_accounts: Vec<String>,
}

impl AuthVerifier {
    pub fn new(
        registry: std::sync::Arc<dyn IdentityRegistry>,
        authorized_accounts: Vec<String>,
    ) -> Self {
        Self {
            registry,
            authorized_accounts,
        }
    }

    /// Mint a fresh challenge for a new connection
    pub fn make_challenge(&self, node_id: &str, now: Timestamp) -> Challenge {
        let nonce: [u8; 16] = rand::thread_rng().gen();
        Challenge {
            nonce: hex::encode(nonce),
            timestamp: now,
            node_id: node_id.to_string(),
        }
    }

    /// Verify an auth_response against the challenge handed to this session.
    ///
    /// The signed `message` must JSON-contain the exact challenge; the
    /// signature is checked over sha256(message) with the account's active
    /// key from the identity registry.
    pub async fn verify(
        &self,
        account: &str,
        signature_hex: &str,
        message: &str,
        expected: &Challenge,
    ) -> Result<(), AuthError> {
        let account = account.to_lowercase();

        if !self.authorized_accounts.is_empty()
            && !self.authorized_accounts.iter().any(|a| a == &account)
        {
            return Err(AuthError::Unauthorized(account));
        }

        if !message_contains_challenge(message, expected) {
            return Err(AuthError::ChallengeMismatch);
        }

        let key = self.registry.active_key(&account).await?;

        let sig_bytes = hex::decode(signature_hex)
            .map_err(|e| AuthError::MalformedSignature(e.to_string()))?;
        let sig_bytes: [u8; 64] = sig_bytes
            .try_into()
            .map_err(|_| AuthError::MalformedSignature("expected 64 bytes".to_string()))?;
        let signature = Signature::from_bytes(&sig_bytes);

        let digest = Sha256::digest(message.as_bytes());
        key.verify(&digest, &signature)
            .map_err(|_| AuthError::BadSignature)
    }
}

/// The signed message is JSON and must embed the original challenge fields
fn message_contains_challenge(message: &str, expected: &Challenge) -> bool {
    let parsed: serde_json::Value = match serde_json::from_str(message) {
        Ok(v) => v,
        Err(_) => return false,
    };
    let embedded = parsed.get("challenge").unwrap_or(&parsed);
    embedded.get("nonce").and_then(|v| v.as_str()) == Some(expected.nonce.as_str())
        && embedded.get("timestamp").and_then(|v| v.as_u64()) == Some(expected.timestamp)
        && embedded.get("nodeId").and_then(|v| v.as_str()) == Some(expected.node_id.as_str())
}
