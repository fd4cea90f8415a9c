// Honeygraph primitives - Minimal foundational types
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fork identity: the producer's deterministic pending-hash of its
/// not-yet-written operations. Opaque to the sidecar; only compared
/// for equality against checkpoint hashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForkId(String);

impl ForkId {
    pub fn new(hash: impl Into<String>) -> Self {
        ForkId(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ForkId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Hashes are long; show a readable prefix
        if self.0.len() > 12 {
            write!(f, "{}..", &self.0[..12])
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<&str> for ForkId {
    fn from(s: &str) -> Self {
        ForkId(s.to_string())
    }
}

/// Producer identity: the upstream consensus node feeding this sidecar.
/// Account names are lowercase by convention; comparisons are exact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProducerId(String);

impl ProducerId {
    pub fn new(id: impl Into<String>) -> Self {
        ProducerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProducerId {
    fn from(s: &str) -> Self {
        ProducerId(s.to_string())
    }
}

/// Block height on the producer chain
pub type BlockNumber = u64;

/// Wire timestamps are Unix epoch milliseconds (producer clocks)
pub type Timestamp = u64;

/// 32-byte content digest (Blake3), used for idempotency keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest([u8; 32]);

impl Digest {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Digest(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Digest arbitrary data with Blake3
    pub fn hash(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        Digest(*hash.as_bytes())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}
