//! Peer and Session Identifiers
//!
//! Peers are UUIDs handed out by whoever runs the client. Session ids are
//! derived, never generated, so both ends of a match compute the same id
//! from data they already share.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Unique session identifier.
pub type SessionId = [u8; 16];

/// Identifier of a relay peer (one connected client).
///
/// Implements Ord so crossed requests can be tie-broken the same way on
/// both clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(uuid::Uuid);

impl PeerId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(bytes))
    }

    /// Generate a fresh random id.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(Self)
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        self.0.to_string()
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// First four bytes as hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.as_bytes()[..4])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derive the session id for a match from the request that created it.
///
/// Both peers know `requester`, `target` and the request `nonce`, so they
/// agree on the id without exchanging it.
pub fn derive_session_id(requester: &PeerId, target: &PeerId, nonce: u64) -> SessionId {
    let mut hasher = Sha256::new();

    // Domain separator
    hasher.update(b"GOMOKU_SESSION_V1");
    hasher.update(requester.as_bytes());
    hasher.update(target.as_bytes());
    hasher.update(nonce.to_le_bytes());

    let digest = hasher.finalize();
    let mut id = [0u8; 16];
    id.copy_from_slice(&digest[..16]);
    id
}
