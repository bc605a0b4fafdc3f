//! Protocol Messages
//!
//! Wire format between clients and the relay hub over WebSocket.
//! Text frames carry JSON, binary frames carry bincode. All enums are
//! externally tagged so both encodings work.

use serde::{Deserialize, Serialize};

use crate::core::ids::PeerId;

pub use crate::game::events::RelayEvent;

// =============================================================================
// CLIENT -> HUB MESSAGES
// =============================================================================

/// Messages sent from client to hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    /// Identify this connection. Must be the first frame.
    Hello {
        /// Identity this connection claims.
        peer_id: PeerId,
    },

    /// Relay `event` to `to`.
    Send {
        /// Recipient.
        to: PeerId,
        /// Event to relay.
        event: RelayEvent,
    },

    /// Announce whether this peer is in a match.
    Presence {
        /// True while in a match.
        busy: bool,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client time, echoed back in `Pong`.
        timestamp: u64,
    },

    /// Leave the hub without waiting for the reconnect window.
    Leave,
}

// =============================================================================
// HUB -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from hub to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to `Hello`.
    Welcome(WelcomeInfo),

    /// Event relayed from `from`.
    Deliver {
        /// Sending peer.
        from: PeerId,
        /// What it sent.
        event: RelayEvent,
    },

    /// A peer's busy flag changed, or a peer joined.
    Presence {
        /// Peer the flag belongs to.
        peer_id: PeerId,
        /// True while in a match.
        busy: bool,
    },

    /// A peer's reconnect window expired or it left.
    PeerDisconnected {
        /// Peer that is gone.
        peer_id: PeerId,
    },

    /// A peer came back within its reconnect window.
    PeerReconnected {
        /// Peer that came back.
        peer_id: PeerId,
    },

    /// Pong response.
    Pong {
        /// Echo of the ping's timestamp.
        timestamp: u64,
        /// Hub time in milliseconds.
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Hub is shutting down.
    Shutdown {
        /// Why the hub is going away.
        reason: String,
    },
}

/// Hub greeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeInfo {
    /// Identity the hub registered.
    pub peer_id: PeerId,
    /// Hub version.
    pub server_version: String,
    /// Every other known peer.
    pub peers: Vec<PeerPresence>,
}

/// Presence of one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerPresence {
    /// Peer identifier.
    pub peer_id: PeerId,
    /// In a match.
    pub busy: bool,
}

/// Hub error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Frame could not be parsed.
    InvalidMessage,
    /// A frame other than `Hello` arrived first.
    NotIdentified,
    /// `Hello` repeated on an identified connection.
    AlreadyIdentified,
    /// Another live connection uses this peer id.
    DuplicatePeer,
    /// Connection limit reached.
    ServerFull,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    /// Error frame helper.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError { code, message: message.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_json_shape() {
        let msg = ClientMessage::Send {
            to: PeerId::new([0; 16]),
            event: RelayEvent::Move { x: 70, y: 74, round: 0, turn: 8 },
        };

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"send\""));
        assert!(json.contains("\"move\""));
        assert_eq!(ClientMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_binary_frames_for_tagged_enums() {
        let msg = ServerMessage::Deliver {
            from: PeerId::new([5; 16]),
            event: RelayEvent::RejectPlay { nonce: 3, reason: "busy".to_string() },
        };

        let bytes = msg.to_bytes().unwrap();
        assert_eq!(ServerMessage::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_error_codes() {
        let msg = ServerMessage::error(ErrorCode::NotIdentified, "Send hello first");
        let json = msg.to_json().unwrap();
        assert!(json.contains("not_identified"));
    }

    #[test]
    fn test_unit_variant_json() {
        let json = ClientMessage::Leave.to_json().unwrap();
        assert_eq!(json, "\"leave\"");
        assert!(ClientMessage::from_json("{\"bogus\":1}").is_err());
    }
}
