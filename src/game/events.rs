//! Peer Events
//!
//! Named events one peer's machine sends to the other's. They are plain
//! data; the network layer carries them inside hub frames.

use serde::{Deserialize, Serialize};

/// Named events relayed from one peer to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayEvent {
    /// Invitation to play on a `width` x `height` board.
    RequestPlay {
        /// Requester-chosen id of this invitation.
        nonce: u64,
        /// Board width.
        width: u32,
        /// Board height.
        height: u32,
    },

    /// Invitation `nonce` accepted.
    AcceptPlay {
        /// Invitation being answered.
        nonce: u64,
    },

    /// Invitation `nonce` declined.
    RejectPlay {
        /// Invitation being answered.
        nonce: u64,
        /// Shown to the requester.
        reason: String,
    },

    /// Stone placed.
    Move {
        /// Column.
        x: u32,
        /// Row.
        y: u32,
        /// Round the move belongs to.
        round: u32,
        /// Zero-based move index within the round.
        turn: u32,
    },

    /// The holder of move `turn` ran out of time.
    Timeout {
        /// Round the timeout belongs to.
        round: u32,
        /// Move index that was never played.
        turn: u32,
    },

    /// Willing to play again after `round`.
    OfferReplay {
        /// Round that just ended.
        round: u32,
    },

    /// Not playing another round after `round`.
    DeclineReplay {
        /// Round that just ended.
        round: u32,
    },
}

impl RelayEvent {
    /// Event name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            RelayEvent::RequestPlay { .. } => "request_play",
            RelayEvent::AcceptPlay { .. } => "accept_play",
            RelayEvent::RejectPlay { .. } => "reject_play",
            RelayEvent::Move { .. } => "move",
            RelayEvent::Timeout { .. } => "timeout",
            RelayEvent::OfferReplay { .. } => "offer_replay",
            RelayEvent::DeclineReplay { .. } => "decline_replay",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(RelayEvent::Timeout { round: 0, turn: 0 }.name(), "timeout");
        assert_eq!(RelayEvent::OfferReplay { round: 1 }.name(), "offer_replay");
    }

    #[test]
    fn test_move_carries_round() {
        let json = serde_json::to_string(&RelayEvent::Move { x: 3, y: 4, round: 2, turn: 9 }).unwrap();
        assert!(json.contains("\"round\":2"));
        assert!(json.contains("\"turn\":9"));
    }
}
