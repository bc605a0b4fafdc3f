//! # Gomoku Relay
//!
//! Two-player five-in-a-row match engine played over a message relay.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        GOMOKU RELAY                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  core/             - Shared primitives                       │
//! │  ├── ids.rs        - Peer ids, derived session ids           │
//! │  └── time.rs       - Millisecond timestamps, clock sources   │
//! │                                                              │
//! │  game/             - Match logic (deterministic, no IO)      │
//! │  ├── board.rs      - Grid of marks                           │
//! │  ├── win.rs        - Five-in-a-row detection                 │
//! │  ├── moves.rs      - Move log and replay                     │
//! │  ├── session.rs    - One round between two peers             │
//! │  ├── machine.rs    - Session state machine (pure reducer)    │
//! │  └── clock.rs      - Single-shot turn countdown              │
//! │                                                              │
//! │  network/          - Relay plumbing (non-deterministic)      │
//! │  ├── protocol.rs   - Wire messages                           │
//! │  ├── channel.rs    - PeerChannel seam, loopback relay        │
//! │  ├── coordinator.rs- Drives a machine against a relay        │
//! │  ├── hub.rs        - Peer registry and routing               │
//! │  ├── server.rs     - WebSocket hub                           │
//! │  └── client.rs     - WebSocket client with reconnect         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering
//!
//! Each client runs its own `SessionMachine`. Inputs are applied one at a
//! time; a move and a timeout racing for the same turn are settled by
//! whichever the machine sees first, and the loser is discarded by its
//! turn number or clock generation.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::ids::{PeerId, SessionId};
pub use core::time::{Clock, SystemClock, Timestamp};
pub use game::board::{Board, Mark};
pub use game::machine::{Notice, Phase, SessionConfig, SessionMachine};
pub use game::session::{Outcome, SessionError};
pub use network::coordinator::{Command, SessionCoordinator};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Seconds a player has for one move.
pub const TURN_DURATION_SECS: u64 = 60;

/// Seconds an invitation stays open.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Seconds both players have to agree on a rematch.
pub const REPLAY_WINDOW_SECS: u64 = 30;
