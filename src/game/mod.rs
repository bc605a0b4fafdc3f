//! Game Logic Module
//!
//! Everything about a match that does not touch the network. No IO and no
//! wall clock: time comes in as a `Timestamp` argument.
//!
//! ## Module Structure
//!
//! - `board`: Grid of marks, bounds and occupancy checks
//! - `win`: Five-in-a-row detection around the last move
//! - `moves`: Move records and replayable move log
//! - `session`: One round between two peers
//! - `machine`: Per-identity session state machine
//! - `clock`: Single-shot turn countdown
//! - `events`: Events exchanged between the two peers' machines

pub mod board;
pub mod clock;
pub mod events;
pub mod machine;
pub mod moves;
pub mod session;
pub mod win;

// Re-export key types
pub use board::{Board, BoardError, Mark};
pub use clock::TurnClock;
pub use events::RelayEvent;
pub use machine::{
    Intent, Notice, Phase, SessionConfig, SessionEvent, SessionMachine, SessionState,
};
pub use moves::{MoveLog, MoveRecord};
pub use session::{MatchSession, MoveResult, Outcome, SessionError};
pub use win::{check_win, Direction, WinningLine, WIN_LENGTH};
