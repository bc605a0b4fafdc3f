//! Core primitives.
//!
//! Identifiers and the time source shared by the deterministic match logic
//! and the network layer.

pub mod ids;
pub mod time;

// Re-export core types
pub use ids::{derive_session_id, PeerId, SessionId};
pub use time::{Clock, ManualClock, SystemClock, Timestamp};
