//! Network Layer
//!
//! Relay plumbing around the deterministic `game/` core. This layer is
//! **non-deterministic**: sockets, tasks and wall-clock timers live here.
//!
//! - `protocol`: Wire messages between clients and the hub
//! - `channel`: `PeerChannel` seam and the in-process loopback relay
//! - `coordinator`: Feeds relay signals into a `SessionMachine`
//! - `hub`: Peer registry and routing
//! - `server`: WebSocket front end for the hub
//! - `client`: WebSocket connection to a hub with reconnect

pub mod channel;
pub mod client;
pub mod coordinator;
pub mod hub;
pub mod protocol;
pub mod server;

pub use channel::{ChannelError, Inbound, LoopbackChannel, LoopbackHub, PeerChannel};
pub use client::{connect, ClientConfig, ClientError, WsChannel};
pub use coordinator::{Command, SessionCoordinator};
pub use hub::{HubError, RelayHub};
pub use protocol::{ClientMessage, ErrorCode, RelayEvent, ServerError, ServerMessage};
pub use server::{RelayServer, RelayServerError, ServerConfig};
