//! Relay Hub
//!
//! Routing core shared by the WebSocket server and the loopback relay.
//! Tracks which peers are known, whether their connection is live, and
//! their busy flag. Delivery is best-effort: a message for a peer that is
//! unknown, offline, or whose outbox is full is dropped.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::ids::PeerId;
use crate::core::time::Timestamp;
use crate::network::protocol::{ClientMessage, ErrorCode, PeerPresence, ServerMessage, WelcomeInfo};

/// Per-connection outbox depth.
pub const OUTBOX_CAPACITY: usize = 256;

/// Identifies one socket of a peer, so a late close of an old socket does
/// not take down its replacement.
pub type ConnectionId = u64;

/// Hub errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// A live connection already uses this id.
    #[error("Peer {0} is already connected")]
    DuplicatePeer(PeerId),

    /// Message from a peer the hub does not know.
    #[error("Peer {0} is not connected")]
    UnknownPeer(PeerId),

    /// `Hello` on an identified connection.
    #[error("Connection already identified")]
    AlreadyIdentified,
}

impl HubError {
    /// Wire error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            HubError::DuplicatePeer(_) => ErrorCode::DuplicatePeer,
            HubError::UnknownPeer(_) => ErrorCode::NotIdentified,
            HubError::AlreadyIdentified => ErrorCode::AlreadyIdentified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connection {
    Connected(ConnectionId),
    Disconnected { since: Timestamp },
}

#[derive(Debug)]
struct PeerSlot {
    outbox: Option<mpsc::Sender<ServerMessage>>,
    connection: Connection,
    busy: bool,
}

/// Peer registry and router.
#[derive(Debug)]
pub struct RelayHub {
    peers: BTreeMap<PeerId, PeerSlot>,
    reconnect_window: Duration,
    next_connection: ConnectionId,
    version: String,
}

impl RelayHub {
    /// Empty hub.
    pub fn new(reconnect_window: Duration) -> Self {
        Self {
            peers: BTreeMap::new(),
            reconnect_window,
            next_connection: 1,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Number of peers with a live connection.
    pub fn connected_count(&self) -> usize {
        self.peers
            .values()
            .filter(|s| matches!(s.connection, Connection::Connected(_)))
            .count()
    }

    /// True if `peer` is known, live or within its reconnect window.
    pub fn is_known(&self, peer: &PeerId) -> bool {
        self.peers.contains_key(peer)
    }

    /// True if `peer` has a live connection.
    pub fn is_connected(&self, peer: &PeerId) -> bool {
        matches!(
            self.peers.get(peer).map(|s| s.connection),
            Some(Connection::Connected(_))
        )
    }

    /// Register a connection for `peer` after its `Hello`.
    ///
    /// Sends `Welcome` to the new connection and announces the peer to
    /// everyone else: `PeerReconnected` inside the reconnect window,
    /// otherwise a plain `Presence`.
    pub fn connect(
        &mut self,
        peer: PeerId,
        outbox: mpsc::Sender<ServerMessage>,
        now: Timestamp,
    ) -> Result<ConnectionId, HubError> {
        let previous = self.peers.get(&peer).map(|s| s.connection);
        let reconnected = match previous {
            Some(Connection::Connected(_)) => return Err(HubError::DuplicatePeer(peer)),
            Some(Connection::Disconnected { since }) => {
                if self.expired(since, now) {
                    self.peers.remove(&peer);
                    self.broadcast(&peer, ServerMessage::PeerDisconnected { peer_id: peer });
                    false
                } else {
                    true
                }
            }
            None => false,
        };

        let id = self.next_connection;
        self.next_connection += 1;

        let welcome = ServerMessage::Welcome(WelcomeInfo {
            peer_id: peer,
            server_version: self.version.clone(),
            peers: self.roster(&peer),
        });
        Self::push(&peer, &outbox, welcome);

        self.peers.insert(
            peer,
            PeerSlot { outbox: Some(outbox), connection: Connection::Connected(id), busy: false },
        );

        if reconnected {
            info!("Peer {} reconnected", peer.short());
            self.broadcast(&peer, ServerMessage::PeerReconnected { peer_id: peer });
        } else {
            info!("Peer {} joined", peer.short());
        }
        self.broadcast(&peer, ServerMessage::Presence { peer_id: peer, busy: false });

        Ok(id)
    }

    /// Socket of `peer` closed. Starts its reconnect window.
    pub fn disconnect(&mut self, peer: &PeerId, connection: ConnectionId, now: Timestamp) {
        match self.peers.get_mut(peer) {
            Some(slot) if slot.connection == Connection::Connected(connection) => {
                slot.outbox = None;
                slot.connection = Connection::Disconnected { since: now };
                debug!("Peer {} lost its connection", peer.short());
            }
            _ => debug!("Ignoring close of stale connection {} for {}", connection, peer.short()),
        }
    }

    /// Forget `peer` now and tell everyone.
    pub fn leave(&mut self, peer: &PeerId) {
        if self.peers.remove(peer).is_some() {
            info!("Peer {} left", peer.short());
            self.broadcast(peer, ServerMessage::PeerDisconnected { peer_id: *peer });
        }
    }

    /// Drop peers whose reconnect window has passed. Returns them.
    pub fn sweep(&mut self, now: Timestamp) -> Vec<PeerId> {
        let expired: Vec<PeerId> = self
            .peers
            .iter()
            .filter_map(|(id, slot)| match slot.connection {
                Connection::Disconnected { since } if self.expired(since, now) => Some(*id),
                _ => None,
            })
            .collect();

        for peer in &expired {
            self.peers.remove(peer);
            info!("Peer {} reconnect window expired", peer.short());
            self.broadcast(peer, ServerMessage::PeerDisconnected { peer_id: *peer });
        }
        expired
    }

    /// Route a message from an identified connection.
    pub fn handle(&mut self, from: PeerId, msg: ClientMessage, now: Timestamp) -> Result<(), HubError> {
        if !self.is_connected(&from) {
            return Err(HubError::UnknownPeer(from));
        }

        match msg {
            ClientMessage::Hello { .. } => return Err(HubError::AlreadyIdentified),
            ClientMessage::Send { to, event } => {
                let name = event.name();
                match self.peers.get(&to).and_then(|s| s.outbox.as_ref()) {
                    Some(outbox) => {
                        debug!("Relaying {} from {} to {}", name, from.short(), to.short());
                        Self::push(&to, outbox, ServerMessage::Deliver { from, event });
                    }
                    None => {
                        debug!("Dropping {} from {}: {} is offline", name, from.short(), to.short());
                    }
                }
            }
            ClientMessage::Presence { busy } => {
                if let Some(slot) = self.peers.get_mut(&from) {
                    slot.busy = busy;
                }
                self.broadcast(&from, ServerMessage::Presence { peer_id: from, busy });
            }
            ClientMessage::Ping { timestamp } => {
                self.send_to(&from, ServerMessage::Pong { timestamp, server_time: now.as_millis() });
            }
            ClientMessage::Leave => self.leave(&from),
        }
        Ok(())
    }

    fn expired(&self, since: Timestamp, now: Timestamp) -> bool {
        now >= since + self.reconnect_window
    }

    fn roster(&self, except: &PeerId) -> Vec<PeerPresence> {
        self.peers
            .iter()
            .filter(|(id, slot)| *id != except && matches!(slot.connection, Connection::Connected(_)))
            .map(|(id, slot)| PeerPresence { peer_id: *id, busy: slot.busy })
            .collect()
    }

    fn send_to(&self, peer: &PeerId, msg: ServerMessage) {
        if let Some(outbox) = self.peers.get(peer).and_then(|s| s.outbox.as_ref()) {
            Self::push(peer, outbox, msg);
        }
    }

    fn broadcast(&self, except: &PeerId, msg: ServerMessage) {
        for (id, slot) in &self.peers {
            if id == except {
                continue;
            }
            if let Some(outbox) = &slot.outbox {
                Self::push(id, outbox, msg.clone());
            }
        }
    }

    fn push(peer: &PeerId, outbox: &mpsc::Sender<ServerMessage>, msg: ServerMessage) {
        if let Err(e) = outbox.try_send(msg) {
            warn!("Dropping message for {}: {}", peer.short(), e);
        }
    }
}
