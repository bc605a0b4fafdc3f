//! Peer Channel
//!
//! What the session layer needs from a relay: fire-and-forget sends to a
//! peer, a busy flag, and a stream of `Inbound` signals delivered in relay
//! order. `WsChannel` (see `client`) talks to a remote hub; the loopback
//! relay here runs a `RelayHub` in-process.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::ids::PeerId;
use crate::core::time::Clock;
use crate::network::hub::{ConnectionId, HubError, RelayHub, OUTBOX_CAPACITY};
use crate::network::protocol::{ClientMessage, PeerPresence, RelayEvent, ServerMessage};

/// Channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The relay connection is gone.
    #[error("Channel closed")]
    Closed,

    /// The outgoing queue is full.
    #[error("Outgoing queue full")]
    Full,

    /// The hub refused the message.
    #[error("Hub error: {0}")]
    Hub(#[from] HubError),
}

/// Outbound half of a relay connection.
pub trait PeerChannel {
    /// Local identity on the relay.
    fn local(&self) -> PeerId;

    /// Relay `event` to `to`. Best-effort.
    fn send(&self, to: PeerId, event: RelayEvent) -> Result<(), ChannelError>;

    /// Publish the local busy flag.
    fn update_presence(&self, busy: bool) -> Result<(), ChannelError>;
}

/// Signals from the relay, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Event relayed from a peer.
    Event {
        /// Sending peer.
        from: PeerId,
        /// What it sent.
        event: RelayEvent,
    },
    /// Presence of every peer online when we joined.
    Roster(Vec<PeerPresence>),
    /// A peer's busy flag.
    Presence {
        /// Peer the flag belongs to.
        peer: PeerId,
        /// True while in a match.
        busy: bool,
    },
    /// A peer is gone for good.
    PeerDisconnected(PeerId),
    /// A peer came back on a new connection.
    PeerReconnected(PeerId),
    /// Our own connection dropped.
    Disconnected,
    /// Our own connection is back.
    Reconnected,
}

impl Inbound {
    /// Translate a hub frame. Frames the session layer has no use for
    /// (pong, errors, shutdown) map to `None`.
    pub fn from_server(msg: ServerMessage) -> Option<Self> {
        match msg {
            ServerMessage::Welcome(info) => Some(Inbound::Roster(info.peers)),
            ServerMessage::Deliver { from, event } => Some(Inbound::Event { from, event }),
            ServerMessage::Presence { peer_id, busy } => Some(Inbound::Presence { peer: peer_id, busy }),
            ServerMessage::PeerDisconnected { peer_id } => Some(Inbound::PeerDisconnected(peer_id)),
            ServerMessage::PeerReconnected { peer_id } => Some(Inbound::PeerReconnected(peer_id)),
            ServerMessage::Error(e) => {
                warn!("Hub error {:?}: {}", e.code, e.message);
                None
            }
            ServerMessage::Shutdown { reason } => {
                warn!("Hub shutting down: {}", reason);
                None
            }
            ServerMessage::Pong { .. } => None,
        }
    }
}

// =============================================================================
// LOOPBACK RELAY
// =============================================================================

/// In-process relay for tests and local play.
#[derive(Clone)]
pub struct LoopbackHub {
    hub: Arc<Mutex<RelayHub>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl LoopbackHub {
    /// Hub with the given reconnect window, reading time from `clock`.
    pub fn new(reconnect_window: Duration, clock: impl Clock + Send + Sync + 'static) -> Self {
        Self {
            hub: Arc::new(Mutex::new(RelayHub::new(reconnect_window))),
            clock: Arc::new(clock),
        }
    }

    /// Connect `peer`. Must be called within a Tokio runtime.
    pub fn join(&self, peer: PeerId) -> Result<(LoopbackChannel, mpsc::Receiver<Inbound>), ChannelError> {
        let (outbox_tx, mut outbox_rx) = mpsc::channel::<ServerMessage>(OUTBOX_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<Inbound>(OUTBOX_CAPACITY);

        let connection = {
            let mut hub = self.hub.lock().map_err(|_| ChannelError::Closed)?;
            hub.connect(peer, outbox_tx, self.clock.now())?
        };

        // The hub drops the outbox on disconnect, which ends this task
        tokio::spawn(async move {
            while let Some(msg) = outbox_rx.recv().await {
                if let Some(inbound) = Inbound::from_server(msg) {
                    if inbound_tx.send(inbound).await.is_err() {
                        return;
                    }
                }
            }
            let _ = inbound_tx.send(Inbound::Disconnected).await;
        });

        let channel = LoopbackChannel { peer, connection, hub: self.hub.clone(), clock: self.clock.clone() };
        Ok((channel, inbound_rx))
    }

    /// Simulate socket loss for `channel`'s peer.
    pub fn drop_connection(&self, channel: &LoopbackChannel) {
        if let Ok(mut hub) = self.hub.lock() {
            hub.disconnect(&channel.peer, channel.connection, self.clock.now());
        }
    }

    /// Expire reconnect windows.
    pub fn sweep(&self) -> Vec<PeerId> {
        match self.hub.lock() {
            Ok(mut hub) => hub.sweep(self.clock.now()),
            Err(_) => Vec::new(),
        }
    }

    /// Peers with a live connection.
    pub fn connected_count(&self) -> usize {
        self.hub.lock().map(|hub| hub.connected_count()).unwrap_or(0)
    }
}

/// A peer's connection to a `LoopbackHub`.
#[derive(Clone)]
pub struct LoopbackChannel {
    peer: PeerId,
    connection: ConnectionId,
    hub: Arc<Mutex<RelayHub>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl LoopbackChannel {
    fn submit(&self, msg: ClientMessage) -> Result<(), ChannelError> {
        let mut hub = self.hub.lock().map_err(|_| ChannelError::Closed)?;
        if !hub.is_connected(&self.peer) {
            debug!("Loopback peer {} is offline, dropping frame", self.peer.short());
            return Err(ChannelError::Closed);
        }
        hub.handle(self.peer, msg, self.clock.now())?;
        Ok(())
    }

    /// Leave the hub.
    pub fn leave(&self) -> Result<(), ChannelError> {
        self.submit(ClientMessage::Leave)
    }
}

impl PeerChannel for LoopbackChannel {
    fn local(&self) -> PeerId {
        self.peer
    }

    fn send(&self, to: PeerId, event: RelayEvent) -> Result<(), ChannelError> {
        self.submit(ClientMessage::Send { to, event })
    }

    fn update_presence(&self, busy: bool) -> Result<(), ChannelError> {
        self.submit(ClientMessage::Presence { busy })
    }
}
