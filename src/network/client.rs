//! WebSocket Relay Client
//!
//! Connects a local identity to a relay hub. `connect` returns a
//! `WsChannel` for sending and a receiver of `Inbound` signals. A driver
//! task owns the socket and reconnects on loss; frames queued while
//! offline are discarded, since the session they belonged to is gone.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::core::ids::PeerId;
use crate::network::channel::{ChannelError, Inbound, PeerChannel};
use crate::network::hub::OUTBOX_CAPACITY;
use crate::network::protocol::{ClientMessage, ErrorCode, RelayEvent, ServerMessage, WelcomeInfo};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Hub URL, e.g. `ws://127.0.0.1:8080`.
    pub server_url: String,
    /// Identity announced in `Hello`.
    pub peer_id: PeerId,
    /// Reconnect attempts after a loss before giving up.
    pub max_reconnect_attempts: u32,
    /// Delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Time allowed for the hub to answer `Hello`.
    pub handshake_timeout: Duration,
}

impl ClientConfig {
    /// Defaults for `peer_id`.
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            server_url: "ws://127.0.0.1:8080".to_string(),
            peer_id,
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(1000),
            handshake_timeout: Duration::from_secs(10),
        }
    }

    /// Create config from environment variables.
    pub fn from_env(peer_id: PeerId) -> Self {
        let defaults = Self::new(peer_id);

        Self {
            server_url: std::env::var("GOMOKU_SERVER_URL").unwrap_or(defaults.server_url),
            max_reconnect_attempts: std::env::var("GOMOKU_RECONNECT_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_reconnect_attempts),
            reconnect_delay: std::env::var("GOMOKU_RECONNECT_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_delay),
            ..defaults
        }
    }
}

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Socket or handshake failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Frame could not be encoded.
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Hub answered `Hello` with an error.
    #[error("Hub refused hello ({code:?}): {message}")]
    Refused {
        /// Wire error code.
        code: ErrorCode,
        /// Hub's description.
        message: String,
    },

    /// Hub closed or went quiet before `Welcome`.
    #[error("Hub did not answer hello")]
    NoWelcome,
}

/// Sending half of a hub connection.
#[derive(Debug, Clone)]
pub struct WsChannel {
    peer_id: PeerId,
    outgoing: mpsc::Sender<ClientMessage>,
}

impl WsChannel {
    fn submit(&self, msg: ClientMessage) -> Result<(), ChannelError> {
        self.outgoing.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::Full,
            mpsc::error::TrySendError::Closed(_) => ChannelError::Closed,
        })
    }

    /// Measure round trip; the `Pong` is logged by the driver.
    pub fn ping(&self, timestamp: u64) -> Result<(), ChannelError> {
        self.submit(ClientMessage::Ping { timestamp })
    }

    /// Leave the hub without waiting out the reconnect window.
    pub fn leave(&self) -> Result<(), ChannelError> {
        self.submit(ClientMessage::Leave)
    }
}

impl PeerChannel for WsChannel {
    fn local(&self) -> PeerId {
        self.peer_id
    }

    fn send(&self, to: PeerId, event: RelayEvent) -> Result<(), ChannelError> {
        self.submit(ClientMessage::Send { to, event })
    }

    fn update_presence(&self, busy: bool) -> Result<(), ChannelError> {
        self.submit(ClientMessage::Presence { busy })
    }
}

/// Connect to the hub and start the driver task.
///
/// The first connection must succeed; later losses are retried in the
/// background.
pub async fn connect(config: ClientConfig) -> Result<(WsChannel, mpsc::Receiver<Inbound>), ClientError> {
    let (ws, welcome) = handshake(&config).await?;
    info!("Connected to {} as {}", config.server_url, config.peer_id.short());

    let (outgoing_tx, outgoing_rx) = mpsc::channel::<ClientMessage>(OUTBOX_CAPACITY);
    let (inbound_tx, inbound_rx) = mpsc::channel::<Inbound>(OUTBOX_CAPACITY);

    // Fresh channel, cannot be full
    let _ = inbound_tx.try_send(Inbound::Roster(welcome.peers));

    let channel = WsChannel { peer_id: config.peer_id, outgoing: outgoing_tx };
    tokio::spawn(drive(config, ws, outgoing_rx, inbound_tx));

    Ok((channel, inbound_rx))
}

/// Open a socket, say hello, and wait for the welcome.
async fn handshake(config: &ClientConfig) -> Result<(WsStream, WelcomeInfo), ClientError> {
    let (mut ws, _) = connect_async(config.server_url.as_str()).await?;

    let hello = ClientMessage::Hello { peer_id: config.peer_id }.to_json()?;
    ws.send(Message::Text(hello)).await?;

    let welcome = tokio::time::timeout(config.handshake_timeout, async {
        while let Some(frame) = ws.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => return Err(ClientError::from(e)),
            };
            match decode(frame) {
                Some(ServerMessage::Welcome(info)) => return Ok(info),
                Some(ServerMessage::Error(e)) => {
                    return Err(ClientError::Refused { code: e.code, message: e.message })
                }
                _ => {}
            }
        }
        Err(ClientError::NoWelcome)
    })
    .await
    .map_err(|_| ClientError::NoWelcome)??;

    Ok((ws, welcome))
}

fn decode(frame: Message) -> Option<ServerMessage> {
    match frame {
        Message::Text(text) => ServerMessage::from_json(&text).ok(),
        Message::Binary(data) => ServerMessage::from_bytes(&data).ok(),
        _ => None,
    }
}

enum Exit {
    /// Local side is gone; stop for good.
    Closed,
    /// Socket dropped; try to reconnect.
    Lost,
}

async fn drive(
    config: ClientConfig,
    mut ws: WsStream,
    mut outgoing: mpsc::Receiver<ClientMessage>,
    inbound: mpsc::Sender<Inbound>,
) {
    loop {
        if let Exit::Closed = pump(ws, &mut outgoing, &inbound).await {
            debug!("Client driver for {} stopped", config.peer_id.short());
            return;
        }

        warn!("Lost connection to {}", config.server_url);
        if inbound.send(Inbound::Disconnected).await.is_err() {
            return;
        }

        ws = match reconnect(&config, &mut outgoing).await {
            Some((stream, welcome)) => {
                info!("Reconnected to {}", config.server_url);
                if inbound.send(Inbound::Reconnected).await.is_err()
                    || inbound.send(Inbound::Roster(welcome.peers)).await.is_err()
                {
                    return;
                }
                stream
            }
            None => {
                warn!(
                    "Giving up on {} after {} attempts",
                    config.server_url, config.max_reconnect_attempts
                );
                return;
            }
        };
    }
}

async fn reconnect(
    config: &ClientConfig,
    outgoing: &mut mpsc::Receiver<ClientMessage>,
) -> Option<(WsStream, WelcomeInfo)> {
    for attempt in 1..=config.max_reconnect_attempts {
        tokio::time::sleep(config.reconnect_delay).await;

        let mut discarded = 0;
        while outgoing.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!("Discarded {} frames queued while offline", discarded);
        }

        match handshake(config).await {
            Ok(connected) => return Some(connected),
            Err(e) => warn!("Reconnect attempt {} failed: {}", attempt, e),
        }
    }
    None
}

/// Move frames both ways until the socket or the local side closes.
async fn pump(
    ws: WsStream,
    outgoing: &mut mpsc::Receiver<ClientMessage>,
    inbound: &mpsc::Sender<Inbound>,
) -> Exit {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            frame = stream.next() => {
                let msg = match frame {
                    Some(Ok(frame)) => decode(frame),
                    Some(Err(e)) => {
                        debug!("Socket error: {}", e);
                        return Exit::Lost;
                    }
                    None => return Exit::Lost,
                };

                match msg {
                    Some(ServerMessage::Pong { timestamp, server_time }) => {
                        debug!("Pong {} (hub time {})", timestamp, server_time);
                    }
                    Some(msg) => {
                        if let Some(signal) = Inbound::from_server(msg) {
                            if inbound.send(signal).await.is_err() {
                                let _ = sink.close().await;
                                return Exit::Closed;
                            }
                        }
                    }
                    None => {}
                }
            }
            msg = outgoing.recv() => {
                let Some(msg) = msg else {
                    let _ = sink.close().await;
                    return Exit::Closed;
                };
                let leaving = matches!(msg, ClientMessage::Leave);
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    return Exit::Lost;
                }
                if leaving {
                    let _ = sink.close().await;
                    return Exit::Closed;
                }
            }
        }
    }
}
