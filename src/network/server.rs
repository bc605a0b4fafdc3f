//! WebSocket Relay Server
//!
//! Async WebSocket front end for `RelayHub`. One task per connection reads
//! frames, a paired task writes the connection's outbox, and a background
//! task sweeps expired reconnect windows.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::core::ids::PeerId;
use crate::core::time::{Clock, SystemClock};
use crate::network::hub::{ConnectionId, RelayHub, OUTBOX_CAPACITY};
use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// How long a dropped peer keeps its identity.
    pub reconnect_window: Duration,
    /// Interval between reconnect window sweeps.
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            reconnect_window: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: std::env::var("GOMOKU_BIND_ADDR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind_addr),
            max_connections: std::env::var("GOMOKU_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
            reconnect_window: std::env::var("GOMOKU_RECONNECT_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconnect_window),
            sweep_interval: defaults.sweep_interval,
        }
    }
}

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayServerError {
    /// Failed to bind or query the listener.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// State shared by connection tasks.
#[derive(Clone)]
struct Shared {
    hub: Arc<RwLock<RelayHub>>,
    connections: Arc<AtomicUsize>,
    clock: SystemClock,
    max_connections: usize,
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    listener: TcpListener,
    shared: Shared,
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Bind the listener. Use port 0 to pick a free port.
    pub async fn bind(config: ServerConfig) -> Result<Self, RelayServerError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let (shutdown_tx, _) = broadcast::channel(1);

        let shared = Shared {
            hub: Arc::new(RwLock::new(RelayHub::new(config.reconnect_window))),
            connections: Arc::new(AtomicUsize::new(0)),
            clock: SystemClock::new(),
            max_connections: config.max_connections,
        };

        Ok(Self { config, listener, shared, shutdown_tx })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr, RelayServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` is called.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), RelayServerError> {
        info!("Relay server listening on {}", self.local_addr()?);

        let sweep_shared = self.shared.clone();
        let sweep_every = self.config.sweep_interval;
        let sweep_handle = tokio::spawn(async move {
            Self::run_sweep_loop(sweep_shared, sweep_every).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        sweep_handle.abort();
        Ok(())
    }

    /// Stop accepting and tell connected peers.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Open connections, identified or not.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Peers with a live connection.
    pub async fn peer_count(&self) -> usize {
        self.shared.hub.read().await.connected_count()
    }

    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let shared = self.shared.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();

            let open = shared.connections.fetch_add(1, Ordering::SeqCst) + 1;
            if open > shared.max_connections {
                warn!("Connection limit reached, rejecting {}", addr);
                let refusal = ServerMessage::error(ErrorCode::ServerFull, "Connection limit reached");
                if let Ok(text) = refusal.to_json() {
                    let _ = ws_sender.send(Message::Text(text)).await;
                }
                let _ = ws_sender.close().await;
                shared.connections.fetch_sub(1, Ordering::SeqCst);
                return;
            }

            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(OUTBOX_CAPACITY);

            // Writes the outbox until every sender is gone
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            let mut identity: Option<(PeerId, ConnectionId)> = None;

            loop {
                tokio::select! {
                    frame = ws_receiver.next() => {
                        let client_msg = match frame {
                            Some(Ok(Message::Text(text))) => ClientMessage::from_json(&text).ok(),
                            Some(Ok(Message::Binary(data))) => ClientMessage::from_bytes(&data).ok(),
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} closed", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            // Ping/pong frames are answered by tungstenite
                            Some(Ok(_)) => continue,
                        };

                        let Some(client_msg) = client_msg else {
                            debug!("Invalid message from {}", addr);
                            let _ = msg_tx.try_send(ServerMessage::error(
                                ErrorCode::InvalidMessage,
                                "Invalid message format",
                            ));
                            continue;
                        };

                        if !Self::handle_client_message(&shared, addr, client_msg, &mut identity, &msg_tx).await {
                            break;
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.try_send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        });
                        break;
                    }
                }
            }

            if let Some((peer, connection)) = identity {
                shared.hub.write().await.disconnect(&peer, connection, shared.clock.now());
            }
            shared.connections.fetch_sub(1, Ordering::SeqCst);

            // Let queued frames (e.g. shutdown) drain before closing
            drop(msg_tx);
            if tokio::time::timeout(Duration::from_secs(1), sender_task).await.is_err() {
                debug!("Writer for {} did not drain in time", addr);
            }

            info!("Client {} cleaned up", addr);
        });
    }

    /// Handle one frame. Returns false when the connection should close.
    async fn handle_client_message(
        shared: &Shared,
        addr: SocketAddr,
        msg: ClientMessage,
        identity: &mut Option<(PeerId, ConnectionId)>,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> bool {
        let now = shared.clock.now();

        let (peer, msg) = match (*identity, msg) {
            (None, ClientMessage::Hello { peer_id }) => {
                let result = shared.hub.write().await.connect(peer_id, sender.clone(), now);
                match result {
                    Ok(connection) => {
                        debug!("Client {} identified as {}", addr, peer_id.short());
                        *identity = Some((peer_id, connection));
                    }
                    Err(e) => {
                        warn!("Refused hello from {}: {}", addr, e);
                        let _ = sender.try_send(ServerMessage::error(e.code(), e.to_string()));
                    }
                }
                return true;
            }
            (None, _) => {
                let _ = sender.try_send(ServerMessage::error(ErrorCode::NotIdentified, "Send hello first"));
                return true;
            }
            (Some((peer, _)), ClientMessage::Leave) => {
                shared.hub.write().await.leave(&peer);
                *identity = None;
                return false;
            }
            (Some((peer, _)), msg) => (peer, msg),
        };

        if let Err(e) = shared.hub.write().await.handle(peer, msg, now) {
            debug!("Hub refused frame from {}: {}", peer.short(), e);
            let _ = sender.try_send(ServerMessage::error(e.code(), e.to_string()));
        }
        true
    }

    async fn run_sweep_loop(shared: Shared, every: Duration) {
        let mut interval = interval(every);

        loop {
            interval.tick().await;
            let expired = shared.hub.write().await.sweep(shared.clock.now());
            if !expired.is_empty() {
                debug!("Swept {} expired peers", expired.len());
            }
        }
    }
}
