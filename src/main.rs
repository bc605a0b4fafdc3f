//! Gomoku Relay
//!
//! `gomoku-relay [serve]` runs the relay hub.
//! `gomoku-relay demo` plays a scripted match over an in-process relay.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gomoku::{
    game::machine::{Notice, SessionConfig, SessionMachine},
    network::{
        channel::{LoopbackChannel, LoopbackHub},
        server::{RelayServer, ServerConfig},
        Command, SessionCoordinator,
    },
    PeerId, SystemClock, VERSION,
};

type DemoCoordinator = SessionCoordinator<LoopbackChannel, SystemClock>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Gomoku Relay v{}", VERSION);

    match std::env::args().nth(1).as_deref() {
        None | Some("serve") => serve().await,
        Some("demo") => demo().await,
        Some(other) => bail!("Unknown mode '{}', expected 'serve' or 'demo'", other),
    }
}

async fn serve() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    info!("Max connections: {}", config.max_connections);
    info!("Reconnect window: {}s", config.reconnect_window.as_secs());

    let server = Arc::new(RelayServer::bind(config).await.context("Failed to start relay")?);
    let runner = server.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
    server.shutdown();
    handle.await??;

    info!("Relay stopped");
    Ok(())
}

/// A player driven by the demo script.
struct Player {
    name: &'static str,
    peer: PeerId,
    commands: mpsc::Sender<Command>,
    notices: mpsc::Receiver<Notice>,
    task: tokio::task::JoinHandle<DemoCoordinator>,
}

impl Player {
    fn spawn(name: &'static str, hub: &LoopbackHub, peer: PeerId) -> anyhow::Result<Self> {
        let (channel, inbound) = hub.join(peer)?;
        let (commands, command_rx) = mpsc::channel(16);
        let (notice_tx, notices) = mpsc::channel(64);

        let machine = SessionMachine::new(peer, SessionConfig::from_env());
        let coordinator = SessionCoordinator::new(machine, channel, SystemClock::new());
        let task = tokio::spawn(coordinator.run(inbound, command_rx, notice_tx));

        info!("{} is {}", name, peer.short());
        Ok(Self { name, peer, commands, notices, task })
    }

    async fn command(&self, command: Command) -> anyhow::Result<()> {
        self.commands.send(command).await.context("Coordinator stopped")
    }

    /// Wait for the first notice matching `wanted`, logging the ones before it.
    async fn expect(&mut self, wanted: impl Fn(&Notice) -> bool) -> anyhow::Result<Notice> {
        loop {
            let notice = tokio::time::timeout(Duration::from_secs(5), self.notices.recv())
                .await
                .context("Timed out waiting for a notice")?
                .context("Coordinator stopped")?;
            info!("{} <- {:?}", self.name, notice);
            if let Notice::Rejected(e) = &notice {
                bail!("{} had a command refused: {}", self.name, e);
            }
            if wanted(&notice) {
                return Ok(notice);
            }
        }
    }

    async fn finish(self) -> anyhow::Result<DemoCoordinator> {
        drop(self.commands);
        Ok(self.task.await?)
    }
}

async fn demo() -> anyhow::Result<()> {
    info!("=== Starting Demo Match ===");

    let hub = LoopbackHub::new(Duration::from_secs(30), SystemClock::new());
    let mut alice = Player::spawn("alice", &hub, PeerId::random())?;
    let mut bob = Player::spawn("bob", &hub, PeerId::random())?;

    alice.command(Command::RequestPlay(bob.peer)).await?;
    bob.expect(|n| matches!(n, Notice::IncomingRequest { .. })).await?;
    bob.command(Command::Accept).await?;
    alice.expect(|n| matches!(n, Notice::MatchStarted { .. })).await?;

    // Alice builds a row on line 7, Bob answers on line 8
    for i in 0..5u32 {
        alice.command(Command::Move { x: 3 + i, y: 7 }).await?;
        if i == 4 {
            break;
        }
        bob.expect(|n| matches!(n, Notice::MoveApplied { record, .. } if record.y == 7)).await?;
        bob.command(Command::Move { x: 3 + i, y: 8 }).await?;
        alice.expect(|n| matches!(n, Notice::MoveApplied { record, .. } if record.y == 8)).await?;
    }

    let ended = |n: &Notice| matches!(n, Notice::MatchEnded { .. });
    if let Notice::MatchEnded { outcome, local_won } = alice.expect(ended).await? {
        info!("Outcome: {:?} (alice won: {})", outcome, local_won);
    }
    bob.expect(ended).await?;

    let alice = alice.finish().await?;
    let bob = bob.finish().await?;

    // Both sides replay their move logs onto fresh boards and compare
    let mut hashes = Vec::new();
    for coordinator in [&alice, &bob] {
        let session = coordinator
            .machine()
            .state()
            .session()
            .context("Match state was discarded")?;
        let replay = session.log().replay()?;
        info!(
            "{} replayed {} moves, line: {:?}",
            coordinator.machine().local().short(),
            session.log().len(),
            replay.winner.map(|line| line.cells)
        );
        hashes.push(replay.board.state_hash());
    }

    if hashes[0] != hashes[1] {
        bail!("Boards diverged");
    }
    info!("Board hash: {}", hex::encode(&hashes[0][..8]));
    info!("=== Demo Complete ===");
    Ok(())
}
