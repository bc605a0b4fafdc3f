//! Shared harness: a coordinator running in a task, driven by commands.

#![allow(dead_code)]

use std::time::Duration;

use tokio::sync::mpsc;

use gomoku::game::machine::{Notice, SessionConfig, SessionMachine};
use gomoku::network::channel::{Inbound, PeerChannel};
use gomoku::network::Command;
use gomoku::{Clock, PeerId, SessionCoordinator};

/// Virtual-time tests can afford a long wait.
pub const NOTICE_WAIT: Duration = Duration::from_secs(600);

pub struct Player<C: PeerChannel, K: Clock> {
    pub peer: PeerId,
    pub commands: mpsc::Sender<Command>,
    pub notices: mpsc::Receiver<Notice>,
    pub task: tokio::task::JoinHandle<SessionCoordinator<C, K>>,
}

impl<C, K> Player<C, K>
where
    C: PeerChannel + Send + 'static,
    K: Clock + Send + 'static,
{
    pub fn spawn(channel: C, inbound: mpsc::Receiver<Inbound>, clock: K, config: SessionConfig) -> Self {
        let peer = channel.local();
        let (commands, command_rx) = mpsc::channel(16);
        let (notice_tx, notices) = mpsc::channel(64);

        let machine = SessionMachine::new(peer, config);
        let coordinator = SessionCoordinator::new(machine, channel, clock);
        let task = tokio::spawn(coordinator.run(inbound, command_rx, notice_tx));

        Self { peer, commands, notices, task }
    }

    pub async fn command(&self, command: Command) {
        self.commands.send(command).await.unwrap();
    }

    /// Next notice matching `wanted`; earlier notices are skipped.
    pub async fn expect(&mut self, wanted: impl Fn(&Notice) -> bool) -> Notice {
        loop {
            let notice = tokio::time::timeout(NOTICE_WAIT, self.notices.recv())
                .await
                .expect("timed out waiting for notice")
                .expect("coordinator stopped");
            if let Notice::Rejected(e) = &notice {
                panic!("command refused: {}", e);
            }
            if wanted(&notice) {
                return notice;
            }
        }
    }

    pub async fn finish(self) -> SessionCoordinator<C, K> {
        drop(self.commands);
        self.task.await.unwrap()
    }
}

pub fn is_move_on_row(y: u32) -> impl Fn(&Notice) -> bool {
    move |n| matches!(n, Notice::MoveApplied { record, .. } if record.y == y)
}

pub fn is_match_started(n: &Notice) -> bool {
    matches!(n, Notice::MatchStarted { .. })
}

pub fn is_match_ended(n: &Notice) -> bool {
    matches!(n, Notice::MatchEnded { .. })
}

/// `first` invites `second`, which accepts.
pub async fn start_match<C, K>(first: &mut Player<C, K>, second: &mut Player<C, K>)
where
    C: PeerChannel + Send + 'static,
    K: Clock + Send + 'static,
{
    first.command(Command::RequestPlay(second.peer)).await;
    second.expect(|n| matches!(n, Notice::IncomingRequest { .. })).await;
    second.command(Command::Accept).await;
    second.expect(is_match_started).await;
    first.expect(is_match_started).await;
}

/// `first` completes a horizontal five on row 7 while `second` plays row 8.
pub async fn play_to_win<C, K>(first: &mut Player<C, K>, second: &mut Player<C, K>)
where
    C: PeerChannel + Send + 'static,
    K: Clock + Send + 'static,
{
    for i in 0..5u32 {
        first.command(Command::Move { x: 3 + i, y: 7 }).await;
        if i == 4 {
            break;
        }
        second.expect(is_move_on_row(7)).await;
        second.command(Command::Move { x: 3 + i, y: 8 }).await;
        first.expect(is_move_on_row(8)).await;
    }
}
