//! Session Coordinator
//!
//! Owns the `SessionMachine`, the relay channel, and the turn clock of one
//! local identity. Every relay signal, local command and clock firing goes
//! through here one at a time. A committed transition has its intents
//! dispatched before the next input is looked at.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::core::ids::PeerId;
use crate::core::time::Clock;
use crate::game::clock::TurnClock;
use crate::game::machine::{Intent, Notice, SessionEvent, SessionMachine};
use crate::game::session::SessionError;
use crate::network::channel::{Inbound, PeerChannel};

/// Local user commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Invite a peer.
    RequestPlay(PeerId),
    /// Accept the pending invitation.
    Accept,
    /// Decline the pending invitation.
    Reject(String),
    /// Place a stone.
    Move {
        /// Column.
        x: u32,
        /// Row.
        y: u32,
    },
    /// Ask for a rematch.
    OfferReplay,
    /// Refuse a rematch.
    DeclineReplay,
}

impl From<Command> for SessionEvent {
    fn from(command: Command) -> Self {
        match command {
            Command::RequestPlay(target) => SessionEvent::RequestPlay { target },
            Command::Accept => SessionEvent::AcceptRequest,
            Command::Reject(reason) => SessionEvent::RejectRequest { reason },
            Command::Move { x, y } => SessionEvent::SubmitMove { x, y },
            Command::OfferReplay => SessionEvent::OfferReplay,
            Command::DeclineReplay => SessionEvent::DeclineReplay,
        }
    }
}

/// Drives one `SessionMachine` against a relay.
pub struct SessionCoordinator<C: PeerChannel, K: Clock> {
    machine: SessionMachine,
    channel: C,
    clock: K,
    timer: TurnClock,
}

impl<C: PeerChannel, K: Clock> SessionCoordinator<C, K> {
    /// Wrap an idle machine.
    pub fn new(machine: SessionMachine, channel: C, clock: K) -> Self {
        Self { machine, channel, clock, timer: TurnClock::new() }
    }

    /// The state machine.
    pub fn machine(&self) -> &SessionMachine {
        &self.machine
    }

    /// The relay channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Time left on the running deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.timer.remaining(self.clock.now())
    }

    /// Apply one input and dispatch what it produces.
    ///
    /// Returns the notices for the local user. A refused local command
    /// comes back as `Notice::Rejected`; a refused relay event is logged
    /// and dropped.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<Notice> {
        let local_command = event.is_local_command();
        let name = event_name(&event);
        let now = self.clock.now();

        let notices = match self.machine.handle(event, now) {
            Ok(intents) => self.dispatch(intents),
            Err(e) if local_command => {
                debug!("Refused {}: {}", name, e);
                vec![Notice::Rejected(e)]
            }
            Err(SessionError::TimeoutRace) => {
                debug!("Discarded {} that lost a race with a deadline", name);
                Vec::new()
            }
            Err(e) => {
                warn!("Discarded {}: {}", name, e);
                Vec::new()
            }
        };

        self.timer.sync(self.machine.deadline());
        notices
    }

    /// Apply a local command.
    pub fn execute(&mut self, command: Command) -> Vec<Notice> {
        self.handle(command.into())
    }

    /// Apply a relay signal.
    pub fn handle_inbound(&mut self, inbound: Inbound) -> Vec<Notice> {
        match inbound {
            Inbound::Event { from, event } => self.handle(SessionEvent::Remote { from, event }),
            Inbound::Roster(peers) => {
                for p in peers {
                    self.handle(SessionEvent::PresenceChanged { peer: p.peer_id, busy: p.busy });
                }
                Vec::new()
            }
            Inbound::Presence { peer, busy } => self.handle(SessionEvent::PresenceChanged { peer, busy }),
            Inbound::PeerDisconnected(peer) => self.handle(SessionEvent::PeerDisconnected(peer)),
            Inbound::PeerReconnected(peer) => self.handle(SessionEvent::PeerReconnected(peer)),
            Inbound::Disconnected => {
                warn!("Relay connection lost");
                self.handle(SessionEvent::ConnectionLost)
            }
            Inbound::Reconnected => {
                info!("Relay connection restored");
                Vec::new()
            }
        }
    }

    /// Fire the turn clock if its deadline has passed.
    pub fn poll_timer(&mut self) -> Vec<Notice> {
        match self.timer.poll(self.clock.now()) {
            Some(generation) => self.handle(SessionEvent::DeadlineElapsed { generation }),
            None => Vec::new(),
        }
    }

    fn dispatch(&mut self, intents: Vec<Intent>) -> Vec<Notice> {
        let mut notices = Vec::new();
        for intent in intents {
            match intent {
                Intent::Send { to, event } => {
                    let name = event.name();
                    if let Err(e) = self.channel.send(to, event) {
                        warn!("Failed to send {} to {}: {}", name, to.short(), e);
                    }
                }
                Intent::Presence { busy } => {
                    if let Err(e) = self.channel.update_presence(busy) {
                        warn!("Failed to publish presence: {}", e);
                    }
                }
                Intent::Notify(notice) => notices.push(notice),
            }
        }
        notices
    }

    /// Event loop: relay signals, commands and the turn clock, one at a
    /// time. Returns the coordinator when either input closes or the notice
    /// receiver is dropped.
    #[instrument(skip_all, fields(peer = %self.channel.local().short()))]
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<Inbound>,
        mut commands: mpsc::Receiver<Command>,
        notices: mpsc::Sender<Notice>,
    ) -> Self {
        info!("Session coordinator started");

        loop {
            let remaining = self.remaining();
            let produced = tokio::select! {
                signal = inbound.recv() => match signal {
                    Some(signal) => self.handle_inbound(signal),
                    None => break,
                },
                command = commands.recv() => match command {
                    Some(command) => self.execute(command),
                    None => break,
                },
                _ = wait(remaining) => self.poll_timer(),
            };

            for notice in produced {
                if notices.send(notice).await.is_err() {
                    info!("Notice receiver dropped, stopping");
                    return self;
                }
            }
        }

        info!("Session coordinator stopped");
        self
    }
}

async fn wait(remaining: Option<Duration>) {
    match remaining {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending::<()>().await,
    }
}

fn event_name(event: &SessionEvent) -> &'static str {
    match event {
        SessionEvent::RequestPlay { .. } => "request_play",
        SessionEvent::AcceptRequest => "accept_request",
        SessionEvent::RejectRequest { .. } => "reject_request",
        SessionEvent::SubmitMove { .. } => "submit_move",
        SessionEvent::OfferReplay => "offer_replay",
        SessionEvent::DeclineReplay => "decline_replay",
        SessionEvent::Remote { event, .. } => event.name(),
        SessionEvent::PresenceChanged { .. } => "presence",
        SessionEvent::PeerDisconnected(_) => "peer_disconnected",
        SessionEvent::PeerReconnected(_) => "peer_reconnected",
        SessionEvent::ConnectionLost => "connection_lost",
        SessionEvent::DeadlineElapsed { .. } => "deadline_elapsed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use crate::core::time::{ManualClock, Timestamp};
    use crate::game::machine::{Phase, SessionConfig};
    use crate::game::session::Outcome;
    use crate::network::channel::ChannelError;
    use crate::network::protocol::{PeerPresence, RelayEvent};

    struct RecordingChannel {
        peer: PeerId,
        sent: RefCell<Vec<(PeerId, RelayEvent)>>,
        presence: RefCell<Vec<bool>>,
    }

    impl PeerChannel for RecordingChannel {
        fn local(&self) -> PeerId {
            self.peer
        }

        fn send(&self, to: PeerId, event: RelayEvent) -> Result<(), ChannelError> {
            self.sent.borrow_mut().push((to, event));
            Ok(())
        }

        fn update_presence(&self, busy: bool) -> Result<(), ChannelError> {
            self.presence.borrow_mut().push(busy);
            Ok(())
        }
    }

    fn alice() -> PeerId {
        PeerId::new([1; 16])
    }

    fn bob() -> PeerId {
        PeerId::new([2; 16])
    }

    fn create_test_coordinator(clock: &ManualClock) -> SessionCoordinator<RecordingChannel, ManualClock> {
        let channel = RecordingChannel {
            peer: alice(),
            sent: RefCell::new(Vec::new()),
            presence: RefCell::new(Vec::new()),
        };
        let machine = SessionMachine::new(alice(), SessionConfig::default());
        SessionCoordinator::new(machine, channel, clock.clone())
    }

    fn accepted(coord: &mut SessionCoordinator<RecordingChannel, ManualClock>) {
        coord.execute(Command::RequestPlay(bob()));
        coord.handle_inbound(Inbound::Event { from: bob(), event: RelayEvent::AcceptPlay { nonce: 0 } });
        assert_eq!(coord.machine().phase(), Phase::Playing);
    }

    #[test]
    fn test_transition_and_send_issued_together() {
        let clock = ManualClock::new(Timestamp::ZERO);
        let mut coord = create_test_coordinator(&clock);

        let notices = coord.execute(Command::RequestPlay(bob()));
        assert!(notices.is_empty());
        assert_eq!(coord.machine().phase(), Phase::Requesting);
        assert_eq!(
            coord.channel().sent.borrow().as_slice(),
            &[(bob(), RelayEvent::RequestPlay { nonce: 0, width: 15, height: 15 })]
        );
    }

    #[test]
    fn test_refused_command_becomes_notice() {
        let clock = ManualClock::new(Timestamp::ZERO);
        let mut coord = create_test_coordinator(&clock);

        let notices = coord.execute(Command::Move { x: 0, y: 0 });
        assert_eq!(notices, vec![Notice::Rejected(SessionError::InvalidState)]);
        assert!(coord.channel().sent.borrow().is_empty());
    }

    #[test]
    fn test_refused_remote_event_is_silent() {
        let clock = ManualClock::new(Timestamp::ZERO);
        let mut coord = create_test_coordinator(&clock);

        let notices = coord.handle_inbound(Inbound::Event {
            from: bob(),
            event: RelayEvent::AcceptPlay { nonce: 4 },
        });
        assert!(notices.is_empty());
        assert!(coord.channel().sent.borrow().is_empty());
    }

    #[test]
    fn test_clock_follows_machine() {
        let clock = ManualClock::new(Timestamp::ZERO);
        let mut coord = create_test_coordinator(&clock);
        assert_eq!(coord.remaining(), None);

        accepted(&mut coord);
        assert_eq!(coord.remaining(), Some(Duration::from_secs(60)));
        assert_eq!(coord.channel().presence.borrow().as_slice(), &[true]);

        clock.advance(Duration::from_secs(15));
        assert_eq!(coord.remaining(), Some(Duration::from_secs(45)));

        // A move re-arms the clock for the opponent, grace included
        coord.execute(Command::Move { x: 7, y: 7 });
        assert_eq!(coord.remaining(), Some(Duration::from_secs(62)));
    }

    #[test]
    fn test_turn_timeout_fires_once() {
        let clock = ManualClock::new(Timestamp::ZERO);
        let mut coord = create_test_coordinator(&clock);
        accepted(&mut coord);

        clock.advance(Duration::from_secs(59));
        assert!(coord.poll_timer().is_empty());

        clock.advance(Duration::from_secs(1));
        let notices = coord.poll_timer();
        assert!(matches!(
            notices.as_slice(),
            [Notice::MatchEnded { outcome: Outcome::TimeoutLoss { .. }, local_won: false }]
        ));
        assert!(coord
            .channel()
            .sent
            .borrow()
            .contains(&(bob(), RelayEvent::Timeout { round: 0, turn: 0 })));

        // Now counting down the replay window, not the turn
        assert_eq!(coord.machine().phase(), Phase::AwaitingReplayDecision);
        assert_eq!(coord.remaining(), Some(Duration::from_secs(32)));
        assert!(coord.poll_timer().is_empty());
    }

    #[test]
    fn test_disconnect_cancels_clock() {
        let clock = ManualClock::new(Timestamp::ZERO);
        let mut coord = create_test_coordinator(&clock);
        accepted(&mut coord);

        let notices = coord.handle_inbound(Inbound::PeerDisconnected(bob()));
        assert!(matches!(
            notices.as_slice(),
            [Notice::MatchEnded { outcome: Outcome::Abandoned { .. }, local_won: true }]
        ));
        assert_eq!(coord.remaining(), None);

        clock.advance(Duration::from_secs(600));
        assert!(coord.poll_timer().is_empty());
    }

    #[test]
    fn test_roster_marks_busy_peers() {
        let clock = ManualClock::new(Timestamp::ZERO);
        let mut coord = create_test_coordinator(&clock);

        coord.handle_inbound(Inbound::Roster(vec![PeerPresence { peer_id: bob(), busy: true }]));
        assert_eq!(
            coord.execute(Command::RequestPlay(bob())),
            vec![Notice::Rejected(SessionError::TargetUnavailable)]
        );
    }

    #[test]
    fn test_own_connection_loss_returns_to_idle() {
        let clock = ManualClock::new(Timestamp::ZERO);
        let mut coord = create_test_coordinator(&clock);
        accepted(&mut coord);

        assert_eq!(coord.handle_inbound(Inbound::Disconnected), vec![Notice::ConnectionLost]);
        assert_eq!(coord.machine().phase(), Phase::Idle);
        assert!(coord.handle_inbound(Inbound::Reconnected).is_empty());
        assert_eq!(coord.remaining(), None);
    }
}
