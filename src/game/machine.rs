//! Session State Machine
//!
//! One machine per local identity. Every input (local command, relayed
//! event, presence change, clock firing) goes through `handle`, which
//! either commits a transition and returns the intents that go with it,
//! or returns an error and leaves the state exactly as it was.
//!
//! ```text
//!  Idle ──request/incoming──> Requesting ──accept──> Playing ──win/timeout──> AwaitingReplayDecision
//!   ^                            │ reject/expire        │ ^                       │ both offer
//!   └────────────────────────────┘                      │ └───────────────────────┘
//!   ^                                                   │ peer left
//!   └──────── decline / window expired ─────────────────┴──────────> Ended
//! ```
//!
//! The machine does no IO and reads no clock. `now` is passed in.

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::debug;

use crate::core::ids::{derive_session_id, PeerId, SessionId};
use crate::core::time::Timestamp;
use crate::game::board::{validate_dimensions, Mark};
use crate::game::events::RelayEvent;
use crate::game::moves::MoveRecord;
use crate::game::session::{MatchSession, MoveResult, Outcome, SessionError};

/// Reason sent when an invitation arrives while busy.
pub const BUSY_REASON: &str = "busy";

/// Reason sent when an invitation names an unusable board.
pub const INVALID_BOARD_REASON: &str = "invalid board";

/// Timing and board settings for a local identity.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Width requested in outgoing invitations.
    pub board_width: u32,
    /// Height requested in outgoing invitations.
    pub board_height: u32,
    /// Time a player has for one move.
    pub turn_duration: Duration,
    /// Time an invitation stays open.
    pub request_timeout: Duration,
    /// Time both peers have to agree on a rematch.
    pub replay_window: Duration,
    /// Added to deadlines that wait on the remote peer, to absorb relay latency.
    pub remote_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            board_width: 15,
            board_height: 15,
            turn_duration: Duration::from_secs(crate::TURN_DURATION_SECS),
            request_timeout: Duration::from_secs(crate::REQUEST_TIMEOUT_SECS),
            replay_window: Duration::from_secs(crate::REPLAY_WINDOW_SECS),
            remote_grace: Duration::from_secs(2),
        }
    }
}

impl SessionConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        let dim = |key: &str, default: u32| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(default)
        };

        Self {
            board_width: dim("GOMOKU_BOARD_WIDTH", defaults.board_width),
            board_height: dim("GOMOKU_BOARD_HEIGHT", defaults.board_height),
            turn_duration: secs("GOMOKU_TURN_SECS", defaults.turn_duration),
            request_timeout: secs("GOMOKU_REQUEST_SECS", defaults.request_timeout),
            replay_window: secs("GOMOKU_REPLAY_SECS", defaults.replay_window),
            remote_grace: defaults.remote_grace,
        }
    }
}

/// An open invitation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Peer who sent the invitation; plays first if accepted.
    pub requester: PeerId,
    /// Peer invited.
    pub target: PeerId,
    /// Requester-chosen nonce; identifies this invitation.
    pub nonce: u64,
    /// Requested board width.
    pub width: u32,
    /// Requested board height.
    pub height: u32,
    /// Local expiry.
    pub expires_at: Timestamp,
}

impl PendingRequest {
    /// True if `local` sent this invitation.
    pub fn is_outgoing(&self, local: &PeerId) -> bool {
        self.requester == *local
    }

    /// The peer on the other side of the invitation.
    pub fn counterpart(&self, local: &PeerId) -> PeerId {
        if self.is_outgoing(local) {
            self.target
        } else {
            self.requester
        }
    }

    /// Session id both sides derive if accepted.
    pub fn session_id(&self) -> SessionId {
        derive_session_id(&self.requester, &self.target, self.nonce)
    }
}

/// A finished round waiting for both peers to agree on another.
#[derive(Debug, Clone)]
pub struct ReplayDecision {
    /// The round that just ended.
    pub session: MatchSession,
    /// How it ended.
    pub outcome: Outcome,
    /// Local user offered a rematch.
    pub local_offered: bool,
    /// Remote peer offered a rematch.
    pub remote_offered: bool,
    /// Window close.
    pub expires_at: Timestamp,
}

/// Machine state.
#[derive(Debug, Clone, Default)]
pub enum SessionState {
    /// No session.
    #[default]
    Idle,
    /// Invitation sent or received.
    Requesting(PendingRequest),
    /// Board active, turns alternate.
    Playing(MatchSession),
    /// Round over, rematch window open.
    AwaitingReplayDecision(ReplayDecision),
    /// Session torn down by a departed peer. Accepts new invitations.
    Ended(Outcome),
}

/// State tag without data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// See `SessionState::Idle`.
    Idle,
    /// See `SessionState::Requesting`.
    Requesting,
    /// See `SessionState::Playing`.
    Playing,
    /// See `SessionState::AwaitingReplayDecision`.
    AwaitingReplayDecision,
    /// See `SessionState::Ended`.
    Ended,
}

impl SessionState {
    /// State tag.
    pub fn phase(&self) -> Phase {
        match self {
            SessionState::Idle => Phase::Idle,
            SessionState::Requesting(_) => Phase::Requesting,
            SessionState::Playing(_) => Phase::Playing,
            SessionState::AwaitingReplayDecision(_) => Phase::AwaitingReplayDecision,
            SessionState::Ended(_) => Phase::Ended,
        }
    }

    /// True while a request or match holds the slot.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Requesting(_)
                | SessionState::Playing(_)
                | SessionState::AwaitingReplayDecision(_)
        )
    }

    /// Outcome of the last round, once there is one.
    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            SessionState::AwaitingReplayDecision(r) => Some(&r.outcome),
            SessionState::Ended(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Running round.
    pub fn session(&self) -> Option<&MatchSession> {
        match self {
            SessionState::Playing(s) => Some(s),
            SessionState::AwaitingReplayDecision(r) => Some(&r.session),
            _ => None,
        }
    }
}

/// Inputs to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Local user invites `target`.
    RequestPlay {
        /// Peer to invite.
        target: PeerId,
    },
    /// Local user accepts the incoming invitation.
    AcceptRequest,
    /// Local user declines the incoming invitation.
    RejectRequest {
        /// Sent back to the requester.
        reason: String,
    },
    /// Local user places a stone.
    SubmitMove {
        /// Column.
        x: u32,
        /// Row.
        y: u32,
    },
    /// Local user wants a rematch.
    OfferReplay,
    /// Local user does not want a rematch.
    DeclineReplay,
    /// Event relayed from a peer.
    Remote {
        /// Sending peer.
        from: PeerId,
        /// What it sent.
        event: RelayEvent,
    },
    /// Hub reported a peer's busy flag.
    PresenceChanged {
        /// Peer whose flag changed.
        peer: PeerId,
        /// New value.
        busy: bool,
    },
    /// Hub gave up on a peer.
    PeerDisconnected(PeerId),
    /// A peer reconnected; whatever it was doing is gone.
    PeerReconnected(PeerId),
    /// Local relay connection dropped.
    ConnectionLost,
    /// The clock armed with `generation` fired.
    DeadlineElapsed {
        /// Generation the clock was armed with.
        generation: u64,
    },
}

impl SessionEvent {
    /// True for commands issued by the local user.
    pub fn is_local_command(&self) -> bool {
        matches!(
            self,
            SessionEvent::RequestPlay { .. }
                | SessionEvent::AcceptRequest
                | SessionEvent::RejectRequest { .. }
                | SessionEvent::SubmitMove { .. }
                | SessionEvent::OfferReplay
                | SessionEvent::DeclineReplay
        )
    }
}

/// Local user notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Someone wants to play.
    IncomingRequest {
        /// Requesting peer.
        from: PeerId,
        /// Proposed board width.
        width: u32,
        /// Proposed board height.
        height: u32,
    },
    /// Our invitation was declined.
    RequestRejected {
        /// Peer that declined.
        by: PeerId,
        /// Their reason.
        reason: String,
    },
    /// Our invitation got no answer in time.
    RequestExpired {
        /// Peer that was invited.
        target: PeerId,
    },
    /// The peer we were dealing with went away before a match started.
    PeerUnavailable {
        /// Peer that went away.
        peer: PeerId,
    },
    /// A round started.
    MatchStarted {
        /// Session shared by both peers.
        session: SessionId,
        /// The other peer.
        opponent: PeerId,
        /// Mark we play this round.
        local_mark: Mark,
        /// Round number, 0 for the first.
        round: u32,
        /// Board width.
        width: u32,
        /// Board height.
        height: u32,
    },
    /// A stone was placed. `next` holds the turn unless the round ended.
    MoveApplied {
        /// The placed stone.
        record: MoveRecord,
        /// Peer to move next.
        next: PeerId,
    },
    /// A round or session ended.
    MatchEnded {
        /// How it ended.
        outcome: Outcome,
        /// True if the local peer won.
        local_won: bool,
    },
    /// Opponent wants a rematch.
    ReplayOffered {
        /// Offering peer.
        by: PeerId,
    },
    /// Opponent declined a rematch.
    ReplayDeclined {
        /// Declining peer.
        by: PeerId,
    },
    /// Rematch window closed without agreement.
    ReplayExpired,
    /// Local relay connection dropped; session discarded.
    ConnectionLost,
    /// A local command was refused.
    Rejected(SessionError),
}

/// Outbound effects of a committed transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Relay `event` to `to`.
    Send {
        /// Recipient.
        to: PeerId,
        /// Event to relay.
        event: RelayEvent,
    },
    /// Update our busy flag at the hub.
    Presence {
        /// New value.
        busy: bool,
    },
    /// Tell the local user.
    Notify(Notice),
}

/// The per-identity state machine.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    local: PeerId,
    config: SessionConfig,
    state: SessionState,
    generation: u64,
    next_nonce: u64,
    busy_peers: BTreeSet<PeerId>,
}

impl SessionMachine {
    /// Idle machine for `local`.
    pub fn new(local: PeerId, config: SessionConfig) -> Self {
        Self {
            local,
            config,
            state: SessionState::Idle,
            generation: 0,
            next_nonce: 0,
            busy_peers: BTreeSet::new(),
        }
    }

    /// Local identity.
    pub fn local(&self) -> PeerId {
        self.local
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Current state tag.
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Bumped whenever the deadline changes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True if the hub last reported `peer` as busy.
    pub fn is_busy(&self, peer: &PeerId) -> bool {
        self.busy_peers.contains(peer)
    }

    /// Deadline of the current state and the generation it belongs to.
    pub fn deadline(&self) -> Option<(Timestamp, u64)> {
        let at = match &self.state {
            SessionState::Requesting(p) => p.expires_at,
            SessionState::Playing(s) => s.deadline(),
            SessionState::AwaitingReplayDecision(r) => r.expires_at,
            SessionState::Idle | SessionState::Ended(_) => return None,
        };
        Some((at, self.generation))
    }

    /// Apply one input.
    pub fn handle(&mut self, event: SessionEvent, now: Timestamp) -> Result<Vec<Intent>, SessionError> {
        match event {
            SessionEvent::RequestPlay { target } => self.request_play(target, now),
            SessionEvent::AcceptRequest => self.accept_request(now),
            SessionEvent::RejectRequest { reason } => self.reject_request(reason),
            SessionEvent::SubmitMove { x, y } => self.submit_local_move(x, y, now),
            SessionEvent::OfferReplay => self.offer_replay(now),
            SessionEvent::DeclineReplay => self.decline_replay(),
            SessionEvent::Remote { from, event } => self.remote(from, event, now),
            SessionEvent::PresenceChanged { peer, busy } => {
                if busy {
                    self.busy_peers.insert(peer);
                } else {
                    self.busy_peers.remove(&peer);
                }
                Ok(Vec::new())
            }
            SessionEvent::PeerDisconnected(peer) => {
                self.busy_peers.remove(&peer);
                Ok(self.peer_gone(peer))
            }
            SessionEvent::PeerReconnected(peer) => Ok(self.peer_gone(peer)),
            SessionEvent::ConnectionLost => Ok(self.connection_lost()),
            SessionEvent::DeadlineElapsed { generation } => Ok(self.deadline_elapsed(generation, now)),
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn set_state(&mut self, next: SessionState) {
        self.state = next;
        self.generation += 1;
    }

    fn take_state(&mut self) -> SessionState {
        self.generation += 1;
        std::mem::take(&mut self.state)
    }

    /// Deadline for a wait on `holder`; remote waits get the grace period.
    fn deadline_for(&self, holder: &PeerId, base: Duration, now: Timestamp) -> Timestamp {
        if *holder == self.local {
            now + base
        } else {
            now + base + self.config.remote_grace
        }
    }

    fn match_started(&self, session: &MatchSession) -> Intent {
        let opponent = session.opponent_of(&self.local).unwrap_or(session.peer_b);
        Intent::Notify(Notice::MatchStarted {
            session: session.id,
            opponent,
            local_mark: session.mark_of(&self.local).unwrap_or(Mark::Empty),
            round: session.round,
            width: session.board().width(),
            height: session.board().height(),
        })
    }

    /// Create round 0 from an accepted invitation.
    fn start_match(&mut self, request: &PendingRequest, now: Timestamp) -> Result<Vec<Intent>, SessionError> {
        let deadline = self.deadline_for(&request.requester, self.config.turn_duration, now);
        let session = MatchSession::new(
            request.session_id(),
            request.requester,
            request.target,
            request.width,
            request.height,
            0,
            deadline,
        )
        .map_err(SessionError::InvalidBoard)?;

        debug!(
            "Session {} started, {} moves first",
            hex::encode(&session.id[..4]),
            session.peer_a.short()
        );

        let intents = vec![Intent::Presence { busy: true }, self.match_started(&session)];
        self.set_state(SessionState::Playing(session));
        Ok(intents)
    }

    /// Close a round that ended on the board or the clock.
    fn finish_round(&mut self, session: MatchSession, outcome: Outcome, now: Timestamp) -> Intent {
        let local_won = outcome.winner(session.peer_a, session.peer_b) == self.local;
        let expires_at = now + self.config.replay_window + self.config.remote_grace;

        self.set_state(SessionState::AwaitingReplayDecision(ReplayDecision {
            session,
            outcome: outcome.clone(),
            local_offered: false,
            remote_offered: false,
            expires_at,
        }));
        Intent::Notify(Notice::MatchEnded { outcome, local_won })
    }

    /// Move the finished round out of `Playing` and close it.
    fn end_playing(&mut self, outcome: Outcome, now: Timestamp) -> Vec<Intent> {
        match self.take_state() {
            SessionState::Playing(session) => vec![self.finish_round(session, outcome, now)],
            other => {
                self.state = other;
                Vec::new()
            }
        }
    }

    // =========================================================================
    // Local commands
    // =========================================================================

    fn request_play(&mut self, target: PeerId, now: Timestamp) -> Result<Vec<Intent>, SessionError> {
        if self.state.is_active() {
            return Err(SessionError::SessionAlreadyActive);
        }
        if target == self.local || self.busy_peers.contains(&target) {
            return Err(SessionError::TargetUnavailable);
        }

        let (width, height) = (self.config.board_width, self.config.board_height);
        validate_dimensions(width, height).map_err(SessionError::InvalidBoard)?;

        let nonce = self.next_nonce;
        self.next_nonce += 1;

        let expires_at = self.deadline_for(&target, self.config.request_timeout, now);
        self.set_state(SessionState::Requesting(PendingRequest {
            requester: self.local,
            target,
            nonce,
            width,
            height,
            expires_at,
        }));

        Ok(vec![Intent::Send {
            to: target,
            event: RelayEvent::RequestPlay { nonce, width, height },
        }])
    }

    fn accept_request(&mut self, now: Timestamp) -> Result<Vec<Intent>, SessionError> {
        let request = match &self.state {
            SessionState::Requesting(p) if !p.is_outgoing(&self.local) => p.clone(),
            _ => return Err(SessionError::InvalidState),
        };

        let mut intents = vec![Intent::Send {
            to: request.requester,
            event: RelayEvent::AcceptPlay { nonce: request.nonce },
        }];
        intents.extend(self.start_match(&request, now)?);
        Ok(intents)
    }

    fn reject_request(&mut self, reason: String) -> Result<Vec<Intent>, SessionError> {
        let request = match &self.state {
            SessionState::Requesting(p) if !p.is_outgoing(&self.local) => p.clone(),
            _ => return Err(SessionError::InvalidState),
        };

        self.set_state(SessionState::Idle);
        Ok(vec![Intent::Send {
            to: request.requester,
            event: RelayEvent::RejectPlay { nonce: request.nonce, reason },
        }])
    }

    fn submit_local_move(&mut self, x: u32, y: u32, now: Timestamp) -> Result<Vec<Intent>, SessionError> {
        let local = self.local;
        let remote_deadline = now + self.config.turn_duration + self.config.remote_grace;

        let session = match &mut self.state {
            SessionState::Playing(s) => s,
            SessionState::AwaitingReplayDecision(r)
                if matches!(r.outcome, Outcome::TimeoutLoss { .. }) =>
            {
                return Err(SessionError::TimeoutRace);
            }
            _ => return Err(SessionError::InvalidState),
        };

        let opponent = session.opponent_of(&local).ok_or(SessionError::UnexpectedPeer)?;
        let (round, turn) = (session.round, session.turn());
        let result = session.submit_move(&local, x, y, remote_deadline)?;

        let mut intents = vec![Intent::Send { to: opponent, event: RelayEvent::Move { x, y, round, turn } }];
        intents.extend(self.after_move(result, now));
        Ok(intents)
    }

    fn offer_replay(&mut self, now: Timestamp) -> Result<Vec<Intent>, SessionError> {
        let local = self.local;
        let decision = match &mut self.state {
            SessionState::AwaitingReplayDecision(r) => r,
            _ => return Err(SessionError::InvalidState),
        };
        if decision.local_offered {
            return Ok(Vec::new());
        }

        let opponent = decision.session.opponent_of(&local).ok_or(SessionError::UnexpectedPeer)?;
        let round = decision.session.round;
        let both = decision.remote_offered;
        decision.local_offered = true;

        let mut intents = vec![Intent::Send { to: opponent, event: RelayEvent::OfferReplay { round } }];
        if both {
            intents.extend(self.start_replay(now)?);
        }
        Ok(intents)
    }

    fn decline_replay(&mut self) -> Result<Vec<Intent>, SessionError> {
        let (opponent, round) = match &self.state {
            SessionState::AwaitingReplayDecision(r) => (
                r.session.opponent_of(&self.local).ok_or(SessionError::UnexpectedPeer)?,
                r.session.round,
            ),
            _ => return Err(SessionError::InvalidState),
        };

        self.set_state(SessionState::Idle);
        Ok(vec![
            Intent::Send { to: opponent, event: RelayEvent::DeclineReplay { round } },
            Intent::Presence { busy: false },
        ])
    }

    fn start_replay(&mut self, now: Timestamp) -> Result<Vec<Intent>, SessionError> {
        let next = match &self.state {
            SessionState::AwaitingReplayDecision(r) => {
                // Previous second player opens the next round
                let deadline = self.deadline_for(&r.session.peer_b, self.config.turn_duration, now);
                r.session.rematch(deadline).map_err(SessionError::InvalidBoard)?
            }
            _ => return Err(SessionError::InvalidState),
        };

        let notice = self.match_started(&next);
        self.set_state(SessionState::Playing(next));
        Ok(vec![notice])
    }

    /// Intents for an accepted move, by either side.
    fn after_move(&mut self, result: MoveResult, now: Timestamp) -> Vec<Intent> {
        match result {
            MoveResult::Continue { record, next } => {
                self.generation += 1;
                vec![Intent::Notify(Notice::MoveApplied { record, next })]
            }
            MoveResult::Won { record, outcome } => {
                let winner = match &outcome {
                    Outcome::Win { winner, .. } => *winner,
                    _ => self.local,
                };
                let mut intents = vec![Intent::Notify(Notice::MoveApplied { record, next: winner })];
                intents.extend(self.end_playing(outcome, now));
                intents
            }
        }
    }

    // =========================================================================
    // Relayed events
    // =========================================================================

    fn remote(&mut self, from: PeerId, event: RelayEvent, now: Timestamp) -> Result<Vec<Intent>, SessionError> {
        match event {
            RelayEvent::RequestPlay { nonce, width, height } => {
                Ok(self.remote_request(from, nonce, width, height, now))
            }
            RelayEvent::AcceptPlay { nonce } => {
                let request = match &self.state {
                    SessionState::Requesting(p)
                        if p.is_outgoing(&self.local) && p.target == from && p.nonce == nonce =>
                    {
                        p.clone()
                    }
                    _ => return Err(SessionError::TimeoutRace),
                };
                self.start_match(&request, now)
            }
            RelayEvent::RejectPlay { nonce, reason } => {
                match &self.state {
                    SessionState::Requesting(p)
                        if p.is_outgoing(&self.local) && p.target == from && p.nonce == nonce => {}
                    _ => return Err(SessionError::TimeoutRace),
                }
                self.set_state(SessionState::Idle);
                Ok(vec![Intent::Notify(Notice::RequestRejected { by: from, reason })])
            }
            RelayEvent::Move { x, y, round, turn } => self.remote_move(from, x, y, round, turn, now),
            RelayEvent::Timeout { round, turn } => self.remote_timeout(from, round, turn, now),
            RelayEvent::OfferReplay { round } => {
                let local_offered = match &mut self.state {
                    SessionState::AwaitingReplayDecision(r)
                        if r.session.involves(&from) && r.session.round == round =>
                    {
                        r.remote_offered = true;
                        r.local_offered
                    }
                    _ => return Err(SessionError::TimeoutRace),
                };

                let mut intents = vec![Intent::Notify(Notice::ReplayOffered { by: from })];
                if local_offered {
                    intents.extend(self.start_replay(now)?);
                }
                Ok(intents)
            }
            RelayEvent::DeclineReplay { round } => {
                match &self.state {
                    SessionState::AwaitingReplayDecision(r)
                        if r.session.involves(&from) && r.session.round == round => {}
                    _ => return Err(SessionError::TimeoutRace),
                }
                self.set_state(SessionState::Idle);
                Ok(vec![
                    Intent::Presence { busy: false },
                    Intent::Notify(Notice::ReplayDeclined { by: from }),
                ])
            }
        }
    }

    fn remote_request(
        &mut self,
        from: PeerId,
        nonce: u64,
        width: u32,
        height: u32,
        now: Timestamp,
    ) -> Vec<Intent> {
        let reject = |reason: &str| {
            vec![Intent::Send {
                to: from,
                event: RelayEvent::RejectPlay { nonce, reason: reason.to_string() },
            }]
        };

        if validate_dimensions(width, height).is_err() {
            return reject(INVALID_BOARD_REASON);
        }

        let incoming = PendingRequest {
            requester: from,
            target: self.local,
            nonce,
            width,
            height,
            expires_at: now + self.config.request_timeout,
        };

        match &self.state {
            SessionState::Idle | SessionState::Ended(_) => {
                self.set_state(SessionState::Requesting(incoming));
                vec![Intent::Notify(Notice::IncomingRequest { from, width, height })]
            }
            // Crossed invitations: the smaller peer id's invitation stands
            SessionState::Requesting(p) if p.is_outgoing(&self.local) && p.target == from => {
                if self.local < from {
                    debug!("Crossed request from {}, keeping ours", from.short());
                    Vec::new()
                } else {
                    debug!("Crossed request from {}, accepting theirs", from.short());
                    let mut intents = vec![Intent::Send { to: from, event: RelayEvent::AcceptPlay { nonce } }];
                    match self.start_match(&incoming, now) {
                        Ok(started) => intents.extend(started),
                        Err(_) => return reject(INVALID_BOARD_REASON),
                    }
                    intents
                }
            }
            _ => reject(BUSY_REASON),
        }
    }

    fn remote_move(
        &mut self,
        from: PeerId,
        x: u32,
        y: u32,
        round: u32,
        turn: u32,
        now: Timestamp,
    ) -> Result<Vec<Intent>, SessionError> {
        let local_deadline = now + self.config.turn_duration;

        let session = match &mut self.state {
            SessionState::Playing(s) => s,
            SessionState::AwaitingReplayDecision(r) if r.session.involves(&from) => {
                if (round, turn) < (r.session.round, r.session.turn()) {
                    return Ok(Vec::new());
                }
                return Err(SessionError::TimeoutRace);
            }
            _ => return Err(SessionError::InvalidState),
        };

        if !session.involves(&from) {
            return Err(SessionError::UnexpectedPeer);
        }
        if round < session.round {
            debug!("Move from finished round {} from {}", round, from.short());
            return Ok(Vec::new());
        }
        if round > session.round {
            return Err(SessionError::InvalidState);
        }
        if turn < session.turn() {
            debug!("Duplicate move {} from {}", turn, from.short());
            return Ok(Vec::new());
        }
        if turn > session.turn() {
            return Err(SessionError::InvalidState);
        }

        let result = session.submit_move(&from, x, y, local_deadline)?;
        Ok(self.after_move(result, now))
    }

    fn remote_timeout(
        &mut self,
        from: PeerId,
        round: u32,
        turn: u32,
        now: Timestamp,
    ) -> Result<Vec<Intent>, SessionError> {
        let finished = matches!(
            &self.state,
            SessionState::AwaitingReplayDecision(r) if r.session.involves(&from) && r.session.round == round
        );
        if finished {
            return Ok(self.concede_finished_round(turn));
        }

        let outcome = match &self.state {
            SessionState::Playing(s) if !s.involves(&from) => return Err(SessionError::UnexpectedPeer),
            SessionState::Playing(s) if s.round == round && s.turn() == turn => Some(s.timeout_outcome()),
            SessionState::Playing(s) if s.round == round => self.conceded_timeout(s, turn),
            _ => None,
        };

        match outcome {
            Some(outcome) => Ok(self.end_playing(outcome, now)),
            None => {
                debug!("Stale timeout report for round {} turn {} from {}", round, turn, from.short());
                Ok(Vec::new())
            }
        }
    }

    /// The peer timed us out on `turn`, but we had already played it and the
    /// move never reached them. Their report was committed first, so we lose.
    fn conceded_timeout(&self, session: &MatchSession, turn: u32) -> Option<Outcome> {
        let mark = session.mark_of(&self.local)?;
        let last = session.last_move()?;
        if turn + 1 == session.turn() && last.mark == mark {
            Some(Outcome::TimeoutLoss { loser: self.local, mark })
        } else {
            None
        }
    }

    /// Same as `conceded_timeout`, for a round our last move already closed.
    fn concede_finished_round(&mut self, turn: u32) -> Vec<Intent> {
        let outcome = match &self.state {
            SessionState::AwaitingReplayDecision(r) => self.conceded_timeout(&r.session, turn),
            _ => None,
        };
        let Some(outcome) = outcome else {
            debug!("Stale timeout report for turn {} after round end", turn);
            return Vec::new();
        };

        match &mut self.state {
            SessionState::AwaitingReplayDecision(r) if r.outcome != outcome => {
                debug!("Conceding round {} to a timeout report", r.session.round);
                r.outcome = outcome.clone();
                vec![Intent::Notify(Notice::MatchEnded { outcome, local_won: false })]
            }
            _ => Vec::new(),
        }
    }

    // =========================================================================
    // Departures and the clock
    // =========================================================================

    fn peer_gone(&mut self, peer: PeerId) -> Vec<Intent> {
        match &self.state {
            SessionState::Requesting(p) if p.counterpart(&self.local) == peer => {
                let outgoing = p.is_outgoing(&self.local);
                self.set_state(SessionState::Idle);
                if outgoing {
                    vec![Intent::Notify(Notice::PeerUnavailable { peer })]
                } else {
                    Vec::new()
                }
            }
            SessionState::Playing(s) if s.involves(&peer) => self.abandon(peer),
            SessionState::AwaitingReplayDecision(r) if r.session.involves(&peer) => self.abandon(peer),
            _ => Vec::new(),
        }
    }

    fn abandon(&mut self, peer: PeerId) -> Vec<Intent> {
        let outcome = Outcome::Abandoned { peer };
        self.set_state(SessionState::Ended(outcome.clone()));
        vec![
            Intent::Presence { busy: false },
            Intent::Notify(Notice::MatchEnded { outcome, local_won: true }),
        ]
    }

    fn connection_lost(&mut self) -> Vec<Intent> {
        let was_active = self.state.is_active();
        self.busy_peers.clear();
        self.set_state(SessionState::Idle);
        if was_active {
            vec![Intent::Notify(Notice::ConnectionLost)]
        } else {
            Vec::new()
        }
    }

    fn deadline_elapsed(&mut self, generation: u64, now: Timestamp) -> Vec<Intent> {
        match self.deadline() {
            Some((at, current)) if current == generation && now >= at => {}
            _ => {
                debug!("Stale deadline firing (generation {})", generation);
                return Vec::new();
            }
        }

        match &self.state {
            SessionState::Requesting(p) => {
                let outgoing = p.is_outgoing(&self.local);
                let target = p.target;
                self.set_state(SessionState::Idle);
                if outgoing {
                    vec![Intent::Notify(Notice::RequestExpired { target })]
                } else {
                    Vec::new()
                }
            }
            SessionState::Playing(s) => {
                let outcome = s.timeout_outcome();
                let report = s.opponent_of(&self.local).map(|opponent| Intent::Send {
                    to: opponent,
                    event: RelayEvent::Timeout { round: s.round, turn: s.turn() },
                });
                let mut intents: Vec<Intent> = report.into_iter().collect();
                intents.extend(self.end_playing(outcome, now));
                intents
            }
            SessionState::AwaitingReplayDecision(_) => {
                self.set_state(SessionState::Idle);
                vec![Intent::Presence { busy: false }, Intent::Notify(Notice::ReplayExpired)]
            }
            SessionState::Idle | SessionState::Ended(_) => Vec::new(),
        }
    }
}
