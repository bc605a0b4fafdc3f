//! Match Session
//!
//! One round between two peers: the board, whose turn it is, and when that
//! turn runs out. Every mutation goes through `submit_move`, which checks
//! before it writes, so a rejected move leaves the session untouched.

use serde::{Deserialize, Serialize};

use crate::core::ids::{PeerId, SessionId};
use crate::core::time::Timestamp;
use crate::game::board::{Board, BoardError, Mark};
use crate::game::moves::{MoveLog, MoveRecord};
use crate::game::win::{check_win, WinningLine};

/// How a round ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// A line was completed.
    Win {
        /// Mark of the winner.
        mark: Mark,
        /// Peer who completed the line.
        winner: PeerId,
        /// The completed line.
        line: WinningLine,
    },
    /// The peer holding the turn ran out of time and loses.
    TimeoutLoss {
        /// Peer who timed out.
        loser: PeerId,
        /// Mark of the peer who timed out.
        mark: Mark,
    },
    /// A peer left mid-session.
    Abandoned {
        /// Peer who disconnected.
        peer: PeerId,
    },
}

impl Outcome {
    /// Peer credited with the win, given the two participants.
    pub fn winner(&self, peer_a: PeerId, peer_b: PeerId) -> PeerId {
        let other = |p: PeerId| if p == peer_a { peer_b } else { peer_a };
        match self {
            Outcome::Win { winner, .. } => *winner,
            Outcome::TimeoutLoss { loser, .. } => other(*loser),
            Outcome::Abandoned { peer } => other(*peer),
        }
    }
}

/// Result of an accepted move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveResult {
    /// Play continues with the other peer.
    Continue {
        /// The accepted move.
        record: MoveRecord,
        /// Peer who now holds the turn.
        next: PeerId,
    },
    /// The move completed a line.
    Won {
        /// The accepted move.
        record: MoveRecord,
        /// Final outcome.
        outcome: Outcome,
    },
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Move submitted by the peer not holding the turn.
    #[error("Not your turn")]
    NotYourTurn,

    /// Board rejected the cell.
    #[error("Invalid cell: {0}")]
    InvalidCell(BoardError),

    /// Requested board cannot be created.
    #[error("Invalid board: {0}")]
    InvalidBoard(BoardError),

    /// Target is busy or not a valid opponent.
    #[error("Target unavailable")]
    TargetUnavailable,

    /// A request or match is already in progress.
    #[error("Session already active")]
    SessionAlreadyActive,

    /// Event arrived after a deadline already closed its window.
    #[error("Event lost a race with a timeout")]
    TimeoutRace,

    /// Command does not apply to the current state.
    #[error("Invalid session state")]
    InvalidState,

    /// Event came from a peer outside the current session.
    #[error("Unexpected peer")]
    UnexpectedPeer,
}

/// A running round.
#[derive(Debug, Clone)]
pub struct MatchSession {
    /// Session identifier, shared by both peers.
    pub id: SessionId,
    /// Peer playing `Mark::PlayerA`; moves first.
    pub peer_a: PeerId,
    /// Peer playing `Mark::PlayerB`.
    pub peer_b: PeerId,
    /// Round number, starting at 0 and bumped on each replay.
    pub round: u32,
    current_turn: Mark,
    board: Board,
    deadline: Timestamp,
    last_move: Option<MoveRecord>,
    log: MoveLog,
}

impl MatchSession {
    /// Start a round on a fresh board. `peer_a` holds the first turn.
    pub fn new(
        id: SessionId,
        peer_a: PeerId,
        peer_b: PeerId,
        width: u32,
        height: u32,
        round: u32,
        deadline: Timestamp,
    ) -> Result<Self, BoardError> {
        let board = Board::new(width, height)?;

        Ok(Self {
            id,
            peer_a,
            peer_b,
            round,
            current_turn: Mark::PlayerA,
            board,
            deadline,
            last_move: None,
            log: MoveLog::new(width, height),
        })
    }

    /// Next round: fresh board, roles swapped so the other peer moves first.
    pub fn rematch(&self, deadline: Timestamp) -> Result<Self, BoardError> {
        Self::new(
            self.id,
            self.peer_b,
            self.peer_a,
            self.board.width(),
            self.board.height(),
            self.round + 1,
            deadline,
        )
    }

    /// Mark played by `peer`, if it is a participant.
    pub fn mark_of(&self, peer: &PeerId) -> Option<Mark> {
        if *peer == self.peer_a {
            Some(Mark::PlayerA)
        } else if *peer == self.peer_b {
            Some(Mark::PlayerB)
        } else {
            None
        }
    }

    /// Participant playing `mark`.
    pub fn peer_of(&self, mark: Mark) -> Option<PeerId> {
        match mark {
            Mark::PlayerA => Some(self.peer_a),
            Mark::PlayerB => Some(self.peer_b),
            Mark::Empty => None,
        }
    }

    /// The other participant.
    pub fn opponent_of(&self, peer: &PeerId) -> Option<PeerId> {
        match self.mark_of(peer)? {
            Mark::PlayerA => Some(self.peer_b),
            _ => Some(self.peer_a),
        }
    }

    /// True if `peer` is one of the two participants.
    pub fn involves(&self, peer: &PeerId) -> bool {
        self.mark_of(peer).is_some()
    }

    /// Mark whose turn it is.
    pub fn current_turn(&self) -> Mark {
        self.current_turn
    }

    /// Peer whose turn it is.
    pub fn current_peer(&self) -> PeerId {
        match self.current_turn {
            Mark::PlayerB => self.peer_b,
            _ => self.peer_a,
        }
    }

    /// Zero-based index of the move about to be played.
    pub fn turn(&self) -> u32 {
        self.log.len() as u32
    }

    /// When the current turn expires.
    pub fn deadline(&self) -> Timestamp {
        self.deadline
    }

    /// The board.
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Most recently accepted move.
    pub fn last_move(&self) -> Option<&MoveRecord> {
        self.last_move.as_ref()
    }

    /// All moves of this round.
    pub fn log(&self) -> &MoveLog {
        &self.log
    }

    /// Apply a move from `by`.
    ///
    /// On success the turn passes to the opponent with `next_deadline`,
    /// unless the move completes a line. On error nothing changes.
    pub fn submit_move(
        &mut self,
        by: &PeerId,
        x: u32,
        y: u32,
        next_deadline: Timestamp,
    ) -> Result<MoveResult, SessionError> {
        let mark = self.mark_of(by).ok_or(SessionError::UnexpectedPeer)?;
        if mark != self.current_turn {
            return Err(SessionError::NotYourTurn);
        }

        self.board.place(x, y, mark).map_err(SessionError::InvalidCell)?;

        let record = MoveRecord { x, y, mark };
        self.log.push(record);
        self.last_move = Some(record);

        if let Some(line) = check_win(&self.board, x, y, mark) {
            return Ok(MoveResult::Won {
                record,
                outcome: Outcome::Win { mark, winner: *by, line },
            });
        }

        self.current_turn = mark.opponent();
        self.deadline = next_deadline;
        Ok(MoveResult::Continue { record, next: self.current_peer() })
    }

    /// Outcome if the current turn expires now.
    pub fn timeout_outcome(&self) -> Outcome {
        Outcome::TimeoutLoss { loser: self.current_peer(), mark: self.current_turn }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers() -> (PeerId, PeerId) {
        (PeerId::new([1; 16]), PeerId::new([2; 16]))
    }

    fn create_test_session(width: u32, height: u32) -> MatchSession {
        let (a, b) = peers();
        MatchSession::new([0; 16], a, b, width, height, 0, Timestamp::from_secs(60)).unwrap()
    }

    #[test]
    fn test_peer_a_moves_first() {
        let session = create_test_session(15, 15);
        let (a, b) = peers();
        assert_eq!(session.current_peer(), a);
        assert_eq!(session.current_turn(), Mark::PlayerA);
        assert_eq!(session.mark_of(&b), Some(Mark::PlayerB));
        assert_eq!(session.turn(), 0);
    }

    #[test]
    fn test_move_flips_turn_and_deadline() {
        let mut session = create_test_session(15, 15);
        let (a, b) = peers();

        let result = session.submit_move(&a, 7, 7, Timestamp::from_secs(120)).unwrap();
        assert!(matches!(result, MoveResult::Continue { next, .. } if next == b));
        assert_eq!(session.current_peer(), b);
        assert_eq!(session.deadline(), Timestamp::from_secs(120));
        assert_eq!(session.last_move(), Some(&MoveRecord { x: 7, y: 7, mark: Mark::PlayerA }));
        assert_eq!(session.turn(), 1);
    }

    #[test]
    fn test_out_of_turn_move_changes_nothing() {
        let mut session = create_test_session(15, 15);
        let (_, b) = peers();
        let before = session.board().state_hash();

        let result = session.submit_move(&b, 0, 0, Timestamp::from_secs(120));
        assert_eq!(result, Err(SessionError::NotYourTurn));
        assert_eq!(session.board().state_hash(), before);
        assert_eq!(session.current_turn(), Mark::PlayerA);
        assert_eq!(session.deadline(), Timestamp::from_secs(60));
    }

    #[test]
    fn test_occupied_cell_does_not_consume_turn() {
        let mut session = create_test_session(15, 15);
        let (a, b) = peers();
        session.submit_move(&a, 3, 3, Timestamp::from_secs(120)).unwrap();

        let result = session.submit_move(&b, 3, 3, Timestamp::from_secs(180));
        assert_eq!(
            result,
            Err(SessionError::InvalidCell(BoardError::CellOccupied { x: 3, y: 3 }))
        );
        assert_eq!(session.current_peer(), b);
        assert_eq!(session.deadline(), Timestamp::from_secs(120));
    }

    #[test]
    fn test_stranger_rejected() {
        let mut session = create_test_session(15, 15);
        let stranger = PeerId::new([9; 16]);
        assert_eq!(
            session.submit_move(&stranger, 0, 0, Timestamp::ZERO),
            Err(SessionError::UnexpectedPeer)
        );
    }

    #[test]
    fn test_vertical_win_on_150_board() {
        let mut session = create_test_session(150, 150);
        let (a, b) = peers();
        let later = Timestamp::from_secs(999);

        for (i, y) in (70..74).enumerate() {
            session.submit_move(&a, 70, y, later).unwrap();
            session.submit_move(&b, i as u32, 0, later).unwrap();
        }

        match session.submit_move(&a, 70, 74, later).unwrap() {
            MoveResult::Won { outcome: Outcome::Win { mark, winner, line }, .. } => {
                assert_eq!(mark, Mark::PlayerA);
                assert_eq!(winner, a);
                assert_eq!(line.cells, (70..75).map(|y| (70, y)).collect::<Vec<_>>());
            }
            other => panic!("expected a win, got {:?}", other),
        }
    }

    #[test]
    fn test_timeout_outcome_credits_opponent() {
        let session = create_test_session(15, 15);
        let (a, b) = peers();
        let outcome = session.timeout_outcome();
        assert_eq!(outcome, Outcome::TimeoutLoss { loser: a, mark: Mark::PlayerA });
        assert_eq!(outcome.winner(a, b), b);
    }

    #[test]
    fn test_rematch_swaps_roles() {
        let mut session = create_test_session(15, 15);
        let (a, b) = peers();
        session.submit_move(&a, 1, 1, Timestamp::ZERO).unwrap();

        let next = session.rematch(Timestamp::from_secs(300)).unwrap();
        assert_eq!(next.peer_a, b);
        assert_eq!(next.peer_b, a);
        assert_eq!(next.round, 1);
        assert_eq!(next.board().occupied(), 0);
        assert_eq!(next.current_peer(), b);
        assert_eq!(next.id, session.id);
    }
}
