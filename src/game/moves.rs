//! Move Records
//!
//! The ordered list of moves of one round. Replaying it onto a fresh board
//! reproduces the board and the winning line, which is how two clients can
//! confirm they saw the same game.

use serde::{Deserialize, Serialize};

use crate::game::board::{Board, BoardError, Mark};
use crate::game::win::{check_win, WinningLine};

/// A single accepted move.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MoveRecord {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
    /// Mark that was placed.
    pub mark: Mark,
}

/// Move log errors.
#[derive(Debug, thiserror::Error)]
pub enum MoveLogError {
    /// A move could not be placed.
    #[error("Move {index} is invalid: {source}")]
    InvalidMove {
        /// Position in the log.
        index: usize,
        /// Why the board refused it.
        #[source]
        source: BoardError,
    },

    /// Marks did not alternate starting with `PlayerA`.
    #[error("Move {index} was played out of turn")]
    OutOfTurn {
        /// Position in the log.
        index: usize,
    },

    /// The log continues after a winning move.
    #[error("Move {index} follows a completed line")]
    MoveAfterWin {
        /// Position in the log.
        index: usize,
    },

    /// Board dimensions are unusable.
    #[error("Invalid board: {0}")]
    Board(#[from] BoardError),

    /// Binary encoding failed.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Result of replaying a log.
#[derive(Debug, Clone)]
pub struct Replay {
    /// Board after the last move.
    pub board: Board,
    /// Line completed by the last move, if any.
    pub winner: Option<WinningLine>,
}

/// Ordered record of a round.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveLog {
    /// Board width the round was played on.
    pub width: u32,
    /// Board height the round was played on.
    pub height: u32,
    moves: Vec<MoveRecord>,
}

impl MoveLog {
    /// Empty log for a `width` x `height` board.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, moves: Vec::new() }
    }

    /// Append an accepted move.
    pub fn push(&mut self, record: MoveRecord) {
        self.moves.push(record);
    }

    /// Number of moves.
    pub fn len(&self) -> usize {
        self.moves.len()
    }

    /// True before the first move.
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Most recent move.
    pub fn last(&self) -> Option<&MoveRecord> {
        self.moves.last()
    }

    /// All moves in order.
    pub fn moves(&self) -> &[MoveRecord] {
        &self.moves
    }

    /// Rebuild the board from scratch and re-run win detection.
    pub fn replay(&self) -> Result<Replay, MoveLogError> {
        let mut board = Board::new(self.width, self.height)?;
        let mut winner = None;
        let mut expected = Mark::PlayerA;

        for (index, record) in self.moves.iter().enumerate() {
            if winner.is_some() {
                return Err(MoveLogError::MoveAfterWin { index });
            }
            if record.mark != expected {
                return Err(MoveLogError::OutOfTurn { index });
            }

            board
                .place(record.x, record.y, record.mark)
                .map_err(|source| MoveLogError::InvalidMove { index, source })?;
            winner = check_win(&board, record.x, record.y, record.mark);
            expected = expected.opponent();
        }

        Ok(Replay { board, winner })
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MoveLogError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, MoveLogError> {
        Ok(bincode::deserialize(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(x: u32, y: u32, mark: Mark) -> MoveRecord {
        MoveRecord { x, y, mark }
    }

    #[test]
    fn test_replay_detects_winner() {
        let mut log = MoveLog::new(15, 15);
        for i in 0..4 {
            log.push(record(i, 0, Mark::PlayerA));
            log.push(record(i, 5, Mark::PlayerB));
        }
        log.push(record(4, 0, Mark::PlayerA));

        let replay = log.replay().unwrap();
        let line = replay.winner.unwrap();
        assert_eq!(line.mark, Mark::PlayerA);
        assert_eq!(replay.board.occupied(), 9);
    }

    #[test]
    fn test_replay_rejects_out_of_turn() {
        let mut log = MoveLog::new(15, 15);
        log.push(record(0, 0, Mark::PlayerA));
        log.push(record(1, 0, Mark::PlayerA));
        assert!(matches!(log.replay(), Err(MoveLogError::OutOfTurn { index: 1 })));
    }

    #[test]
    fn test_replay_rejects_duplicate_cell() {
        let mut log = MoveLog::new(15, 15);
        log.push(record(3, 3, Mark::PlayerA));
        log.push(record(3, 3, Mark::PlayerB));
        assert!(matches!(
            log.replay(),
            Err(MoveLogError::InvalidMove { index: 1, source: BoardError::CellOccupied { .. } })
        ));
    }

    #[test]
    fn test_replay_rejects_move_after_win() {
        let mut log = MoveLog::new(15, 15);
        for i in 0..5 {
            log.push(record(i, 0, Mark::PlayerA));
            log.push(record(i, 9, Mark::PlayerB));
        }
        assert!(matches!(log.replay(), Err(MoveLogError::MoveAfterWin { index: 9 })));
    }

    #[test]
    fn test_binary_encoding_preserves_order() {
        let mut log = MoveLog::new(20, 10);
        log.push(record(7, 2, Mark::PlayerA));
        log.push(record(1, 9, Mark::PlayerB));

        let bytes = log.to_bytes().unwrap();
        let parsed = MoveLog::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, log);
        assert_eq!(parsed.last(), Some(&record(1, 9, Mark::PlayerB)));
    }

    #[test]
    fn test_decoded_log_with_bad_dimensions_fails_replay() {
        let mut log = MoveLog::new(0, u32::MAX);
        log.push(record(0, 0, Mark::PlayerA));

        let parsed = MoveLog::from_bytes(&log.to_bytes().unwrap()).unwrap();
        assert!(matches!(
            parsed.replay(),
            Err(MoveLogError::Board(BoardError::InvalidDimensions { width: 0, height: u32::MAX }))
        ));
    }

    #[test]
    fn test_decoded_log_with_stray_cell_fails_replay() {
        let mut log = MoveLog::new(5, 5);
        log.push(record(5, 0, Mark::PlayerA));

        let parsed = MoveLog::from_bytes(&log.to_bytes().unwrap()).unwrap();
        assert!(matches!(
            parsed.replay(),
            Err(MoveLogError::InvalidMove { index: 0, source: BoardError::OutOfBounds { x: 5, y: 0 } })
        ));
    }
}
