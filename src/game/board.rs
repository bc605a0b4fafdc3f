//! Board Model
//!
//! Dense row-major grid of marks. `place` is the only mutator and a cell
//! can be written once per board.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Largest accepted side length. Board sizes arrive from remote peers.
pub const MAX_DIMENSION: u32 = 1024;

/// Check a `width` x `height` board can be created.
pub fn validate_dimensions(width: u32, height: u32) -> Result<(), BoardError> {
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(BoardError::InvalidDimensions { width, height });
    }
    Ok(())
}

/// Occupant of a board cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Mark {
    /// Nobody has played here.
    #[default]
    Empty = 0,
    /// The player who moves first in a round.
    PlayerA = 1,
    /// The player who moves second in a round.
    PlayerB = 2,
}

impl Mark {
    /// The other player's mark. `Empty` has no opponent.
    pub fn opponent(self) -> Mark {
        match self {
            Mark::PlayerA => Mark::PlayerB,
            Mark::PlayerB => Mark::PlayerA,
            Mark::Empty => Mark::Empty,
        }
    }

    /// True for `PlayerA` and `PlayerB`.
    #[inline]
    pub fn is_player(self) -> bool {
        self != Mark::Empty
    }
}

/// Board errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    /// Width or height is zero or above `MAX_DIMENSION`.
    #[error("Invalid board dimensions {width}x{height}")]
    InvalidDimensions {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
    },

    /// Coordinate outside the grid.
    #[error("Coordinate ({x}, {y}) is out of bounds")]
    OutOfBounds {
        /// Column.
        x: u32,
        /// Row.
        y: u32,
    },

    /// Cell already holds a mark.
    #[error("Cell ({x}, {y}) is already occupied")]
    CellOccupied {
        /// Column.
        x: u32,
        /// Row.
        y: u32,
    },

    /// Only player marks can be placed.
    #[error("Cannot place an empty mark")]
    EmptyMark,
}

/// A fixed-size board. Built only through `Board::new`; a stored round is
/// a `MoveLog` that replays onto a fresh board.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Board {
    width: u32,
    height: u32,
    cells: Vec<Mark>,
    occupied: u32,
}

impl Board {
    /// Create an empty board.
    pub fn new(width: u32, height: u32) -> Result<Self, BoardError> {
        validate_dimensions(width, height)?;

        Ok(Self {
            width,
            height,
            cells: vec![Mark::Empty; width as usize * height as usize],
            occupied: 0,
        })
    }

    /// Board width.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Board height.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of occupied cells.
    pub fn occupied(&self) -> u32 {
        self.occupied
    }

    /// True when no empty cell is left.
    pub fn is_full(&self) -> bool {
        self.occupied as usize == self.cells.len()
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> Result<usize, BoardError> {
        if x >= self.width || y >= self.height {
            return Err(BoardError::OutOfBounds { x, y });
        }
        Ok(y as usize * self.width as usize + x as usize)
    }

    /// Mark at `(x, y)`.
    pub fn get(&self, x: u32, y: u32) -> Result<Mark, BoardError> {
        let idx = self.index(x, y)?;
        Ok(self.cells[idx])
    }

    /// Edge-safe read for scanning. Anything off the grid reads as `Empty`.
    #[inline]
    pub fn peek(&self, x: i64, y: i64) -> Mark {
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            return Mark::Empty;
        }
        self.cells[y as usize * self.width as usize + x as usize]
    }

    /// Write `mark` into an empty cell.
    ///
    /// Fails without touching the board if the cell is off the grid or
    /// already taken, so retrying the same cell always fails.
    pub fn place(&mut self, x: u32, y: u32, mark: Mark) -> Result<(), BoardError> {
        if !mark.is_player() {
            return Err(BoardError::EmptyMark);
        }

        let idx = self.index(x, y)?;
        if self.cells[idx] != Mark::Empty {
            return Err(BoardError::CellOccupied { x, y });
        }

        self.cells[idx] = mark;
        self.occupied += 1;
        Ok(())
    }

    /// SHA-256 over dimensions and cells, for comparing two clients' boards.
    pub fn state_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"GOMOKU_BOARD_V1");
        hasher.update(self.width.to_le_bytes());
        hasher.update(self.height.to_le_bytes());
        for cell in &self.cells {
            hasher.update([*cell as u8]);
        }
        hasher.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_new_board_is_empty() {
        let board = Board::new(15, 10).unwrap();
        assert_eq!(board.width(), 15);
        assert_eq!(board.height(), 10);
        assert_eq!(board.occupied(), 0);
        assert_eq!(board.get(14, 9).unwrap(), Mark::Empty);
    }

    #[test]
    fn test_invalid_dimensions() {
        assert!(matches!(Board::new(0, 5), Err(BoardError::InvalidDimensions { .. })));
        assert!(matches!(Board::new(5, 0), Err(BoardError::InvalidDimensions { .. })));
        assert!(matches!(
            Board::new(MAX_DIMENSION + 1, 5),
            Err(BoardError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_get_never_clamps() {
        let board = Board::new(3, 3).unwrap();
        assert_eq!(board.get(3, 0), Err(BoardError::OutOfBounds { x: 3, y: 0 }));
        assert_eq!(board.get(0, 3), Err(BoardError::OutOfBounds { x: 0, y: 3 }));
    }

    #[test]
    fn test_peek_off_grid_is_empty() {
        let mut board = Board::new(3, 3).unwrap();
        board.place(0, 0, Mark::PlayerA).unwrap();
        assert_eq!(board.peek(0, 0), Mark::PlayerA);
        assert_eq!(board.peek(-1, 0), Mark::Empty);
        assert_eq!(board.peek(0, -1), Mark::Empty);
        assert_eq!(board.peek(3, 0), Mark::Empty);
    }

    #[test]
    fn test_place_rejects_occupied() {
        let mut board = Board::new(5, 5).unwrap();
        board.place(2, 2, Mark::PlayerA).unwrap();

        assert_eq!(
            board.place(2, 2, Mark::PlayerB),
            Err(BoardError::CellOccupied { x: 2, y: 2 })
        );
        assert_eq!(
            board.place(2, 2, Mark::PlayerA),
            Err(BoardError::CellOccupied { x: 2, y: 2 })
        );
        assert_eq!(board.get(2, 2).unwrap(), Mark::PlayerA);
        assert_eq!(board.occupied(), 1);
    }

    #[test]
    fn test_place_rejects_empty_mark_and_out_of_bounds() {
        let mut board = Board::new(5, 5).unwrap();
        assert_eq!(board.place(1, 1, Mark::Empty), Err(BoardError::EmptyMark));
        assert_eq!(
            board.place(5, 1, Mark::PlayerA),
            Err(BoardError::OutOfBounds { x: 5, y: 1 })
        );
        assert_eq!(board.occupied(), 0);
    }

    #[test]
    fn test_state_hash_tracks_cells() {
        let mut a = Board::new(5, 5).unwrap();
        let mut b = Board::new(5, 5).unwrap();
        assert_eq!(a.state_hash(), b.state_hash());

        a.place(1, 1, Mark::PlayerA).unwrap();
        assert_ne!(a.state_hash(), b.state_hash());

        b.place(1, 1, Mark::PlayerA).unwrap();
        assert_eq!(a.state_hash(), b.state_hash());
    }

    #[test]
    fn test_full_board() {
        let mut board = Board::new(2, 1).unwrap();
        board.place(0, 0, Mark::PlayerA).unwrap();
        assert!(!board.is_full());
        board.place(1, 0, Mark::PlayerB).unwrap();
        assert!(board.is_full());
    }

    proptest! {
        #[test]
        fn prop_occupied_cell_never_overwritten(
            moves in prop::collection::vec((0u32..12, 0u32..12, any::<bool>()), 1..200)
        ) {
            let mut board = Board::new(12, 12).unwrap();
            let mut first: std::collections::HashMap<(u32, u32), Mark> = Default::default();

            for (x, y, a) in moves {
                let mark = if a { Mark::PlayerA } else { Mark::PlayerB };
                let result = board.place(x, y, mark);
                if first.contains_key(&(x, y)) {
                    prop_assert_eq!(result, Err(BoardError::CellOccupied { x, y }));
                } else {
                    prop_assert!(result.is_ok());
                    first.insert((x, y), mark);
                }
            }

            for ((x, y), mark) in first {
                prop_assert_eq!(board.get(x, y).unwrap(), mark);
            }
        }
    }
}
