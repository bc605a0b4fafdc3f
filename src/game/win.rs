//! Win Detection
//!
//! Only the four lines through the last placed stone are scanned, so a
//! check costs O(board span) regardless of how full the board is.

use serde::{Deserialize, Serialize};

use crate::game::board::{Board, Mark};

/// Stones in a row needed to win.
pub const WIN_LENGTH: usize = 5;

/// Axis of a line through a point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Along a row.
    Horizontal,
    /// Along a column.
    Vertical,
    /// Top-left to bottom-right.
    Diagonal,
    /// Bottom-left to top-right.
    AntiDiagonal,
}

impl Direction {
    /// All directions, in the order they are checked.
    pub const ALL: [Direction; 4] = [
        Direction::Horizontal,
        Direction::Vertical,
        Direction::Diagonal,
        Direction::AntiDiagonal,
    ];

    /// Unit step `(dx, dy)` along this axis.
    #[inline]
    pub const fn step(self) -> (i64, i64) {
        match self {
            Direction::Horizontal => (1, 0),
            Direction::Vertical => (0, 1),
            Direction::Diagonal => (1, 1),
            Direction::AntiDiagonal => (1, -1),
        }
    }
}

/// A run of at least `WIN_LENGTH` same-mark cells.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinningLine {
    /// Mark that owns the line.
    pub mark: Mark,
    /// Axis of the line.
    pub direction: Direction,
    /// Every cell of the run, ordered along `direction`.
    pub cells: Vec<(u32, u32)>,
}

impl WinningLine {
    /// Number of cells in the run.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Always false; a winning line has at least `WIN_LENGTH` cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// True if `(x, y)` is part of the run.
    pub fn contains(&self, x: u32, y: u32) -> bool {
        self.cells.contains(&(x, y))
    }
}

/// Count matching cells from `(x, y)` (exclusive) along `(dx, dy)`.
fn run_length(board: &Board, x: i64, y: i64, dx: i64, dy: i64, mark: Mark) -> i64 {
    let mut n = 0;
    while board.peek(x + dx * (n + 1), y + dy * (n + 1)) == mark {
        n += 1;
    }
    n
}

/// Check whether the stone just placed at `(x, y)` completes a line.
///
/// Returns `None` if the cell does not hold `mark`, or if no line through
/// it reaches `WIN_LENGTH`. Directions are tried in `Direction::ALL`
/// order and the first winning one is returned.
pub fn check_win(board: &Board, x: u32, y: u32, mark: Mark) -> Option<WinningLine> {
    if !mark.is_player() {
        return None;
    }

    let (x, y) = (i64::from(x), i64::from(y));
    if board.peek(x, y) != mark {
        return None;
    }

    for direction in Direction::ALL {
        let (dx, dy) = direction.step();
        let back = run_length(board, x, y, -dx, -dy, mark);
        let forward = run_length(board, x, y, dx, dy, mark);

        if (back + forward + 1) as usize >= WIN_LENGTH {
            // Every visited cell matched `mark`, so all of them are on the grid.
            let cells = (-back..=forward)
                .map(|i| ((x + dx * i) as u32, (y + dy * i) as u32))
                .collect();
            return Some(WinningLine { mark, direction, cells });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn board_with(width: u32, height: u32, stones: &[(u32, u32, Mark)]) -> Board {
        let mut board = Board::new(width, height).unwrap();
        for &(x, y, mark) in stones {
            board.place(x, y, mark).unwrap();
        }
        board
    }

    #[test]
    fn test_vertical_win_on_large_board() {
        let stones: Vec<_> = (70..75).map(|y| (70, y, Mark::PlayerA)).collect();
        let board = board_with(150, 150, &stones);

        let line = check_win(&board, 70, 74, Mark::PlayerA).unwrap();
        assert_eq!(line.direction, Direction::Vertical);
        assert_eq!(line.mark, Mark::PlayerA);
        assert_eq!(line.cells, vec![(70, 70), (70, 71), (70, 72), (70, 73), (70, 74)]);
    }

    #[test]
    fn test_four_is_not_enough() {
        let stones: Vec<_> = (0..4).map(|x| (x, 3, Mark::PlayerB)).collect();
        let board = board_with(15, 15, &stones);
        for x in 0..4 {
            assert!(check_win(&board, x, 3, Mark::PlayerB).is_none());
        }
    }

    #[test]
    fn test_win_from_middle_of_run() {
        // Gap filled last at the centre
        let board = board_with(
            15,
            15,
            &[
                (3, 3, Mark::PlayerA),
                (4, 4, Mark::PlayerA),
                (5, 5, Mark::PlayerA),
                (6, 6, Mark::PlayerA),
                (7, 7, Mark::PlayerA),
            ],
        );
        let line = check_win(&board, 5, 5, Mark::PlayerA).unwrap();
        assert_eq!(line.direction, Direction::Diagonal);
        assert_eq!(line.cells.first(), Some(&(3, 3)));
        assert_eq!(line.cells.last(), Some(&(7, 7)));
    }

    #[test]
    fn test_anti_diagonal_touching_edges() {
        // From (0, 4) up to (4, 0) on a 5x5 board
        let stones: Vec<_> = (0..5).map(|i| (i, 4 - i, Mark::PlayerB)).collect();
        let board = board_with(5, 5, &stones);
        let line = check_win(&board, 0, 4, Mark::PlayerB).unwrap();
        assert_eq!(line.direction, Direction::AntiDiagonal);
        assert_eq!(line.len(), 5);
        assert!(line.contains(4, 0));
    }

    #[test]
    fn test_overline_counts_and_reports_all_cells() {
        let stones: Vec<_> = (2..9).map(|x| (x, 0, Mark::PlayerA)).collect();
        let board = board_with(15, 15, &stones);
        let line = check_win(&board, 8, 0, Mark::PlayerA).unwrap();
        assert_eq!(line.len(), 7);
    }

    #[test]
    fn test_opponent_stone_breaks_run() {
        let board = board_with(
            15,
            15,
            &[
                (0, 0, Mark::PlayerA),
                (1, 0, Mark::PlayerA),
                (2, 0, Mark::PlayerB),
                (3, 0, Mark::PlayerA),
                (4, 0, Mark::PlayerA),
                (5, 0, Mark::PlayerA),
            ],
        );
        assert!(check_win(&board, 5, 0, Mark::PlayerA).is_none());
    }

    #[test]
    fn test_wrong_mark_or_empty() {
        let stones: Vec<_> = (0..5).map(|x| (x, 0, Mark::PlayerA)).collect();
        let board = board_with(15, 15, &stones);
        assert!(check_win(&board, 4, 0, Mark::PlayerB).is_none());
        assert!(check_win(&board, 4, 0, Mark::Empty).is_none());
        assert!(check_win(&board, 4, 1, Mark::PlayerA).is_none());
    }

    proptest! {
        #[test]
        fn prop_win_iff_run_reaches_five(
            len in 1u32..9,
            start in 0u32..20,
            fixed in 0u32..20,
            dir in 0usize..4,
            pick in 0u32..9,
        ) {
            let direction = Direction::ALL[dir];
            let (dx, dy) = direction.step();
            // Anti-diagonal walks upward, so anchor it low enough to fit
            let (ox, oy) = match direction {
                Direction::Horizontal => (start, fixed),
                Direction::Vertical => (fixed, start),
                Direction::Diagonal => (start, fixed),
                Direction::AntiDiagonal => (start, fixed + len),
            };
            let mut board = Board::new(30, 30).unwrap();
            let mut cells = Vec::new();
            for i in 0..len as i64 {
                let x = (i64::from(ox) + dx * i) as u32;
                let y = (i64::from(oy) + dy * i) as u32;
                board.place(x, y, Mark::PlayerA).unwrap();
                cells.push((x, y));
            }

            let (px, py) = cells[(pick % len) as usize];
            let result = check_win(&board, px, py, Mark::PlayerA);
            if len as usize >= WIN_LENGTH {
                let line = result.unwrap();
                prop_assert_eq!(line.direction, direction);
                prop_assert_eq!(line.cells, cells);
            } else {
                prop_assert!(result.is_none());
            }
        }

        #[test]
        fn prop_lines_stay_in_bounds(
            stones in prop::collection::vec((0u32..8, 0u32..8), 1..64)
        ) {
            let mut board = Board::new(8, 8).unwrap();
            for (x, y) in stones {
                if board.place(x, y, Mark::PlayerA).is_err() {
                    continue;
                }
                if let Some(line) = check_win(&board, x, y, Mark::PlayerA) {
                    prop_assert!(line.len() >= WIN_LENGTH);
                    prop_assert!(line.contains(x, y));
                    for (cx, cy) in line.cells {
                        prop_assert!(cx < 8 && cy < 8);
                        prop_assert_eq!(board.get(cx, cy).unwrap(), Mark::PlayerA);
                    }
                }
            }
        }
    }
}
