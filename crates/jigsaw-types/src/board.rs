//! Board, grid, and piece types.
//!
//! The board is a fixed `ySize × xSize` grid of pieces. Pieces move between
//! cells when swapped; the cell a piece sits in always matches its `currPos`.
//!
//! ## Copy-on-write
//!
//! [`Grid`] stores rows as `Arc<Vec<Piece>>` inside an `Arc`. Cloning a board
//! is a handful of refcount bumps, and [`Grid::piece_mut`] only copies the
//! row it touches (plus the row table). Consumers detect change cheaply with
//! [`Grid::row_shared_with`] / [`Board::users_shared_with`].
//!
//! ```text
//! Board v1 ── rows ──► [ r0 ][ r1 ][ r2 ]
//!                          ▲          ▲
//! Board v2 ── rows ──► [ r0 ][ r1'][ r2 ]   (swap touched row 1 only)
//! ```

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ids::{optional_user, PuzzleId, UserId};
use crate::user::User;

/// A cell coordinate. `x` is the column, `y` the row.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(rename = "X")]
    pub x: u32,
    #[serde(rename = "Y")]
    pub y: u32,
}

impl Position {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// One puzzle piece.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Piece {
    /// Where the piece currently sits on the board.
    pub curr_pos: Position,
    /// Image asset path for this piece.
    pub image: String,
    /// User currently holding the piece, `None` when free.
    #[serde(with = "optional_user", default)]
    pub held_by: Option<UserId>,
}

impl Piece {
    pub fn new(curr_pos: Position, image: impl Into<String>) -> Self {
        Self {
            curr_pos,
            image: image.into(),
            held_by: None,
        }
    }
}

/// The piece grid, indexed `[y][x]`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Grid {
    rows: Arc<Vec<Arc<Vec<Piece>>>>,
}

impl Grid {
    /// Build a grid from plain rows.
    pub fn new(rows: Vec<Vec<Piece>>) -> Self {
        Self {
            rows: Arc::new(rows.into_iter().map(Arc::new).collect()),
        }
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Rows, for rendering.
    pub fn rows(&self) -> &[Arc<Vec<Piece>>] {
        &self.rows
    }

    pub fn contains(&self, pos: Position) -> bool {
        self.get(pos).is_some()
    }

    /// The piece at `pos`, if in bounds.
    pub fn get(&self, pos: Position) -> Option<&Piece> {
        self.rows
            .get(pos.y as usize)
            .and_then(|row| row.get(pos.x as usize))
    }

    /// Mutable access to the piece at `pos`, copying the row if it is shared.
    pub fn piece_mut(&mut self, pos: Position) -> Option<&mut Piece> {
        if !self.contains(pos) {
            return None;
        }
        let rows = Arc::make_mut(&mut self.rows);
        let row = Arc::make_mut(&mut rows[pos.y as usize]);
        row.get_mut(pos.x as usize)
    }

    /// Whether row `y` is the very same allocation in both grids.
    pub fn row_shared_with(&self, other: &Grid, y: usize) -> bool {
        match (self.rows.get(y), other.rows.get(y)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Iterate every piece together with the cell it occupies.
    pub fn cells(&self) -> impl Iterator<Item = (Position, &Piece)> {
        self.rows.iter().enumerate().flat_map(|(y, row)| {
            row.iter()
                .enumerate()
                .map(move |(x, piece)| (Position::new(x as u32, y as u32), piece))
        })
    }
}

/// Structural problems found in a board received from the server.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    #[error("grid has {got} rows, expected {expected}")]
    RowCount { expected: u32, got: usize },
    #[error("row {row} has {got} pieces, expected {expected}")]
    RowLength { row: usize, expected: u32, got: usize },
    #[error("size {size} does not match {x_size}x{y_size} grid")]
    SizeMismatch { size: u32, x_size: u32, y_size: u32 },
    #[error("piecesCorrect {correct} exceeds size {size}")]
    CorrectOutOfRange { correct: u32, size: u32 },
    #[error("piece in cell {cell} claims position {claimed}")]
    Misplaced { cell: Position, claimed: Position },
}

/// The shared puzzle board and its session metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: PuzzleId,
    pub pieces: Grid,
    /// Total piece count (`xSize * ySize`).
    pub size: u32,
    /// Pieces currently in their destination cell.
    pub pieces_correct: u32,
    /// Id the server will assign to its next mutation.
    #[serde(rename = "nextUpdateID")]
    pub next_update_id: u64,
    pub x_size: u32,
    pub y_size: u32,
    #[serde(default)]
    pub image_width: u32,
    #[serde(default)]
    pub image_height: u32,
    #[serde(default)]
    pub last_updated: String,
    /// Users present in the session, in join order.
    #[serde(default)]
    pub current_users: Arc<IndexMap<UserId, User>>,
}

impl Board {
    /// Build a board around `rows`; counters start at zero.
    pub fn new(id: impl Into<PuzzleId>, rows: Vec<Vec<Piece>>) -> Self {
        let y_size = rows.len() as u32;
        let x_size = rows.first().map(|r| r.len() as u32).unwrap_or(0);
        Self {
            id: id.into(),
            pieces: Grid::new(rows),
            size: x_size * y_size,
            pieces_correct: 0,
            next_update_id: 0,
            x_size,
            y_size,
            image_width: 0,
            image_height: 0,
            last_updated: String::new(),
            current_users: Arc::new(IndexMap::new()),
        }
    }

    /// Every piece is in its destination cell.
    pub fn is_complete(&self) -> bool {
        self.pieces_correct == self.size
    }

    pub fn piece(&self, pos: Position) -> Option<&Piece> {
        self.pieces.get(pos)
    }

    pub fn contains(&self, pos: Position) -> bool {
        self.pieces.contains(pos)
    }

    /// Whether both boards share one user map allocation.
    pub fn users_shared_with(&self, other: &Board) -> bool {
        Arc::ptr_eq(&self.current_users, &other.current_users)
    }

    /// Mutable user map, copied if shared.
    pub fn users_mut(&mut self) -> &mut IndexMap<UserId, User> {
        Arc::make_mut(&mut self.current_users)
    }

    /// Check the structural invariants of a freshly received board.
    pub fn validate(&self) -> Result<(), BoardError> {
        if self.pieces.height() != self.y_size as usize {
            return Err(BoardError::RowCount {
                expected: self.y_size,
                got: self.pieces.height(),
            });
        }
        for (y, row) in self.pieces.rows().iter().enumerate() {
            if row.len() != self.x_size as usize {
                return Err(BoardError::RowLength {
                    row: y,
                    expected: self.x_size,
                    got: row.len(),
                });
            }
        }
        if self.size != self.x_size * self.y_size {
            return Err(BoardError::SizeMismatch {
                size: self.size,
                x_size: self.x_size,
                y_size: self.y_size,
            });
        }
        if self.pieces_correct > self.size {
            return Err(BoardError::CorrectOutOfRange {
                correct: self.pieces_correct,
                size: self.size,
            });
        }
        for (cell, piece) in self.pieces.cells() {
            if piece.curr_pos != cell {
                return Err(BoardError::Misplaced {
                    cell,
                    claimed: piece.curr_pos,
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
