//! Mutation applier: `(board, scores, mutation) → (board', scores')`.
//!
//! Pure and synchronous. The input board is never touched; the result is a
//! clone that shares every row and map the mutation did not modify (see
//! [`jigsaw_types::Grid`]). Invalid input produces an [`ApplyError`] and no
//! new board, so a bad mutation can never leave the replica with duplicate
//! positions or an out-of-range counter.
//!
//! | Kind  | Grid                         | Counters / users            |
//! |-------|------------------------------|-----------------------------|
//! | Swap  | exchange pieces, release both | `piecesCorrect += delta`, score |
//! | Hold  | set / clear `heldBy`         | -                           |
//! | Join  | -                            | insert user record          |
//! | Leave | -                            | remove user (idempotent)    |
//!
//! Every applied mutation advances `nextUpdateID` to at least `id + 1`.

use jigsaw_types::{Board, Mutation, MutationKind, Piece, Position, User, UserId};
use tracing::trace;

use crate::score::ScoreTable;

/// Why a mutation was not applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    #[error("position {pos} is outside the {x_size}x{y_size} board")]
    OutOfBounds {
        pos: Position,
        x_size: u32,
        y_size: u32,
    },
    #[error("delta {delta} would move piecesCorrect {correct} outside 0..={size}")]
    CounterOutOfRange { delta: i32, correct: u32, size: u32 },
    #[error("join for {user} has no user record")]
    MissingProfile { user: UserId },
    #[error("user record {got} does not match joining user {expected}")]
    ProfileMismatch { expected: UserId, got: UserId },
}

/// The next board and score table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub board: Board,
    pub scores: ScoreTable,
}

/// Apply one mutation.
///
/// `profile` is the full user record for a Join; the other kinds ignore it.
/// A Join for a user already on the board needs no profile.
pub fn apply(
    board: &Board,
    scores: &ScoreTable,
    mutation: &Mutation,
    profile: Option<&User>,
) -> Result<Applied, ApplyError> {
    let mut next = board.clone();
    let mut scores = scores.clone();

    match &mutation.kind {
        MutationKind::Swap { a, b, user, delta } => {
            check_bounds(board, *a)?;
            check_bounds(board, *b)?;
            next.pieces_correct = adjusted_correct(board, *delta)?;
            swap(&mut next, *a, *b);
            scores.record(user, *delta);
            trace!(
                "Applied swap {} {} <-> {} by {} (delta {}, correct {}/{})",
                mutation.id, a, b, user, delta, next.pieces_correct, next.size
            );
        }
        MutationKind::Hold { pos, user } => {
            check_bounds(board, *pos)?;
            if let Some(piece) = next.pieces.piece_mut(*pos) {
                piece.held_by = user.clone();
            }
            trace!("Applied hold {} at {} by {:?}", mutation.id, pos, user);
        }
        MutationKind::Join { user } => {
            match profile {
                Some(record) if &record.id != user => {
                    return Err(ApplyError::ProfileMismatch {
                        expected: user.clone(),
                        got: record.id.clone(),
                    });
                }
                Some(record) => {
                    next.users_mut().insert(user.clone(), record.clone());
                }
                None if board.current_users.contains_key(user) => {}
                None => return Err(ApplyError::MissingProfile { user: user.clone() }),
            }
            trace!("Applied join {} for {}", mutation.id, user);
        }
        MutationKind::Leave { user } => {
            // only copy the user map when there is something to remove
            if next.current_users.contains_key(user) {
                next.users_mut().shift_remove(user);
            }
            trace!("Applied leave {} for {}", mutation.id, user);
        }
    }

    next.next_update_id = next.next_update_id.max(mutation.id.saturating_add(1));
    Ok(Applied {
        board: next,
        scores,
    })
}

fn check_bounds(board: &Board, pos: Position) -> Result<(), ApplyError> {
    if board.contains(pos) {
        Ok(())
    } else {
        Err(ApplyError::OutOfBounds {
            pos,
            x_size: board.x_size,
            y_size: board.y_size,
        })
    }
}

fn adjusted_correct(board: &Board, delta: i32) -> Result<u32, ApplyError> {
    let value = i64::from(board.pieces_correct) + i64::from(delta);
    if (0..=i64::from(board.size)).contains(&value) {
        Ok(value as u32)
    } else {
        Err(ApplyError::CounterOutOfRange {
            delta,
            correct: board.pieces_correct,
            size: board.size,
        })
    }
}

/// Move the piece at `a` to `b` and vice versa, releasing both. Each piece
/// takes the other's prior position, so cells and positions stay in
/// agreement. `a == b` only releases.
fn swap(board: &mut Board, a: Position, b: Position) {
    if a == b {
        if let Some(piece) = board.pieces.piece_mut(a) {
            piece.held_by = None;
        }
        return;
    }
    let (Some(from_a), Some(from_b)) = (board.piece(a).cloned(), board.piece(b).cloned()) else {
        return;
    };
    if let Some(cell) = board.pieces.piece_mut(a) {
        *cell = Piece {
            curr_pos: a,
            held_by: None,
            ..from_b
        };
    }
    if let Some(cell) = board.pieces.piece_mut(b) {
        *cell = Piece {
            curr_pos: b,
            held_by: None,
            ..from_a
        };
    }
}

// ============================================================================
// Tests
// ============================================================================
