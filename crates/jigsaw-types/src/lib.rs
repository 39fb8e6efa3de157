//! Shared types for the jigsaw client.
//!
//! A pure leaf crate: identifiers, the board model, user records, and the
//! mutation wire format. No I/O, no async.
//!
//! # Overview
//!
//! ```text
//! Board (PuzzleId)
//!     └── Grid ── rows of Piece (currPos, image, heldBy)
//!     └── currentUsers: UserId → User
//!     └── nextUpdateID ── cursor into the server's mutation sequence
//!
//! Mutation (id, kind)
//!     └── Swap  { a, b, user, delta }
//!     └── Hold  { pos, user? }
//!     └── Join  { user }
//!     └── Leave { user }
//! ```
//!
//! # Key Types
//!
//! |--------------------|------------------------------------------------|
//! | Type               | Purpose                                        |
//! |--------------------|------------------------------------------------|
//! | [`Board`]          | Full board snapshot / local replica            |
//! | [`Grid`]           | Copy-on-write piece rows                       |
//! | [`Piece`]          | One piece: position, image, holder             |
//! | [`User`]           | Player record                                  |
//! | [`MutationRecord`] | Server wire format                             |
//! | [`Mutation`]       | Checked, typed mutation                        |
//! | [`HoldRequest`]    | Client → server hold request                   |
//! |--------------------|------------------------------------------------|

pub mod board;
pub mod ids;
pub mod mutation;
pub mod user;

pub use board::{Board, BoardError, Grid, Piece, Position};
pub use ids::{PuzzleId, UserId};
pub use mutation::{Action, HoldRequest, Mutation, MutationError, MutationKind, MutationRecord};
pub use user::User;
