//! Typed identifiers for puzzles and users.
//!
//! Both wrap the opaque strings the server hands out (UUID text for users,
//! upload ids for puzzles). They never get parsed; the newtypes only keep a
//! puzzle id from being passed where a user id is expected.
//!
//! On the wire an unheld piece carries `heldBy: ""`. [`optional_user`] maps
//! that empty string to `None` so the rest of the code never compares
//! against `""`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A user identifier.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

/// A puzzle (board) identifier.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PuzzleId(String);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_typed_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Wrap a raw identifier.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// The raw identifier text.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// First 8 characters, for human display only (not lookup).
            pub fn short(&self) -> &str {
                match self.0.char_indices().nth(8) {
                    Some((idx, _)) => &self.0[..idx],
                    None => &self.0,
                }
            }

            /// Whether the identifier is the empty string.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl From<&str> for $T {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $T {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $T {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.short())
            }
        }
    };
}

impl_typed_id!(UserId, "UserId");
impl_typed_id!(PuzzleId, "PuzzleId");

/// Serde adapter: `Option<UserId>` ⇄ user id string, empty = `None`.
pub mod optional_user {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::UserId;

    pub fn serialize<S: Serializer>(value: &Option<UserId>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(value.as_ref().map(UserId::as_str).unwrap_or(""))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<UserId>, D::Error> {
        let raw = Option::<String>::deserialize(d)?.unwrap_or_default();
        Ok(if raw.is_empty() { None } else { Some(UserId::new(raw)) })
    }
}
