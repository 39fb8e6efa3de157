//! User records.
//!
//! A `User` is owned by the identity service; the client only reads it. It
//! arrives either embedded in a board snapshot (`currentUsers`) or from
//! `GET /users/{id}` when someone joins.

use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// A registered player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    /// Display name chosen at sign-up.
    pub name: String,
    /// Creation timestamp as sent by the server (RFC 3339).
    #[serde(default)]
    pub created: String,
    /// Pieces placed correctly across every puzzle this user played.
    #[serde(default)]
    pub lifetime_pieces: i64,
}

impl User {
    /// Create a user record with no history.
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            created: String::new(),
            lifetime_pieces: 0,
        }
    }
}

impl std::fmt::Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id.short())
    }
}
