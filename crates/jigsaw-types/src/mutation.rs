//! Board mutations: the server-ordered feed and the client's hold request.
//!
//! The server pushes [`MutationRecord`]s, one JSON object per stream message:
//!
//! ```json
//! {"id": 12, "action": 0, "userID": "u1",
//!  "piece1Pos": {"X": 0, "Y": 1}, "piece2Pos": {"X": 2, "Y": 0}, "delta": 1}
//! ```
//!
//! Fields a kind does not use are zero-valued. [`Mutation`] is the checked,
//! typed form; converting a record rejects unknown action codes and missing
//! user ids so the applier only ever sees well-formed input.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::board::Position;
use crate::ids::UserId;

/// Wire action codes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Display, EnumString, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[strum(serialize_all = "snake_case")]
pub enum Action {
    Swap = 0,
    Hold = 1,
    Join = 2,
    Leave = 3,
}

impl TryFrom<u8> for Action {
    type Error = MutationError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Action::Swap),
            1 => Ok(Action::Hold),
            2 => Ok(Action::Join),
            3 => Ok(Action::Leave),
            other => Err(MutationError::UnknownAction(other)),
        }
    }
}

impl From<Action> for u8 {
    fn from(action: Action) -> u8 {
        action as u8
    }
}

/// Why an inbound message could not become a [`Mutation`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutationError {
    #[error("unknown action code {0}")]
    UnknownAction(u8),
    #[error("{action} mutation {id} has no user id")]
    MissingUser { id: u64, action: Action },
    #[error("invalid mutation payload: {0}")]
    Decode(String),
}

/// A mutation exactly as the server serializes it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRecord {
    pub id: u64,
    pub action: u8,
    #[serde(rename = "userID", default)]
    pub user_id: String,
    #[serde(default)]
    pub piece1_pos: Position,
    #[serde(default)]
    pub piece2_pos: Position,
    /// Change in `piecesCorrect` caused by a swap.
    #[serde(default)]
    pub delta: i32,
}

/// What a mutation does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationKind {
    /// Exchange the pieces at `a` and `b`, releasing both. `a == b` releases
    /// the single piece without moving it.
    Swap {
        a: Position,
        b: Position,
        user: UserId,
        delta: i32,
    },
    /// Claim (`Some`) or release (`None`) the piece at `pos`.
    Hold { pos: Position, user: Option<UserId> },
    /// `user` entered the session.
    Join { user: UserId },
    /// `user` left the session.
    Leave { user: UserId },
}

/// A checked, server-ordered board mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mutation {
    /// Sequence id assigned by the server, strictly increasing.
    pub id: u64,
    pub kind: MutationKind,
}

impl Mutation {
    pub fn new(id: u64, kind: MutationKind) -> Self {
        Self { id, kind }
    }

    /// Decode one stream message.
    pub fn parse(text: &str) -> Result<Self, MutationError> {
        let record: MutationRecord =
            serde_json::from_str(text).map_err(|e| MutationError::Decode(e.to_string()))?;
        Self::try_from(record)
    }

    pub fn action(&self) -> Action {
        match self.kind {
            MutationKind::Swap { .. } => Action::Swap,
            MutationKind::Hold { .. } => Action::Hold,
            MutationKind::Join { .. } => Action::Join,
            MutationKind::Leave { .. } => Action::Leave,
        }
    }

    /// The user the mutation is attributed to, if any.
    pub fn user(&self) -> Option<&UserId> {
        match &self.kind {
            MutationKind::Swap { user, .. }
            | MutationKind::Join { user }
            | MutationKind::Leave { user } => Some(user),
            MutationKind::Hold { user, .. } => user.as_ref(),
        }
    }
}

impl TryFrom<MutationRecord> for Mutation {
    type Error = MutationError;

    fn try_from(record: MutationRecord) -> Result<Self, Self::Error> {
        let action = Action::try_from(record.action)?;
        let user = if record.user_id.is_empty() {
            None
        } else {
            Some(UserId::new(record.user_id))
        };
        let required = |user: Option<UserId>| {
            user.ok_or(MutationError::MissingUser {
                id: record.id,
                action,
            })
        };
        let kind = match action {
            Action::Swap => MutationKind::Swap {
                a: record.piece1_pos,
                b: record.piece2_pos,
                user: required(user)?,
                delta: record.delta,
            },
            Action::Hold => MutationKind::Hold {
                pos: record.piece1_pos,
                user,
            },
            Action::Join => MutationKind::Join {
                user: required(user)?,
            },
            Action::Leave => MutationKind::Leave {
                user: required(user)?,
            },
        };
        Ok(Mutation { id: record.id, kind })
    }
}

impl From<&Mutation> for MutationRecord {
    fn from(m: &Mutation) -> Self {
        let mut record = MutationRecord {
            id: m.id,
            action: m.action().into(),
            user_id: m.user().map(|u| u.as_str().to_owned()).unwrap_or_default(),
            ..Default::default()
        };
        match &m.kind {
            MutationKind::Swap { a, b, delta, .. } => {
                record.piece1_pos = *a;
                record.piece2_pos = *b;
                record.delta = *delta;
            }
            MutationKind::Hold { pos, .. } => record.piece1_pos = *pos,
            MutationKind::Join { .. } | MutationKind::Leave { .. } => {}
        }
        record
    }
}

/// Outbound request asking the server to hold (or swap into) a piece.
///
/// Serializes as `{"action": 1, "userID": "...", "position": {"X": .., "Y": ..}}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldRequest {
    pub action: Action,
    #[serde(rename = "userID")]
    pub user_id: UserId,
    pub position: Position,
}

impl HoldRequest {
    pub fn new(user_id: UserId, position: Position) -> Self {
        Self {
            action: Action::Hold,
            user_id,
            position,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
