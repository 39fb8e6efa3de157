//! Board snapshot loader and the fetch collaborator.
//!
//! [`BoardSource`] is the request/response seam: `GET /puzzles/{id}` and
//! `GET /users/{id}`. [`HttpBoardSource`] implements it with reqwest; tests
//! substitute an in-memory source.
//!
//! A loaded [`Snapshot`] is always structurally valid. A board that fails
//! [`Board::validate`] is reported as [`FetchError::Invalid`] and never
//! reaches the engine.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use jigsaw_types::{Board, BoardError, PuzzleId, User, UserId};

use crate::config::ClientConfig;
use crate::constants::HTTP_TIMEOUT;
use crate::geometry::{piece_limits, PieceLimits, Viewport};
use crate::score::ScoreTable;

/// Why a snapshot or user lookup failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("board {puzzle} is malformed: {source}")]
    Invalid {
        puzzle: PuzzleId,
        #[source]
        source: BoardError,
    },
    #[error("{0}")]
    Unavailable(String),
}

/// Fetches authoritative state from the server.
#[async_trait]
pub trait BoardSource: Send + Sync {
    async fn fetch_board(&self, puzzle: &PuzzleId) -> Result<Board, FetchError>;
    async fn fetch_user(&self, user: &UserId) -> Result<User, FetchError>;
}

/// [`BoardSource`] over the REST API.
#[derive(Clone)]
pub struct HttpBoardSource {
    client: reqwest::Client,
    config: Arc<ClientConfig>,
}

impl HttpBoardSource {
    pub fn new(config: Arc<ClientConfig>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client, config })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: url::Url) -> Result<T, FetchError> {
        let url_str = url.to_string();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url_str.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url_str,
                status: status.as_u16(),
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|source| FetchError::Decode {
                url: url_str,
                source,
            })
    }
}

#[async_trait]
impl BoardSource for HttpBoardSource {
    async fn fetch_board(&self, puzzle: &PuzzleId) -> Result<Board, FetchError> {
        self.get_json(self.config.puzzle_url(puzzle)).await
    }

    async fn fetch_user(&self, user: &UserId) -> Result<User, FetchError> {
        self.get_json(self.config.user_url(user)).await
    }
}

/// A freshly loaded baseline: the board, an empty score table, and piece
/// limits for the viewport the fetch was issued with.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub board: Board,
    pub scores: ScoreTable,
    pub limits: PieceLimits,
    pub viewport: Viewport,
}

impl Snapshot {
    /// Validate `board` and wrap it as a baseline.
    pub fn new(board: Board, viewport: Viewport) -> Result<Self, BoardError> {
        board.validate()?;
        let limits = piece_limits(viewport, &board);
        Ok(Self {
            board,
            scores: ScoreTable::new(),
            limits,
            viewport,
        })
    }
}

/// Fetch and validate the board for `puzzle`.
pub async fn load_snapshot(
    source: &dyn BoardSource,
    puzzle: &PuzzleId,
    viewport: Viewport,
) -> Result<Snapshot, FetchError> {
    let board = source.fetch_board(puzzle).await?;
    let snapshot = Snapshot::new(board, viewport).map_err(|source| {
        error!("Rejecting snapshot for {}: {}", puzzle, source);
        FetchError::Invalid {
            puzzle: puzzle.clone(),
            source,
        }
    })?;
    info!(
        "Loaded snapshot for {}: {}x{}, {}/{} correct, cursor {}",
        puzzle,
        snapshot.board.x_size,
        snapshot.board.y_size,
        snapshot.board.pieces_correct,
        snapshot.board.size,
        snapshot.board.next_update_id
    );
    Ok(snapshot)
}
