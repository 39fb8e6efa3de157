//! Jigsaw board client.
//!
//! Keeps one local replica of a shared puzzle board in step with the server:
//! a snapshot fetched over REST plus a live stream of server-ordered
//! mutations, which can arrive in either order.
//!
//! | Module | Role |
//! |--------|------|
//! | [`buffer`] | Holds mutations that arrive before the snapshot |
//! | [`apply`] | Pure `(board, mutation) → board'` transitions |
//! | [`score`] | Per-user correctness deltas |
//! | [`geometry`] | Piece size limits for a viewport |
//! | [`snapshot`] | Fetch collaborator and snapshot loader |
//! | [`transport`] | Stream collaborator (WebSocket) |
//! | [`reconcile`] | The synchronous state machine owning the replica |
//! | [`session`] | Actor that drives the engine and publishes views |
//! | [`config`] | Endpoints and the optional RON config file |
//!
//! Typical use:
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use jigsaw_client::{spawn_session, ClientConfig, HttpBoardSource, WsConnector};
//!
//! let config = Arc::new(ClientConfig::local()?);
//! let source = Arc::new(HttpBoardSource::new(Arc::clone(&config))?);
//! let session = spawn_session(config, "puzzle-1".into(), Arc::new(WsConnector), source);
//! session.set_identity("user-1".into())?;
//! let view = session.wait_for(|v| v.complete).await?;
//! println!("done at version {}", view.version);
//! # Ok(())
//! # }
//! ```

pub mod apply;
pub mod buffer;
pub mod config;
pub mod constants;
pub mod geometry;
pub mod reconcile;
pub mod score;
pub mod session;
pub mod snapshot;
pub mod transport;

pub use apply::{apply, Applied, ApplyError};
pub use buffer::UpdateBuffer;
pub use config::{ClientConfig, ConfigError, ConfigFile};
pub use geometry::{piece_limits, PieceLimits, Viewport};
pub use reconcile::{BoardView, Effect, Generation, Ingest, Phase, Reconciler};
pub use score::ScoreTable;
pub use session::{spawn_session, SessionError, SessionHandle};
pub use snapshot::{load_snapshot, BoardSource, FetchError, HttpBoardSource, Snapshot};
pub use transport::{StreamConnection, StreamConnector, TransportError, WsConnection, WsConnector};
