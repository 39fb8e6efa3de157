//! Headless jigsaw board observer.
//!
//! Joins a puzzle as an existing user, keeps a reconciled replica of the
//! board, and logs progress until the puzzle is finished or Ctrl-C.
//!
//! Usage:
//!   # Watch puzzle abc as user u1 against a local server
//!   cargo run -p jigsaw-cli -- --puzzle abc --user u1
//!
//!   # Remote server, grab piece (2,3) once the board is loaded
//!   JIGSAW_API_BASE=https://host/api JIGSAW_STREAM_BASE=wss://host/api \
//!     cargo run -p jigsaw-cli -- --puzzle abc --user u1 --hold 2,3
//!
//! Log level follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

use jigsaw_client::{
    BoardSource, BoardView, ClientConfig, ConfigFile, HttpBoardSource, Phase, WsConnector,
    spawn_session,
};
use jigsaw_types::{Position, PuzzleId, UserId};

/// Follow a shared jigsaw board from the terminal.
#[derive(Parser, Debug)]
#[command(name = "jigsaw")]
#[command(about = "Headless observer for a shared jigsaw board")]
struct Args {
    /// Puzzle id to join
    #[arg(short, long)]
    puzzle: String,

    /// User id to join as (must exist on the server)
    #[arg(short, long)]
    user: String,

    /// REST base URL
    #[arg(long, env = "JIGSAW_API_BASE")]
    api_base: Option<String>,

    /// Stream base URL
    #[arg(long, env = "JIGSAW_STREAM_BASE")]
    stream_base: Option<String>,

    /// Config file (default: $XDG_CONFIG_HOME/jigsaw/client.ron)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Hold the piece at X,Y once the board is live
    #[arg(long, value_parser = parse_position)]
    hold: Option<Position>,

    /// Exit as soon as the puzzle is complete
    #[arg(long)]
    exit_on_complete: bool,
}

fn parse_position(raw: &str) -> Result<Position, String> {
    let (x, y) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got {raw:?}"))?;
    let x = x.trim().parse().map_err(|e| format!("bad X in {raw:?}: {e}"))?;
    let y = y.trim().parse().map_err(|e| format!("bad Y in {raw:?}: {e}"))?;
    Ok(Position::new(x, y))
}

fn load_config(args: &Args) -> Result<ClientConfig> {
    let file = match args.config.clone().or_else(ConfigFile::default_path) {
        Some(path) => ConfigFile::load(&path)?,
        None => ConfigFile::default(),
    };
    let mut config = ClientConfig::from_file(&file)?;
    if let Some(api_base) = &args.api_base {
        config = config.with_api_base(api_base)?;
    }
    if let Some(stream_base) = &args.stream_base {
        config = config.with_stream_base(stream_base)?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Arc::new(load_config(&args)?);
    let puzzle = PuzzleId::new(args.puzzle.clone());
    let user = UserId::new(args.user.clone());

    let source = Arc::new(HttpBoardSource::new(Arc::clone(&config))?);
    let me = source
        .fetch_user(&user)
        .await
        .with_context(|| format!("could not verify user {user}"))?;
    tracing::info!(api = %config.api_base(), "Joining {} as {}", puzzle, me);

    let session = spawn_session(config, puzzle, Arc::new(WsConnector), source);
    session.set_identity(user)?;

    let mut views = session.subscribe();
    let mut pending_hold = args.hold;
    let mut reporter = Reporter::default();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            changed = views.changed() => {
                if changed.is_err() {
                    tracing::warn!("Session ended");
                    break;
                }
                let view = views.borrow_and_update().clone();
                reporter.report(&view);

                if view.phase == Phase::Ready && view.live {
                    if let Some(pos) = pending_hold.take() {
                        let sent = session.request_hold(pos).await?;
                        tracing::info!("Hold request for {}: {}", pos, if sent { "sent" } else { "ignored" });
                    }
                }
                if view.complete && args.exit_on_complete {
                    break;
                }
            }
        }
    }

    session.shutdown().await?;
    Ok(())
}

/// Logs what changed between views.
#[derive(Default)]
struct Reporter {
    phase: Option<Phase>,
    live: bool,
    correct: Option<u32>,
    users: usize,
    complete: bool,
}

impl Reporter {
    fn report(&mut self, view: &BoardView) {
        if self.phase != Some(view.phase) || self.live != view.live {
            tracing::info!(phase = %view.phase, live = view.live, "Connection state");
            self.phase = Some(view.phase);
            self.live = view.live;
        }
        let Some(board) = &view.board else {
            self.correct = None;
            return;
        };
        if self.correct != Some(board.pieces_correct) {
            tracing::info!("{}/{} pieces correct", board.pieces_correct, board.size);
            self.correct = Some(board.pieces_correct);
        }
        if self.users != board.current_users.len() {
            let names: Vec<_> = board.current_users.values().map(|u| u.name.as_str()).collect();
            tracing::info!("Players: {}", names.join(", "));
            self.users = board.current_users.len();
        }
        if view.complete && !self.complete {
            let ranking: Vec<_> = view
                .scores
                .ranking()
                .into_iter()
                .map(|(user, score)| format!("{user}: {score}"))
                .collect();
            tracing::info!("Puzzle complete! Scores: {}", ranking.join(", "));
        }
        self.complete = view.complete;
    }
}
