//! Reconciliation engine: one deterministic board replica from a racing
//! snapshot fetch and live mutation stream.
//!
//! The engine is a synchronous state machine. It never performs I/O; every
//! input method records [`Effect`]s (open a stream, fetch a snapshot, send a
//! request, ...) that the session executes and answers with further inputs.
//! This keeps every ordering decision in one place and testable without a
//! runtime.
//!
//! # State Machine
//!
//! ```text
//! +---------------+  set_identity   +----------------+
//! | Uninitialized | ──────────────► | (stream opens) |
//! +---------------+                 +-------+--------+
//!        ▲   mutations dropped              │ on_stream_opened
//!        │                                  ▼
//!        │ snapshot failed:         +---------------+
//!        │ close, retry later       |               |
//!        └───────────────────────── |    Loading    |  mutations → buffer
//!                                   +-------+-------+
//!                                           │ on_snapshot: drain buffer
//!                                           ▼
//! +----------------+  set_identity  +---------------+
//! | Reinitializing | ◄───────────── |     Ready     |  mutations → apply
//! +-------+--------+                +---------------+
//!         │ on_stream_opened
//!         └──────────────────────► Loading
//! ```
//!
//! # Stale results
//!
//! Each stream connection belongs to a [`Generation`]. Changing identity or
//! reconnecting bumps the generation, and every input tagged with an older
//! one is dropped. A snapshot fetched for user A can therefore never land on
//! user B's board.
//!
//! # Retry
//!
//! A failed snapshot closes its stream, and a stream that drops on its own
//! is not reopened in place. Both record [`Effect::ScheduleReconnect`] with
//! the number of consecutive failures; the session waits out a backoff and
//! calls [`Reconciler::on_reconnect_due`]. A loaded snapshot resets the count.

use std::collections::{HashMap, VecDeque};

use strum::Display;
use tracing::{debug, info, trace, warn};

use jigsaw_types::{
    Board, HoldRequest, Mutation, MutationError, MutationKind, Position, PuzzleId, User, UserId,
};

use crate::apply::{apply, ApplyError};
use crate::buffer::UpdateBuffer;
use crate::constants::{
    IDENTITY_CHANGED_REASON, NORMAL_CLOSURE_CODE, RECONNECT_REASON, SHUTDOWN_REASON,
    SNAPSHOT_FAILED_REASON,
};
use crate::geometry::{piece_limits, PieceLimits, Viewport};
use crate::score::ScoreTable;
use crate::snapshot::{FetchError, Snapshot};

/// Connection epoch. Bumped on identity change, reconnect, and shutdown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub u64);

impl Generation {
    fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gen#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display)]
pub enum Phase {
    /// No board and no baseline in flight; mutations are dropped.
    #[default]
    Uninitialized,
    /// Stream open, snapshot in flight; mutations are buffered.
    Loading,
    /// Board installed; mutations apply directly.
    Ready,
    /// Identity changed; waiting for the new stream to open.
    Reinitializing,
}

/// I/O requested by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    OpenStream { generation: Generation, user: UserId },
    CloseStream {
        generation: Generation,
        code: u16,
        reason: &'static str,
    },
    FetchSnapshot { generation: Generation },
    FetchProfile { generation: Generation, user: UserId },
    Send {
        generation: Generation,
        request: HoldRequest,
    },
    /// Call [`Reconciler::on_reconnect_due`] after a backoff. `attempt`
    /// counts consecutive failures, starting at 1.
    ScheduleReconnect { generation: Generation, attempt: u32 },
}

/// What happened to one inbound stream message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ingest {
    /// Belonged to a closed connection.
    Stale,
    Malformed(MutationError),
    /// No baseline yet; held for the drain.
    Buffered,
    /// No baseline in flight; dropped.
    NotLoading,
    /// Waiting behind a Join whose profile is being looked up.
    Queued,
    /// A Join that needs a profile lookup first.
    AwaitingProfile,
    Applied,
    /// Id below the cursor; already part of the board.
    AlreadyApplied,
    Rejected(ApplyError),
}

/// Everything the renderer needs, cheap to clone.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoardView {
    pub phase: Phase,
    /// A stream connection is open.
    pub live: bool,
    pub identity: Option<UserId>,
    pub board: Option<Board>,
    pub complete: bool,
    pub scores: ScoreTable,
    pub limits: PieceLimits,
    /// Bumped on every observable change.
    pub version: u64,
    pub generation: Generation,
}

/// A mutation waiting in the inbox. Replayed mutations come from the
/// update buffer and were already filtered against the baseline cursor.
#[derive(Clone, Debug)]
struct Pending {
    mutation: Mutation,
    replay: bool,
}

#[derive(Clone, Debug)]
struct Replica {
    board: Board,
    scores: ScoreTable,
    complete: bool,
}

/// Owns the board replica and the update buffer for one puzzle.
#[derive(Debug)]
pub struct Reconciler {
    puzzle: PuzzleId,
    phase: Phase,
    generation: Generation,
    identity: Option<UserId>,
    /// Generation of the stream we asked for and have not closed.
    stream: Option<Generation>,
    live: bool,
    buffer: UpdateBuffer,
    replica: Option<Replica>,
    /// Mutations waiting behind `awaiting_profile`, in arrival order.
    inbox: VecDeque<Pending>,
    awaiting_profile: Option<Mutation>,
    /// Looked-up profiles, kept for one stream.
    profiles: HashMap<UserId, User>,
    /// Consecutive failed snapshots and stream drops.
    failures: u32,
    viewport: Viewport,
    limits: PieceLimits,
    version: u64,
    effects: Vec<Effect>,
}

impl Reconciler {
    pub fn new(puzzle: PuzzleId, viewport: Viewport) -> Self {
        Self {
            puzzle,
            phase: Phase::Uninitialized,
            generation: Generation::default(),
            identity: None,
            stream: None,
            live: false,
            buffer: UpdateBuffer::new(),
            replica: None,
            inbox: VecDeque::new(),
            awaiting_profile: None,
            profiles: HashMap::new(),
            failures: 0,
            viewport,
            limits: PieceLimits::default(),
            version: 0,
            effects: Vec::new(),
        }
    }

    pub fn puzzle(&self) -> &PuzzleId {
        &self.puzzle
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn identity(&self) -> Option<&UserId> {
        self.identity.as_ref()
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn board(&self) -> Option<&Board> {
        self.replica.as_ref().map(|r| &r.board)
    }

    pub fn scores(&self) -> Option<&ScoreTable> {
        self.replica.as_ref().map(|r| &r.scores)
    }

    /// `piecesCorrect == size` on the installed board.
    pub fn is_complete(&self) -> bool {
        self.replica.as_ref().is_some_and(|r| r.complete)
    }

    pub fn limits(&self) -> PieceLimits {
        self.limits
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of mutations waiting for a baseline.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Take the I/O requested since the last call, in order.
    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn view(&self) -> BoardView {
        BoardView {
            phase: self.phase,
            live: self.live,
            identity: self.identity.clone(),
            board: self.board().cloned(),
            complete: self.is_complete(),
            scores: self.scores().cloned().unwrap_or_default(),
            limits: self.limits,
            version: self.version,
            generation: self.generation,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// The active user became available or changed.
    ///
    /// Closes the previous stream, discards the board, and opens a stream for
    /// `user`. Setting the same identity again does nothing.
    pub fn set_identity(&mut self, user: UserId) {
        if self.identity.as_ref() == Some(&user) {
            trace!("Identity unchanged ({})", user);
            return;
        }
        info!(
            "Identity for {} changing from {:?} to {}",
            self.puzzle, self.identity, user
        );
        self.identity = Some(user.clone());
        self.failures = 0;
        self.restart(user, IDENTITY_CHANGED_REASON);
    }

    /// Re-open the stream for the current identity.
    pub fn reconnect(&mut self) {
        let Some(user) = self.identity.clone() else {
            debug!("Reconnect ignored: no identity");
            return;
        };
        info!("Reconnecting {} as {}", self.puzzle, user);
        self.restart(user, RECONNECT_REASON);
    }

    /// Close the stream and forget all state.
    pub fn shutdown(&mut self) {
        self.close_stream(SHUTDOWN_REASON);
        self.generation = self.generation.next();
        self.identity = None;
        self.failures = 0;
        self.reset();
        self.phase = Phase::Uninitialized;
        self.touch();
    }

    fn restart(&mut self, user: UserId, reason: &'static str) {
        let had_connection = self.close_stream(reason) || self.replica.is_some();
        self.generation = self.generation.next();
        self.reset();
        self.phase = if had_connection {
            Phase::Reinitializing
        } else {
            Phase::Uninitialized
        };
        self.stream = Some(self.generation);
        self.effects.push(Effect::OpenStream {
            generation: self.generation,
            user,
        });
        self.touch();
    }

    /// Returns whether a stream was open.
    fn close_stream(&mut self, reason: &'static str) -> bool {
        let Some(generation) = self.stream.take() else {
            return false;
        };
        self.effects.push(Effect::CloseStream {
            generation,
            code: NORMAL_CLOSURE_CODE,
            reason,
        });
        true
    }

    fn reset(&mut self) {
        self.live = false;
        self.replica = None;
        self.limits = PieceLimits::default();
        self.buffer.clear();
        self.inbox.clear();
        self.awaiting_profile = None;
        self.profiles.clear();
    }

    fn schedule_reconnect(&mut self) {
        if self.identity.is_none() {
            return;
        }
        self.failures = self.failures.saturating_add(1);
        self.effects.push(Effect::ScheduleReconnect {
            generation: self.generation,
            attempt: self.failures,
        });
    }

    /// A backoff scheduled for `generation` elapsed.
    pub fn on_reconnect_due(&mut self, generation: Generation) {
        if self.is_stale(generation, "reconnect") {
            return;
        }
        self.reconnect();
    }

    /// Stream for `generation` is open: fetch the baseline.
    pub fn on_stream_opened(&mut self, generation: Generation) {
        if self.is_stale(generation, "stream open") {
            return;
        }
        info!("Stream open for {} ({}), loading snapshot", self.puzzle, generation);
        self.live = true;
        self.phase = Phase::Loading;
        self.effects.push(Effect::FetchSnapshot { generation });
        self.touch();
    }

    /// Stream for `generation` closed or could not be opened.
    pub fn on_stream_closed(&mut self, generation: Generation, error: Option<String>) {
        if self.is_stale(generation, "stream close") {
            return;
        }
        if self.stream != Some(generation) {
            trace!("Stream for {} ({}) finished closing", self.puzzle, generation);
            return;
        }
        match error {
            Some(error) => warn!("Stream for {} lost ({}): {}", self.puzzle, generation, error),
            None => info!("Stream for {} closed ({})", self.puzzle, generation),
        }
        self.stream = None;
        self.live = false;
        self.schedule_reconnect();
        self.touch();
    }

    // ── Inbound data ─────────────────────────────────────────────────────

    /// One raw stream message.
    pub fn on_stream_text(&mut self, generation: Generation, text: &str) -> Ingest {
        if self.is_stale(generation, "message") {
            return Ingest::Stale;
        }
        match Mutation::parse(text) {
            Ok(mutation) => self.ingest(mutation),
            Err(e) => {
                warn!("Dropping malformed mutation on {}: {}", self.puzzle, e);
                Ingest::Malformed(e)
            }
        }
    }

    /// A mutation from the current stream.
    pub fn ingest(&mut self, mutation: Mutation) -> Ingest {
        if self.replica.is_none() {
            if self.phase != Phase::Loading {
                debug!(
                    "Dropping mutation {} for {}: no snapshot in flight",
                    mutation.id, self.puzzle
                );
                return Ingest::NotLoading;
            }
            self.buffer.append(mutation);
            return Ingest::Buffered;
        }
        if self.awaiting_profile.is_some() {
            trace!("Queueing mutation {} behind pending join", mutation.id);
            self.inbox.push_back(Pending {
                mutation,
                replay: false,
            });
            return Ingest::Queued;
        }
        self.process(mutation, false)
    }

    /// Snapshot fetch for `generation` finished.
    pub fn on_snapshot(&mut self, generation: Generation, result: Result<Snapshot, FetchError>) {
        if self.is_stale(generation, "snapshot") {
            return;
        }
        if self.phase != Phase::Loading {
            debug!("Ignoring snapshot for {} in phase {}", self.puzzle, self.phase);
            return;
        }
        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    "Snapshot for {} failed, board not loaded: {} ({} buffered mutations dropped)",
                    self.puzzle,
                    e,
                    self.buffer.len()
                );
                self.buffer.clear();
                self.close_stream(SNAPSHOT_FAILED_REASON);
                self.live = false;
                self.phase = Phase::Uninitialized;
                self.schedule_reconnect();
                self.touch();
                return;
            }
        };

        let drained = self.buffer.drain_from(snapshot.board.next_update_id);
        self.limits = if snapshot.viewport == self.viewport {
            snapshot.limits
        } else {
            piece_limits(self.viewport, &snapshot.board)
        };
        self.failures = 0;
        let complete = snapshot.board.is_complete();
        info!(
            "Board {} ready at cursor {} ({}/{} correct), replaying {} buffered",
            self.puzzle,
            snapshot.board.next_update_id,
            snapshot.board.pieces_correct,
            snapshot.board.size,
            drained.len()
        );
        self.replica = Some(Replica {
            board: snapshot.board,
            scores: snapshot.scores,
            complete,
        });
        self.phase = Phase::Ready;
        self.touch();

        self.inbox.extend(drained.into_iter().map(|mutation| Pending {
            mutation,
            replay: true,
        }));
        self.pump();
    }

    /// Profile lookup for a pending Join finished.
    pub fn on_profile(
        &mut self,
        generation: Generation,
        user: UserId,
        result: Result<User, FetchError>,
    ) {
        if self.is_stale(generation, "profile") {
            return;
        }
        let pending_user = self.awaiting_profile.as_ref().and_then(Mutation::user);
        if pending_user != Some(&user) {
            debug!("Ignoring unexpected profile for {}", user);
            return;
        }
        let Some(join) = self.awaiting_profile.take() else {
            return;
        };
        match result {
            Ok(profile) => {
                self.profiles.insert(user, profile.clone());
                self.commit(&join, Some(&profile));
            }
            Err(e) => {
                warn!("Dropping join {} for {}: profile lookup failed: {}", join.id, user, e);
            }
        }
        self.pump();
    }

    // ── User actions ─────────────────────────────────────────────────────

    /// Ask the server to hold the piece at `pos`.
    ///
    /// Only honored while the board is loaded, the stream is live, an
    /// identity is set, and the puzzle is unfinished. Returns whether the
    /// request was sent.
    pub fn request_hold(&mut self, pos: Position) -> bool {
        let Some(user) = self.identity.clone() else {
            debug!("Hold at {} ignored: no identity", pos);
            return false;
        };
        let Some(replica) = self.replica.as_ref() else {
            debug!("Hold at {} ignored: board not loaded", pos);
            return false;
        };
        if self.phase != Phase::Ready || !self.live {
            debug!("Hold at {} ignored: phase {}, live {}", pos, self.phase, self.live);
            return false;
        }
        if replica.complete {
            debug!("Hold at {} ignored: puzzle complete", pos);
            return false;
        }
        if !replica.board.contains(pos) {
            debug!("Hold at {} ignored: out of bounds", pos);
            return false;
        }
        self.effects.push(Effect::Send {
            generation: self.generation,
            request: HoldRequest::new(user, pos),
        });
        true
    }

    /// Viewport changed; recompute piece limits.
    pub fn resize(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        if let Some(replica) = &self.replica {
            let limits = piece_limits(viewport, &replica.board);
            if limits != self.limits {
                self.limits = limits;
                self.touch();
            }
        }
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn is_stale(&self, generation: Generation, what: &str) -> bool {
        if generation == self.generation {
            return false;
        }
        debug!(
            "Dropping stale {} for {} ({} != {})",
            what, self.puzzle, generation, self.generation
        );
        true
    }

    /// Apply queued mutations until one needs a profile lookup.
    fn pump(&mut self) {
        while self.awaiting_profile.is_none() {
            let Some(pending) = self.inbox.pop_front() else {
                break;
            };
            self.process(pending.mutation, pending.replay);
        }
    }

    /// `replay` marks mutations drained from the update buffer. They arrived
    /// in stream order and all sit at or above the baseline cursor, so the
    /// cursor (which earlier replays may have advanced) must not skip them.
    fn process(&mut self, mutation: Mutation, replay: bool) -> Ingest {
        let Some(replica) = self.replica.as_ref() else {
            self.buffer.append(mutation);
            return Ingest::Buffered;
        };
        let cursor = replica.board.next_update_id;
        if mutation.id < cursor {
            if !replay {
                trace!("Skipping mutation {} below cursor {}", mutation.id, cursor);
                return Ingest::AlreadyApplied;
            }
            debug!("Replaying buffered mutation {} behind cursor {}", mutation.id, cursor);
        } else if mutation.id > cursor {
            debug!("Gap in mutation ids: expected {}, got {}", cursor, mutation.id);
        }

        if let MutationKind::Join { user } = &mutation.kind {
            if !replica.board.current_users.contains_key(user) {
                let Some(profile) = self.profiles.get(user).cloned() else {
                    debug!("Join {} for {} waits for profile lookup", mutation.id, user);
                    self.effects.push(Effect::FetchProfile {
                        generation: self.generation,
                        user: user.clone(),
                    });
                    self.awaiting_profile = Some(mutation);
                    return Ingest::AwaitingProfile;
                };
                return self.commit(&mutation, Some(&profile));
            }
        }
        self.commit(&mutation, None)
    }

    fn commit(&mut self, mutation: &Mutation, profile: Option<&User>) -> Ingest {
        let Some(replica) = self.replica.as_mut() else {
            return Ingest::Buffered;
        };
        match apply(&replica.board, &replica.scores, mutation, profile) {
            Ok(applied) => {
                let was_complete = replica.complete;
                replica.complete = applied.board.is_complete();
                replica.board = applied.board;
                replica.scores = applied.scores;
                if replica.complete && !was_complete {
                    info!("Puzzle {} complete", self.puzzle);
                }
                self.touch();
                Ingest::Applied
            }
            Err(e) => {
                warn!(
                    "Dropping {} mutation {} on {}: {}",
                    mutation.action(),
                    mutation.id,
                    self.puzzle,
                    e
                );
                Ingest::Rejected(e)
            }
        }
    }

    fn touch(&mut self) {
        self.version += 1;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use jigsaw_types::Piece;

    fn board(x_size: u32, y_size: u32) -> Board {
        let rows = (0..y_size)
            .map(|y| {
                (0..x_size)
                    .map(|x| Piece::new(Position::new(x, y), format!("{y}_{x}.jpeg")))
                    .collect()
            })
            .collect();
        Board::new("p1", rows)
    }

    fn snapshot(board: Board) -> Result<Snapshot, FetchError> {
        Ok(Snapshot::new(board, Viewport::default()).unwrap())
    }

    fn swap_json(id: u64, a: (u32, u32), b: (u32, u32), user: &str, delta: i32) -> String {
        format!(
            r#"{{"id":{id},"action":0,"userID":"{user}","piece1Pos":{{"X":{},"Y":{}}},"piece2Pos":{{"X":{},"Y":{}}},"delta":{delta}}}"#,
            a.0, a.1, b.0, b.1
        )
    }

    fn hold_json(id: u64, pos: (u32, u32), user: &str) -> String {
        format!(
            r#"{{"id":{id},"action":1,"userID":"{user}","piece1Pos":{{"X":{},"Y":{}}},"piece2Pos":{{"X":0,"Y":0}},"delta":0}}"#,
            pos.0, pos.1
        )
    }

    fn join_json(id: u64, user: &str) -> String {
        format!(r#"{{"id":{id},"action":2,"userID":"{user}"}}"#)
    }

    /// Engine with identity set and stream open; returns the generation.
    fn opened(engine: &mut Reconciler, user: &str) -> Generation {
        engine.set_identity(user.into());
        let generation = engine.generation();
        engine.on_stream_opened(generation);
        engine.take_effects();
        generation
    }

    fn ready(next_update_id: u64) -> (Reconciler, Generation) {
        let mut engine = Reconciler::new("p1".into(), Viewport::default());
        let generation = opened(&mut engine, "me");
        let mut b = board(2, 2);
        b.next_update_id = next_update_id;
        engine.on_snapshot(generation, snapshot(b));
        engine.take_effects();
        (engine, generation)
    }

    #[test]
    fn identity_opens_stream_then_snapshot() {
        let mut engine = Reconciler::new("p1".into(), Viewport::default());
        engine.set_identity("me".into());
        let generation = engine.generation();
        assert_eq!(
            engine.take_effects(),
            vec![Effect::OpenStream {
                generation,
                user: "me".into()
            }]
        );
        assert_eq!(engine.phase(), Phase::Uninitialized);

        engine.on_stream_opened(generation);
        assert_eq!(engine.phase(), Phase::Loading);
        assert!(engine.is_live());
        assert_eq!(
            engine.take_effects(),
            vec![Effect::FetchSnapshot { generation }]
        );

        engine.on_snapshot(generation, snapshot(board(2, 2)));
        assert_eq!(engine.phase(), Phase::Ready);
        assert!(engine.board().is_some());
    }

    #[test]
    fn same_identity_is_noop() {
        let (mut engine, generation) = ready(0);
        engine.set_identity("me".into());
        assert!(engine.take_effects().is_empty());
        assert_eq!(engine.generation(), generation);
    }

    #[test]
    fn snapshot_race_end_to_end() {
        let mut engine = Reconciler::new("p1".into(), Viewport::default());
        let generation = opened(&mut engine, "me");

        assert_eq!(
            engine.on_stream_text(generation, &swap_json(4, (0, 0), (1, 0), "u1", 0)),
            Ingest::Buffered
        );
        assert_eq!(
            engine.on_stream_text(generation, &hold_json(5, (0, 1), "u1")),
            Ingest::Buffered
        );
        assert_eq!(
            engine.on_stream_text(generation, &swap_json(6, (0, 1), (1, 1), "u1", 1)),
            Ingest::Buffered
        );

        let mut baseline = board(2, 2);
        baseline.next_update_id = 5;
        baseline.pieces_correct = 3;
        engine.on_snapshot(generation, snapshot(baseline));

        let board = engine.board().unwrap();
        assert_eq!(board.pieces_correct, 4);
        assert_eq!(board.next_update_id, 7);
        assert!(engine.is_complete());
        // id 4 was already in the baseline: (0,0) and (1,0) never swapped
        assert_eq!(board.piece(Position::new(0, 0)).unwrap().image, "0_0.jpeg");
        assert_eq!(board.piece(Position::new(0, 1)).unwrap().image, "1_1.jpeg");
        assert_eq!(board.piece(Position::new(0, 1)).unwrap().held_by, None);
        assert_eq!(engine.scores().unwrap().get(&"u1".into()), 1);
        assert_eq!(engine.buffered(), 0);
    }

    #[test]
    fn live_mutations_apply_directly() {
        let (mut engine, generation) = ready(0);
        assert_eq!(
            engine.on_stream_text(generation, &hold_json(0, (1, 1), "u2")),
            Ingest::Applied
        );
        assert_eq!(
            engine.board().unwrap().piece(Position::new(1, 1)).unwrap().held_by,
            Some("u2".into())
        );
        // replay of an applied id
        assert_eq!(
            engine.on_stream_text(generation, &hold_json(0, (1, 1), "u2")),
            Ingest::AlreadyApplied
        );
    }

    #[test]
    fn malformed_and_invalid_mutations_are_dropped() {
        let (mut engine, generation) = ready(0);
        let before = engine.board().unwrap().clone();

        assert!(matches!(
            engine.on_stream_text(generation, r#"{"id":0,"action":9,"userID":"u"}"#),
            Ingest::Malformed(MutationError::UnknownAction(9))
        ));
        assert!(matches!(
            engine.on_stream_text(generation, &hold_json(0, (5, 5), "u")),
            Ingest::Rejected(ApplyError::OutOfBounds { .. })
        ));
        assert!(matches!(
            engine.on_stream_text(generation, &swap_json(1, (0, 0), (1, 0), "u", -1)),
            Ingest::Rejected(ApplyError::CounterOutOfRange { .. })
        ));
        assert_eq!(engine.board().unwrap(), &before);

        // the stream continues
        assert_eq!(
            engine.on_stream_text(generation, &swap_json(2, (0, 0), (1, 0), "u", 1)),
            Ingest::Applied
        );
    }

    #[test]
    fn identity_switch_discards_board_and_stale_input() {
        let (mut engine, old) = ready(0);
        engine.set_identity("other".into());
        let new = engine.generation();
        assert_ne!(old, new);
        assert_eq!(engine.phase(), Phase::Reinitializing);
        assert!(engine.board().is_none());
        assert!(!engine.is_live());
        assert_eq!(
            engine.take_effects(),
            vec![
                Effect::CloseStream {
                    generation: old,
                    code: 1000,
                    reason: IDENTITY_CHANGED_REASON
                },
                Effect::OpenStream {
                    generation: new,
                    user: "other".into()
                },
            ]
        );

        // late traffic from the old connection
        assert_eq!(
            engine.on_stream_text(old, &hold_json(0, (0, 0), "me")),
            Ingest::Stale
        );
        engine.on_snapshot(old, snapshot(board(2, 2)));
        engine.on_stream_closed(old, None);
        assert!(engine.board().is_none());
        assert_eq!(engine.buffered(), 0);

        engine.on_stream_opened(new);
        assert_eq!(engine.phase(), Phase::Loading);
        engine.on_snapshot(new, snapshot(board(3, 1)));
        assert_eq!(engine.board().unwrap().x_size, 3);
    }

    fn failed_snapshot() -> Result<Snapshot, FetchError> {
        Err(FetchError::Status {
            url: "http://h/api/puzzles/p1".into(),
            status: 500,
        })
    }

    #[test]
    fn snapshot_failure_closes_stream_and_schedules_retry() {
        let mut engine = Reconciler::new("p1".into(), Viewport::default());
        let generation = opened(&mut engine, "me");
        engine.on_stream_text(generation, &hold_json(0, (0, 0), "u"));

        engine.on_snapshot(generation, failed_snapshot());

        assert!(engine.board().is_none());
        assert_eq!(engine.phase(), Phase::Uninitialized);
        assert!(!engine.is_live());
        assert_eq!(engine.buffered(), 0);
        assert!(!engine.request_hold(Position::new(0, 0)));
        assert_eq!(
            engine.take_effects(),
            vec![
                Effect::CloseStream {
                    generation,
                    code: NORMAL_CLOSURE_CODE,
                    reason: SNAPSHOT_FAILED_REASON
                },
                Effect::ScheduleReconnect {
                    generation,
                    attempt: 1
                },
            ]
        );

        // traffic still in flight on the closing stream is not retained
        for id in 1..1000 {
            assert_eq!(
                engine.on_stream_text(generation, &hold_json(id, (0, 0), "u")),
                Ingest::NotLoading
            );
        }
        assert_eq!(engine.buffered(), 0);

        // the close we asked for does not schedule a second retry
        engine.on_stream_closed(generation, None);
        assert!(engine.take_effects().is_empty());

        engine.on_reconnect_due(generation);
        let retry = engine.generation();
        assert_ne!(retry, generation);
        assert_eq!(
            engine.take_effects(),
            vec![Effect::OpenStream {
                generation: retry,
                user: "me".into()
            }]
        );
        engine.on_stream_opened(retry);
        engine.on_snapshot(retry, snapshot(board(2, 2)));
        assert_eq!(engine.phase(), Phase::Ready);
    }

    #[test]
    fn repeated_failures_count_attempts_until_a_snapshot_loads() {
        let mut engine = Reconciler::new("p1".into(), Viewport::default());
        let mut generation = opened(&mut engine, "me");

        for attempt in 1..=3 {
            engine.on_snapshot(generation, failed_snapshot());
            assert!(engine.take_effects().contains(&Effect::ScheduleReconnect {
                generation,
                attempt
            }));
            engine.on_reconnect_due(generation);
            generation = engine.generation();
            engine.on_stream_opened(generation);
            engine.take_effects();
        }

        engine.on_snapshot(generation, snapshot(board(2, 2)));
        engine.on_stream_closed(generation, Some("reset by peer".into()));
        assert_eq!(
            engine.take_effects(),
            vec![Effect::ScheduleReconnect {
                generation,
                attempt: 1
            }]
        );
    }

    #[test]
    fn stale_reconnect_is_ignored() {
        let mut engine = Reconciler::new("p1".into(), Viewport::default());
        let old = opened(&mut engine, "me");
        engine.on_snapshot(old, failed_snapshot());
        engine.take_effects();

        engine.set_identity("other".into());
        let current = engine.generation();
        engine.take_effects();

        engine.on_reconnect_due(old);
        assert_eq!(engine.generation(), current);
        assert!(engine.take_effects().is_empty());
    }

    #[test]
    fn out_of_order_buffered_mutations_all_replay() {
        let mut engine = Reconciler::new("p1".into(), Viewport::default());
        let generation = opened(&mut engine, "me");

        engine.on_stream_text(generation, &hold_json(7, (0, 0), "a"));
        engine.on_stream_text(generation, &hold_json(5, (1, 0), "b"));
        engine.on_stream_text(generation, &hold_json(6, (0, 1), "c"));
        assert_eq!(engine.buffered(), 3);

        let mut baseline = board(2, 2);
        baseline.next_update_id = 5;
        engine.on_snapshot(generation, snapshot(baseline));

        let board = engine.board().unwrap();
        let held = |x, y| board.piece(Position::new(x, y)).unwrap().held_by.clone();
        assert_eq!(held(0, 0), Some("a".into()));
        assert_eq!(held(1, 0), Some("b".into()));
        assert_eq!(held(0, 1), Some("c".into()));
        assert_eq!(board.next_update_id, 8);

        // live traffic is still deduplicated against the cursor
        assert_eq!(
            engine.on_stream_text(generation, &hold_json(6, (1, 1), "c")),
            Ingest::AlreadyApplied
        );
    }

    #[test]
    fn largest_mutation_id_applies() {
        let (mut engine, generation) = ready(0);
        assert_eq!(
            engine.on_stream_text(generation, &hold_json(u64::MAX, (1, 1), "u")),
            Ingest::Applied
        );
        assert_eq!(engine.board().unwrap().next_update_id, u64::MAX);
    }

    #[test]
    fn hold_gating() {
        let mut engine = Reconciler::new("p1".into(), Viewport::default());
        assert!(!engine.request_hold(Position::new(0, 0)));

        let generation = opened(&mut engine, "me");
        // loading
        assert!(!engine.request_hold(Position::new(0, 0)));

        engine.on_snapshot(generation, snapshot(board(2, 2)));
        assert!(!engine.request_hold(Position::new(2, 0)));
        assert!(engine.request_hold(Position::new(1, 0)));
        assert_eq!(
            engine.take_effects(),
            vec![Effect::Send {
                generation,
                request: HoldRequest::new("me".into(), Position::new(1, 0)),
            }]
        );

        engine.on_stream_closed(generation, Some("reset by peer".into()));
        assert!(!engine.request_hold(Position::new(1, 0)));
        assert_eq!(
            engine.take_effects(),
            vec![Effect::ScheduleReconnect {
                generation,
                attempt: 1
            }]
        );
    }

    #[test]
    fn hold_ignored_when_complete() {
        let mut engine = Reconciler::new("p1".into(), Viewport::default());
        let generation = opened(&mut engine, "me");
        let mut done = board(1, 1);
        done.pieces_correct = 1;
        engine.on_snapshot(generation, snapshot(done));
        assert!(engine.is_complete());
        assert!(!engine.request_hold(Position::new(0, 0)));
    }

    #[test]
    fn join_waits_for_profile_and_preserves_order() {
        let (mut engine, generation) = ready(0);

        assert_eq!(
            engine.on_stream_text(generation, &join_json(0, "amy")),
            Ingest::AwaitingProfile
        );
        assert_eq!(
            engine.take_effects(),
            vec![Effect::FetchProfile {
                generation,
                user: "amy".into()
            }]
        );
        assert_eq!(
            engine.on_stream_text(generation, &hold_json(1, (0, 0), "amy")),
            Ingest::Queued
        );
        assert_eq!(engine.board().unwrap().next_update_id, 0);

        engine.on_profile(generation, "amy".into(), Ok(User::new("amy", "Amy")));

        let board = engine.board().unwrap();
        assert_eq!(board.next_update_id, 2);
        assert!(board.current_users.contains_key(&UserId::new("amy")));
        assert_eq!(
            board.piece(Position::new(0, 0)).unwrap().held_by,
            Some("amy".into())
        );
    }

    #[test]
    fn cached_profile_skips_lookup() {
        let (mut engine, generation) = ready(0);
        engine.on_stream_text(generation, &join_json(0, "amy"));
        engine.on_profile(generation, "amy".into(), Ok(User::new("amy", "Amy")));
        engine.on_stream_text(generation, r#"{"id":1,"action":3,"userID":"amy"}"#);
        engine.take_effects();

        assert_eq!(
            engine.on_stream_text(generation, &join_json(2, "amy")),
            Ingest::Applied
        );
        assert!(engine.take_effects().is_empty());
    }

    #[test]
    fn profile_cache_does_not_outlive_identity() {
        let (mut engine, generation) = ready(0);
        engine.on_stream_text(generation, &join_json(0, "amy"));
        engine.on_profile(generation, "amy".into(), Ok(User::new("amy", "Amy")));
        engine.take_effects();

        engine.set_identity("other".into());
        let generation = engine.generation();
        engine.on_stream_opened(generation);
        engine.on_snapshot(generation, snapshot(board(2, 2)));
        engine.take_effects();

        assert_eq!(
            engine.on_stream_text(generation, &join_json(0, "amy")),
            Ingest::AwaitingProfile
        );
        assert_eq!(
            engine.take_effects(),
            vec![Effect::FetchProfile {
                generation,
                user: "amy".into()
            }]
        );
    }

    #[test]
    fn failed_profile_drops_only_the_join() {
        let (mut engine, generation) = ready(0);
        engine.on_stream_text(generation, &join_json(0, "ghost"));
        engine.on_stream_text(generation, &swap_json(1, (0, 0), (1, 1), "me", 1));

        engine.on_profile(
            generation,
            "ghost".into(),
            Err(FetchError::Unavailable("404".into())),
        );

        let board = engine.board().unwrap();
        assert!(board.current_users.is_empty());
        assert_eq!(board.pieces_correct, 1);
        assert_eq!(board.next_update_id, 2);
    }

    #[test]
    fn resize_recomputes_limits() {
        let mut engine = Reconciler::new("p1".into(), Viewport::new(400.0, 400.0));
        let generation = opened(&mut engine, "me");
        engine.on_snapshot(generation, snapshot(board(2, 2)));
        assert_eq!(engine.limits().max_width, 200.0);

        let version = engine.version();
        engine.resize(Viewport::new(200.0, 200.0));
        assert_eq!(engine.limits().max_width, 100.0);
        assert!(engine.version() > version);
    }

    #[test]
    fn snapshot_limits_used_when_viewport_matches() {
        let viewport = Viewport::new(400.0, 400.0);
        let mut engine = Reconciler::new("p1".into(), viewport);
        let generation = opened(&mut engine, "me");

        let mut loaded = Snapshot::new(board(2, 2), viewport).unwrap();
        loaded.limits = PieceLimits {
            max_width: 123.0,
            max_height: 45.0,
        };
        engine.on_snapshot(generation, Ok(loaded));
        assert_eq!(engine.limits().max_width, 123.0);
        assert_eq!(engine.limits().max_height, 45.0);
    }

    #[test]
    fn resize_during_load_recomputes_snapshot_limits() {
        let viewport = Viewport::new(400.0, 400.0);
        let mut engine = Reconciler::new("p1".into(), viewport);
        let generation = opened(&mut engine, "me");
        let loaded = Snapshot::new(board(2, 2), viewport).unwrap();
        assert_eq!(loaded.limits.max_width, 200.0);

        engine.resize(Viewport::new(200.0, 200.0));
        engine.on_snapshot(generation, Ok(loaded));
        assert_eq!(engine.limits().max_width, 100.0);
    }

    #[test]
    fn shutdown_closes_stream() {
        let (mut engine, generation) = ready(0);
        engine.shutdown();
        assert_eq!(
            engine.take_effects(),
            vec![Effect::CloseStream {
                generation,
                code: NORMAL_CLOSURE_CODE,
                reason: SHUTDOWN_REASON
            }]
        );
        assert!(engine.identity().is_none());
        assert!(engine.board().is_none());
    }
}
