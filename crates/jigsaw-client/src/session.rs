//! Connection lifecycle manager.
//!
//! [`spawn_session`] starts an actor task that owns the [`Reconciler`]. All
//! inputs (commands from [`SessionHandle`]s, stream traffic, fetch results)
//! arrive on one queue and are handled strictly one at a time, so the engine
//! never sees two events concurrently.
//!
//! ```text
//!   SessionHandle ──┐                        ┌─► connection task (per generation)
//!                   │   mpsc<SessionEvent>   │
//!   connection ─────┼──────────────────────► actor ─► snapshot / profile tasks
//!   fetch / timers ─┘                        │
//!                                            └─► watch<BoardView>
//! ```
//!
//! The actor holds only a weak sender to its own queue. Once every handle is
//! dropped and no fetch is outstanding, the queue closes and the actor shuts
//! the session down.
//!
//! Reconnect backoff timers also hold only the weak sender, so a pending
//! retry never keeps a dropped session alive.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use url::Url;

use jigsaw_types::{Position, PuzzleId, User, UserId};

use crate::config::ClientConfig;
use crate::constants::{
    NORMAL_CLOSURE_CODE, RECONNECT_BASE_DELAY, RECONNECT_MAX_DELAY, SHUTDOWN_REASON,
};
use crate::geometry::Viewport;
use crate::reconcile::{BoardView, Effect, Generation, Reconciler};
use crate::snapshot::{load_snapshot, BoardSource, FetchError, Snapshot};
use crate::transport::StreamConnector;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session shut down")]
    Shutdown,
}

/// Everything the actor reacts to.
enum SessionEvent {
    // Commands
    SetIdentity(UserId),
    RequestHold {
        pos: Position,
        reply: oneshot::Sender<bool>,
    },
    Resize(Viewport),
    Reconnect,
    Shutdown {
        reply: oneshot::Sender<()>,
    },

    // Connection task
    StreamOpened {
        generation: Generation,
    },
    StreamMessage {
        generation: Generation,
        text: String,
    },
    StreamClosed {
        generation: Generation,
        error: Option<String>,
    },

    // Fetch tasks
    SnapshotLoaded {
        generation: Generation,
        result: Result<Snapshot, FetchError>,
    },
    ProfileLoaded {
        generation: Generation,
        user: UserId,
        result: Result<User, FetchError>,
    },

    // Backoff timer
    ReconnectDue {
        generation: Generation,
    },
}

/// Instructions to a connection task.
enum Outbound {
    Text(String),
    Close { code: u16, reason: &'static str },
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
    view: watch::Receiver<BoardView>,
}

impl SessionHandle {
    /// Switch the active user. Reopens the stream.
    pub fn set_identity(&self, user: UserId) -> Result<(), SessionError> {
        self.post(SessionEvent::SetIdentity(user))
    }

    /// Ask to hold the piece at `pos`. `Ok(false)` when the request was
    /// gated (not loaded, not live, no identity, or puzzle complete).
    pub async fn request_hold(&self, pos: Position) -> Result<bool, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.post(SessionEvent::RequestHold { pos, reply })?;
        rx.await.map_err(|_| SessionError::Shutdown)
    }

    pub fn resize(&self, viewport: Viewport) -> Result<(), SessionError> {
        self.post(SessionEvent::Resize(viewport))
    }

    /// Reopen the stream for the current identity.
    pub fn reconnect(&self) -> Result<(), SessionError> {
        self.post(SessionEvent::Reconnect)
    }

    /// Close the stream and stop the actor.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.post(SessionEvent::Shutdown { reply })?;
        rx.await.map_err(|_| SessionError::Shutdown)
    }

    /// Latest published view.
    pub fn view(&self) -> BoardView {
        self.view.borrow().clone()
    }

    /// A receiver notified on every view change.
    pub fn subscribe(&self) -> watch::Receiver<BoardView> {
        self.view.clone()
    }

    /// Wait until `predicate` holds for the published view.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&BoardView) -> bool,
    ) -> Result<BoardView, SessionError> {
        let mut rx = self.view.clone();
        let view = rx
            .wait_for(predicate)
            .await
            .map_err(|_| SessionError::Shutdown)?;
        Ok(view.clone())
    }

    fn post(&self, event: SessionEvent) -> Result<(), SessionError> {
        self.tx.send(event).map_err(|_| SessionError::Shutdown)
    }
}

/// Start a session for `puzzle`. Must be called inside a tokio runtime.
///
/// Nothing connects until [`SessionHandle::set_identity`] is called.
pub fn spawn_session(
    config: Arc<ClientConfig>,
    puzzle: PuzzleId,
    connector: Arc<dyn StreamConnector>,
    source: Arc<dyn BoardSource>,
) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let engine = Reconciler::new(puzzle.clone(), config.viewport);
    let (view_tx, view_rx) = watch::channel(engine.view());

    let actor = SessionActor {
        engine,
        puzzle,
        config,
        connector,
        source,
        events: tx.downgrade(),
        links: HashMap::new(),
        view: view_tx,
    };
    tokio::spawn(actor.run(rx));

    SessionHandle { tx, view: view_rx }
}

struct SessionActor {
    engine: Reconciler,
    puzzle: PuzzleId,
    config: Arc<ClientConfig>,
    connector: Arc<dyn StreamConnector>,
    source: Arc<dyn BoardSource>,
    events: mpsc::WeakUnboundedSender<SessionEvent>,
    /// Outbound queues of connection tasks we have not closed yet.
    links: HashMap<Generation, mpsc::UnboundedSender<Outbound>>,
    view: watch::Sender<BoardView>,
}

impl SessionActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionEvent>) {
        info!("Session for {} started", self.puzzle);
        let mut shutdown_reply = None;
        while let Some(event) = rx.recv().await {
            let event = match event {
                SessionEvent::Shutdown { reply } => {
                    shutdown_reply = Some(reply);
                    break;
                }
                other => other,
            };
            self.handle(event);
            self.execute();
            self.publish();
        }

        self.engine.shutdown();
        self.execute();
        self.publish();
        // dropping the remaining links ends any connection task still starting
        self.links.clear();
        info!("Session for {} stopped", self.puzzle);
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::SetIdentity(user) => self.engine.set_identity(user),
            SessionEvent::RequestHold { pos, reply } => {
                let sent = self.engine.request_hold(pos);
                let _ = reply.send(sent);
            }
            SessionEvent::Resize(viewport) => self.engine.resize(viewport),
            SessionEvent::Reconnect => self.engine.reconnect(),
            SessionEvent::Shutdown { .. } => {}
            SessionEvent::StreamOpened { generation } => self.engine.on_stream_opened(generation),
            SessionEvent::StreamMessage { generation, text } => {
                self.engine.on_stream_text(generation, &text);
            }
            SessionEvent::StreamClosed { generation, error } => {
                self.links.remove(&generation);
                self.engine.on_stream_closed(generation, error);
            }
            SessionEvent::SnapshotLoaded { generation, result } => {
                self.engine.on_snapshot(generation, result)
            }
            SessionEvent::ProfileLoaded {
                generation,
                user,
                result,
            } => self.engine.on_profile(generation, user, result),
            SessionEvent::ReconnectDue { generation } => self.engine.on_reconnect_due(generation),
        }
    }

    /// Run the I/O the engine asked for.
    fn execute(&mut self) {
        for effect in self.engine.take_effects() {
            match effect {
                Effect::OpenStream { generation, user } => self.open_stream(generation, &user),
                Effect::CloseStream {
                    generation,
                    code,
                    reason,
                } => {
                    if let Some(link) = self.links.remove(&generation) {
                        debug!("Closing stream {} ({} {})", generation, code, reason);
                        let _ = link.send(Outbound::Close { code, reason });
                    }
                }
                Effect::FetchSnapshot { generation } => self.fetch_snapshot(generation),
                Effect::FetchProfile { generation, user } => self.fetch_profile(generation, user),
                Effect::Send {
                    generation,
                    request,
                } => {
                    let text = match serde_json::to_string(&request) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode hold request: {}", e);
                            continue;
                        }
                    };
                    match self.links.get(&generation) {
                        Some(link) => {
                            let _ = link.send(Outbound::Text(text));
                        }
                        None => debug!("No open stream for {}, dropping request", generation),
                    }
                }
                Effect::ScheduleReconnect {
                    generation,
                    attempt,
                } => self.schedule_reconnect(generation, attempt),
            }
        }
    }

    fn publish(&self) {
        let version = self.engine.version();
        if self.view.borrow().version != version {
            self.view.send_replace(self.engine.view());
        }
    }

    fn open_stream(&mut self, generation: Generation, user: &UserId) {
        let url = self.config.stream_url(&self.puzzle, user);
        info!("Opening stream {} for {}", generation, user);
        let (link, outbound) = mpsc::unbounded_channel();
        self.links.insert(generation, link);
        tokio::spawn(run_connection(
            Arc::clone(&self.connector),
            url,
            generation,
            outbound,
            self.events.clone(),
        ));
    }

    fn fetch_snapshot(&self, generation: Generation) {
        let Some(events) = self.events.upgrade() else {
            return;
        };
        let source = Arc::clone(&self.source);
        let puzzle = self.puzzle.clone();
        let viewport = self.engine.viewport();
        tokio::spawn(async move {
            let result = load_snapshot(source.as_ref(), &puzzle, viewport).await;
            let _ = events.send(SessionEvent::SnapshotLoaded { generation, result });
        });
    }

    fn schedule_reconnect(&self, generation: Generation, attempt: u32) {
        let delay = reconnect_delay(attempt);
        info!(
            "Reconnecting {} in {:?} (attempt {})",
            self.puzzle, delay, attempt
        );
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            post(&events, SessionEvent::ReconnectDue { generation });
        });
    }

    fn fetch_profile(&self, generation: Generation, user: UserId) {
        let Some(events) = self.events.upgrade() else {
            return;
        };
        let source = Arc::clone(&self.source);
        tokio::spawn(async move {
            let result = source.fetch_user(&user).await;
            let _ = events.send(SessionEvent::ProfileLoaded {
                generation,
                user,
                result,
            });
        });
    }
}

/// Backoff before retry `attempt` (1-based): the base delay doubled per
/// earlier failure, capped.
fn reconnect_delay(attempt: u32) -> Duration {
    let doublings = attempt.saturating_sub(1).min(16);
    RECONNECT_BASE_DELAY
        .saturating_mul(1 << doublings)
        .min(RECONNECT_MAX_DELAY)
}

/// Post `event` to the actor. False once the session is gone.
fn post(events: &mpsc::WeakUnboundedSender<SessionEvent>, event: SessionEvent) -> bool {
    events
        .upgrade()
        .is_some_and(|tx| tx.send(event).is_ok())
}

/// Own one stream connection: forward inbound text to the actor and
/// outbound requests to the socket until either side closes.
async fn run_connection(
    connector: Arc<dyn StreamConnector>,
    url: Url,
    generation: Generation,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::WeakUnboundedSender<SessionEvent>,
) {
    let mut conn = match connector.connect(&url).await {
        Ok(conn) => conn,
        Err(e) => {
            post(
                &events,
                SessionEvent::StreamClosed {
                    generation,
                    error: Some(e.to_string()),
                },
            );
            return;
        }
    };
    if !post(&events, SessionEvent::StreamOpened { generation }) {
        let _ = conn.close(NORMAL_CLOSURE_CODE, SHUTDOWN_REASON).await;
        return;
    }

    let error = loop {
        tokio::select! {
            incoming = conn.recv() => match incoming {
                Some(Ok(text)) => {
                    if !post(&events, SessionEvent::StreamMessage { generation, text }) {
                        let _ = conn.close(NORMAL_CLOSURE_CODE, SHUTDOWN_REASON).await;
                        break None;
                    }
                }
                Some(Err(e)) => break Some(e.to_string()),
                None => break None,
            },
            command = outbound.recv() => match command {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = conn.send(text).await {
                        break Some(e.to_string());
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    if let Err(e) = conn.close(code, reason).await {
                        debug!("Close of stream {} failed: {}", generation, e);
                    }
                    break None;
                }
                None => {
                    let _ = conn.close(NORMAL_CLOSURE_CODE, SHUTDOWN_REASON).await;
                    break None;
                }
            },
        }
    };
    post(&events, SessionEvent::StreamClosed { generation, error });
}
