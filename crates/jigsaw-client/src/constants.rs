//! Client configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Default REST base for local development.
pub const DEFAULT_API_BASE: &str = "http://localhost:8000/api";

/// Default stream base for local development.
pub const DEFAULT_STREAM_BASE: &str = "ws://localhost:8000/api";

/// WebSocket close code for a normal, intentional closure.
pub const NORMAL_CLOSURE_CODE: u16 = 1000;

/// Close reason sent when the active user changes.
pub const IDENTITY_CHANGED_REASON: &str = "identity changed";

/// Close reason sent when the stream is reopened for the same user.
pub const RECONNECT_REASON: &str = "reconnecting";

/// Close reason sent when the baseline could not be loaded.
pub const SNAPSHOT_FAILED_REASON: &str = "snapshot failed";

/// Close reason sent when the session shuts down.
pub const SHUTDOWN_REASON: &str = "session closed";

/// Per-request timeout for snapshot and user lookups.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// First reconnect delay after a lost stream or failed snapshot; doubles
/// per consecutive failure.
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Upper bound on the reconnect delay.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Viewport assumed until the renderer reports one.
pub const DEFAULT_VIEWPORT_WIDTH: f32 = 1280.0;
pub const DEFAULT_VIEWPORT_HEIGHT: f32 = 720.0;

/// Config file name under the user config directory.
pub const CONFIG_FILE: &str = "jigsaw/client.ron";
