//! Endpoint configuration.
//!
//! Resolution order: built-in local defaults, then the optional RON file at
//! `$XDG_CONFIG_HOME/jigsaw/client.ron`, then explicit overrides (CLI flags
//! or environment). The file may set any subset of fields:
//!
//! ```ron
//! (
//!     api_base: Some("https://jigsaw.example.net/api"),
//!     stream_base: Some("wss://jigsaw.example.net/api"),
//!     viewport: Some((width: 1920.0, height: 1080.0)),
//! )
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use jigsaw_types::{PuzzleId, UserId};

use crate::constants::{CONFIG_FILE, DEFAULT_API_BASE, DEFAULT_STREAM_BASE};
use crate::geometry::Viewport;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },
    #[error("invalid url {url:?}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("url {url} must use {expected}")]
    Scheme { url: String, expected: &'static str },
}

/// On-disk configuration. Every field is optional.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub api_base: Option<String>,
    pub stream_base: Option<String>,
    pub viewport: Option<Viewport>,
}

impl ConfigFile {
    /// `$XDG_CONFIG_HOME/jigsaw/client.ron`, if a config dir exists.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    /// Load `path`. A missing file yields an empty config.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        ron::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Where the client fetches snapshots and opens its stream.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    api_base: Url,
    stream_base: Url,
    pub viewport: Viewport,
}

impl ClientConfig {
    /// Build from explicit bases. `api_base` must be http(s), `stream_base`
    /// ws(s).
    pub fn new(api_base: &str, stream_base: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            api_base: parse_base(api_base, &["http", "https"], "http or https")?,
            stream_base: parse_base(stream_base, &["ws", "wss"], "ws or wss")?,
            viewport: Viewport::default(),
        })
    }

    /// Local development endpoints.
    pub fn local() -> Result<Self, ConfigError> {
        Self::new(DEFAULT_API_BASE, DEFAULT_STREAM_BASE)
    }

    /// Defaults overlaid with `file`.
    pub fn from_file(file: &ConfigFile) -> Result<Self, ConfigError> {
        let mut config = Self::new(
            file.api_base.as_deref().unwrap_or(DEFAULT_API_BASE),
            file.stream_base.as_deref().unwrap_or(DEFAULT_STREAM_BASE),
        )?;
        if let Some(viewport) = file.viewport {
            config.viewport = viewport;
        }
        Ok(config)
    }

    pub fn with_api_base(mut self, api_base: &str) -> Result<Self, ConfigError> {
        self.api_base = parse_base(api_base, &["http", "https"], "http or https")?;
        Ok(self)
    }

    pub fn with_stream_base(mut self, stream_base: &str) -> Result<Self, ConfigError> {
        self.stream_base = parse_base(stream_base, &["ws", "wss"], "ws or wss")?;
        Ok(self)
    }

    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    pub fn stream_base(&self) -> &Url {
        &self.stream_base
    }

    /// `GET {api}/puzzles/{id}`
    pub fn puzzle_url(&self, puzzle: &PuzzleId) -> Url {
        extend(&self.api_base, &["puzzles", puzzle.as_str()])
    }

    /// `GET {api}/users/{id}`
    pub fn user_url(&self, user: &UserId) -> Url {
        extend(&self.api_base, &["users", user.as_str()])
    }

    /// `{stream}/puzzles/{id}/ws?user={user}`
    pub fn stream_url(&self, puzzle: &PuzzleId, user: &UserId) -> Url {
        let mut url = extend(&self.stream_base, &["puzzles", puzzle.as_str(), "ws"]);
        url.query_pairs_mut().append_pair("user", user.as_str());
        url
    }
}

fn parse_base(raw: &str, schemes: &[&str], expected: &'static str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|source| ConfigError::Url {
        url: raw.to_string(),
        source,
    })?;
    if !schemes.contains(&url.scheme()) || url.cannot_be_a_base() {
        return Err(ConfigError::Scheme {
            url: raw.to_string(),
            expected,
        });
    }
    Ok(url)
}

fn extend(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    url.set_query(None);
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}
