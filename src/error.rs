//! Error taxonomy for the playback core.
//!
//! Every error is `Clone` so it can be cached by one-time initialisers and
//! carried on the broadcast bus.

use std::fmt;

use thiserror::Error;

/// The engine runtime could not be brought up. Fatal for the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeLoadError {
    #[error("failed to load runtime module {module}: {reason}")]
    Module { module: String, reason: String },
    #[error("runtime modules loaded but the playback capabilities are missing")]
    MissingCapabilities,
    #[error("runtime host dropped the backend readiness signal")]
    ReadinessLost,
}

/// The engine instance never finished construction. Fatal for the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("playback backend unavailable: {reason}")]
pub struct BackendUnavailableError {
    pub reason: String,
}

impl BackendUnavailableError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// The engine rejected one track. Recoverable, scoped to that track.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to load SID track {track}: {reason}")]
pub struct TrackLoadError {
    /// Display name of the track, or its path when it has no name.
    pub track: String,
    pub reason: String,
}

/// Why a fetch failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// The server answered with a non-success status.
    Status(u16),
    /// The request never produced a response.
    Transport(String),
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailure::Status(code) => write!(f, "status {code}"),
            FetchFailure::Transport(reason) => write!(f, "{reason}"),
        }
    }
}

/// Track bytes could not be fetched. Recoverable, scoped to one track.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to fetch SID file: {path} ({failure})")]
pub struct FetchError {
    pub path: String,
    pub failure: FetchFailure,
}

impl FetchError {
    pub fn status(path: impl Into<String>, code: u16) -> Self {
        Self {
            path: path.into(),
            failure: FetchFailure::Status(code),
        }
    }

    pub fn transport(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            failure: FetchFailure::Transport(reason.into()),
        }
    }

    /// HTTP status carried by the failure, if the server answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self.failure {
            FetchFailure::Status(code) => Some(code),
            FetchFailure::Transport(_) => None,
        }
    }
}

/// Any failure surfaced by adapter or sequencer operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayerError {
    #[error(transparent)]
    Runtime(#[from] RuntimeLoadError),
    #[error(transparent)]
    Backend(#[from] BackendUnavailableError),
    #[error(transparent)]
    TrackLoad(#[from] TrackLoadError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl PlayerError {
    /// Runtime and backend failures end the session; track-level ones do not.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, PlayerError::Runtime(_) | PlayerError::Backend(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),
}
