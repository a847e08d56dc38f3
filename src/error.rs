// src/error.rs
//! Error taxonomy for the ingestion core.
//!
//! Everything except [`ConfigError`] is scoped to a single source and a
//! single cycle: the coordinator records it in the cycle's outcome and moves on.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Malformed source list or settings. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} points to non-existent path {1:?}")]
    MissingPath(&'static str, PathBuf),

    #[error("no config file found (tried {0})")]
    NotFound(String),

    #[error("invalid source {source_id:?}: {message}")]
    InvalidSource { source_id: String, message: String },

    #[error("invalid setting {key}: {message}")]
    InvalidSetting { key: &'static str, message: String },
}

impl ConfigError {
    pub fn invalid_source(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSource {
            source_id: id.into(),
            message: message.into(),
        }
    }

    pub fn invalid_setting(key: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidSetting {
            key,
            message: message.into(),
        }
    }
}

/// Network or HTTP failure while retrieving a feed or an asset.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("connection to {url} failed: {message}")]
    Connect { url: String, message: String },

    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("fetch of {url} cancelled")]
    Cancelled { url: String },

    #[error("{url} exceeds the {limit} byte limit")]
    TooLarge { url: String, limit: usize },
}

impl FetchError {
    /// Timeouts, connection failures, 5xx and 429 are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Connect { .. } => true,
            FetchError::Status { status, .. } => *status >= 500 || *status == 429,
            FetchError::Transport { .. }
            | FetchError::Cancelled { .. }
            | FetchError::TooLarge { .. } => false,
        }
    }
}

/// The document is not a feed we understand.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unrecognized document (root element {0:?})")]
    Unrecognized(String),

    #[error("empty document")]
    Empty,

    #[error("malformed {dialect} document: {message}")]
    Malformed {
        dialect: &'static str,
        message: String,
    },
}

/// Persistence failure for one item or one asset.
#[derive(Error, Debug)]
pub enum StorageError {
    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid storage path {0:?}")]
    InvalidPath(String),

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

/// Best-effort asset retrieval failure. Never propagates past the owning item.
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("asset fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("asset store failed: {0}")]
    Store(#[from] StorageError),
}

/// Why a source's cycle ended early.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("interrupted by shutdown after {handled} of {seen} items")]
    Interrupted { handled: usize, seen: usize },
}
