//! Error types for the store client and the discovery layer.
//!
//! `StoreError` is what a backing store reports. `DiscoveryError` is what the
//! registry and its watchers surface to callers.

use thiserror::Error;

/// Errors reported by a [`StoreClient`](crate::store::StoreClient).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The node does not exist.
    #[error("node not found: {0}")]
    NoNode(String),

    /// The node already exists (returned by `create`).
    #[error("node already exists: {0}")]
    NodeExists(String),

    /// The node still has children and cannot be deleted.
    #[error("node not empty: {0}")]
    NotEmpty(String),

    /// Cannot connect to or communicate with the store.
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed node path.
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }

    /// The node (or, for `create`, its parent) is missing.
    pub fn is_no_node(&self) -> bool {
        matches!(self, StoreError::NoNode(_))
    }

    /// A `create` lost to an existing node.
    pub fn is_node_exists(&self) -> bool {
        matches!(self, StoreError::NodeExists(_))
    }
}

/// Errors surfaced by the registry, snapshot reader and watchers.
///
/// `Clone` so a single terminal failure of a watch loop can be handed to
/// every watcher attached to it.
#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    /// The backing store failed (transport, timeout or unexpected store error).
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// A stored instance record could not be decoded.
    #[error("decode error at {path}: {reason}")]
    Decode { path: String, reason: String },

    /// The queried service path has never been created.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The caller's deadline or cancellation fired, or the watcher was stopped.
    #[error("cancelled")]
    Cancelled,

    /// The watch on a service path could not be armed; no more updates will arrive.
    #[error("watch failed on {path}: {reason}")]
    WatchFailed { path: String, reason: String },

    /// A service name or instance ID is not usable as a path segment.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(String),
}

/// Result type alias for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

impl DiscoveryError {
    /// Returns true if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DiscoveryError::StoreUnavailable(err) => err.is_retryable(),
            _ => false,
        }
    }

    pub(crate) fn decode(path: impl Into<String>, err: serde_json::Error) -> Self {
        DiscoveryError::Decode {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for DiscoveryError {
    fn from(err: serde_json::Error) -> Self {
        DiscoveryError::Decode {
            path: String::new(),
            reason: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for DiscoveryError {
    fn from(err: config::ConfigError) -> Self {
        DiscoveryError::Config(err.to_string())
    }
}
