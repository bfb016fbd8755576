//! Error types for coordination engines.

use thiserror::Error;

/// Result type for coordination operations
pub type Result<T> = std::result::Result<T, CoordinationError>;

/// Errors that can occur while driving a coordination engine.
///
/// The variants map onto the recovery policy of the retry supervisor:
/// everything except a configuration error is recoverable in resilient
/// mode, while attempt-once mode treats any of them as fatal.
#[derive(Error, Debug)]
pub enum CoordinationError {
    /// A required configuration field is missing or zero-valued
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    /// The coordinator was unreachable or the namespace is absent
    #[error("Setup error: {reason}")]
    Setup { reason: String },

    /// The session died underneath an in-flight protocol step
    #[error("Session lost: {reason}")]
    SessionLost { reason: String },

    /// A referenced node does not exist in the coordinator
    #[error("Node {path} not found")]
    NodeNotFound { path: String },

    /// A node already exists at the requested path
    #[error("Node {path} already exists")]
    NodeExists { path: String },

    /// A create/list/exists call against the coordinator failed
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Unexpected internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CoordinationError {
    /// Creates a new configuration error with the given reason.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Creates a new setup error with the given reason.
    pub fn setup(reason: impl Into<String>) -> Self {
        Self::Setup {
            reason: reason.into(),
        }
    }

    /// Creates a new session-loss error with the given reason.
    pub fn session_lost(reason: impl Into<String>) -> Self {
        Self::SessionLost {
            reason: reason.into(),
        }
    }

    /// Creates a new node-not-found error for the given path.
    pub fn node_not_found(path: impl Into<String>) -> Self {
        Self::NodeNotFound { path: path.into() }
    }

    /// Creates a new node-exists error for the given path.
    pub fn node_exists(path: impl Into<String>) -> Self {
        Self::NodeExists { path: path.into() }
    }

    /// Creates a new protocol error with the given message.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a new internal error with the given message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Determines whether the resilient supervisor may retry after this
    /// error. Only configuration errors are permanent; everything else is
    /// environmental and may clear up between attempts.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config { .. })
    }
}

impl From<anyhow::Error> for CoordinationError {
    fn from(err: anyhow::Error) -> Self {
        CoordinationError::Internal {
            message: err.to_string(),
        }
    }
}
