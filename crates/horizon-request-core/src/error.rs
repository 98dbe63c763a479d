//! Error types for Horizon Request core.

use std::fmt;

/// Errors raised by execution contexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// The context has shut down and no longer accepts invocations.
    Closed,
    /// The dedicated context thread could not be spawned.
    SpawnFailed(String),
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Execution context has been closed"),
            Self::SpawnFailed(msg) => write!(f, "Failed to spawn context thread: {msg}"),
        }
    }
}

impl std::error::Error for ContextError {}

impl From<std::io::Error> for ContextError {
    fn from(err: std::io::Error) -> Self {
        Self::SpawnFailed(err.to_string())
    }
}

/// A specialized Result type for execution context operations.
pub type Result<T> = std::result::Result<T, ContextError>;
