//! Error types for the casedesk engine
//!
//! Errors are classified by where they surface:
//! - Validation: rejected input, no state change, reported inline
//! - Lookup: rejected login, user may retry
//! - Persistence: logged, in-memory state stays authoritative
//! - Network: skipped silently during polls, surfaced only at login

use std::path::PathBuf;
use thiserror::Error;

/// Rejected input to a state mutation. The operation is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Case id cannot be empty")]
    EmptyCaseId,

    #[error("No authenticated agent session")]
    NoAgentSession,
}

/// Failed transport or a backend response we could not use.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected status {0}")]
    Status(u16),

    #[error("Invalid response payload: {0}")]
    Decode(String),

    #[error("Backend rejected the request: {0}")]
    Rejected(String),
}

impl NetworkError {
    /// Transport failures and server-side statuses are worth another
    /// attempt; malformed or rejected payloads are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NetworkError::Transport(_) | NetworkError::Status(_))
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            NetworkError::Status(status.as_u16())
        } else if err.is_decode() {
            NetworkError::Decode(err.to_string())
        } else {
            NetworkError::Transport(err.to_string())
        }
    }
}

/// Failed directory resolution. Surfaced as a rejected login with a
/// human-readable reason; never fatal.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("User '{0}' was not found in the directory")]
    NotFound(String),

    #[error("Leader '{claimed}' does not match the directory record for '{agent}'")]
    LeaderMismatch { agent: String, claimed: String },

    #[error("Directory unavailable: {0}")]
    Unavailable(#[from] NetworkError),
}

/// Failed snapshot read or write. State remains correct in memory; writes
/// are not retried automatically.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to serialize state: {0}")]
    Serialize(String),

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
}

/// Umbrella error for engine-level operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Network(#[from] NetworkError),
}
