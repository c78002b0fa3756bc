//! Error taxonomy for the session/command execution core.
//!
//! One enum carries every signal named in the specification: user errors
//! (bad session id), resource errors (session limit, adapter start
//! failure), timing errors (command/idle timeout), execution errors (CDB
//! exit, cancellation), and internal errors (batch split failure, bad
//! config). The MCP transport layer maps these to protocol-appropriate
//! errors; this crate only needs a human-readable message and enough
//! context to build one.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CoreError {
    #[error("no session with id '{0}'")]
    SessionNotFound(String),

    #[error("session limit exceeded: {current}/{max} sessions active")]
    SessionLimitExceeded { current: usize, max: usize },

    #[error("session '{0}' has faulted and can no longer accept commands")]
    SessionFaulted(String),

    #[error("failed to start CDB for session '{session_id}': {reason}")]
    AdapterStartFailed { session_id: String, reason: String },

    #[error("CDB process fault in session '{session_id}': {reason}")]
    CdbFault { session_id: String, reason: String },

    #[error("command '{0}' timed out")]
    CommandTimeout(String),

    #[error("command '{command_id}' was cancelled: {reason}")]
    CommandCancelled { command_id: String, reason: String },

    #[error("batch split failure for command '{0}': marker not found in batch output")]
    BatchSplitFailure(String),

    #[error("configuration value for '{field}' is invalid: {reason}")]
    ConfigurationInvalid { field: String, reason: String },

    #[error("no command with id '{0}'")]
    CommandNotFound(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Io(err.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
