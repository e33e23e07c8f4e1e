//! Stage error taxonomy.
//!
//! Every collaborator failure is classified at the stage boundary as either
//! transient (worth retrying) or permanent (fail immediately). The watchdog
//! is the only producer of `Timeout`.

use thiserror::Error;

/// A classified stage failure.
#[derive(Debug, Error)]
pub enum StageError {
    /// Retryable: network timeouts, rate limits, temporary unavailability.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Non-retryable: missing input, corrupt binary, invalid configuration.
    #[error("permanent failure: {0}")]
    Permanent(String),
    /// Raised only by the watchdog on a stage's behalf.
    #[error("stage exceeded timeout")]
    Timeout,
}

impl StageError {
    pub fn transient(msg: impl std::fmt::Display) -> Self {
        Self::Transient(msg.to_string())
    }

    pub fn permanent(msg: impl std::fmt::Display) -> Self {
        Self::Permanent(msg.to_string())
    }

    /// Whether the retry policy should re-attempt after this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<diesel::result::Error> for StageError {
    fn from(e: diesel::result::Error) -> Self {
        Self::Transient(format!("database error: {e}"))
    }
}

impl From<std::io::Error> for StageError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            // Missing or unreadable input won't improve with retries.
            ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::InvalidData => {
                Self::Permanent(e.to_string())
            }
            _ => Self::Transient(e.to_string()),
        }
    }
}

impl From<crate::split::SplitError> for StageError {
    fn from(e: crate::split::SplitError) -> Self {
        use crate::split::SplitError;
        match e {
            SplitError::Io(io) => io.into(),
            SplitError::CorruptInput(msg) => Self::Permanent(format!("corrupt input: {msg}")),
            SplitError::CodecUnavailable(msg) => Self::Permanent(msg),
        }
    }
}

/// Errors surfaced by the orchestrator itself (not stage outcomes; a stage
/// failure always ends in a terminal ledger row, never an error here).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("document not found: {0}")]
    DocumentNotFound(String),
}
