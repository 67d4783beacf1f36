//! voxbind Error Types
//!
//! Centralized error handling for grammar building, backends and devices.

use thiserror::Error;

/// Central error type for voxbind
#[derive(Error, Debug)]
pub enum VoxError {
    /// A single phrase could not be turned into a grammar. Callers skip it.
    #[error("Grammar build error: {0}")]
    GrammarBuild(String),

    /// The backend rejected or failed to load a grammar set.
    #[error("Engine load error: {0}")]
    EngineLoad(String),

    /// No capture device is available right now.
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The external recognizer process died or never started.
    #[error("Recognizer process failure: {0}")]
    Subprocess(String),

    #[error("Host protocol error: {0}")]
    Protocol(String),

    #[error("Recognition session has stopped")]
    SessionClosed,

    #[error("Lock poisoned: {0}")]
    Lock(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Regex(#[from] regex::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VoxError {
    /// True when a fallback backend may take over.
    pub fn is_subprocess_failure(&self) -> bool {
        matches!(self, VoxError::Subprocess(_))
    }
}

/// Result type alias for voxbind operations
pub type VoxResult<T> = Result<T, VoxError>;

/// Helper to convert Mutex poison errors
impl<T> From<std::sync::PoisonError<T>> for VoxError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        VoxError::Lock(err.to_string())
    }
}
