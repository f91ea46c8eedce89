//! Capture errors.

use thiserror::Error;

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Why a capture produced no trace
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// Program missing, not executable, or the spawn itself failed
    #[error("Failed to launch {program}: {reason}")]
    SpawnFailed {
        /// Program as given by the caller
        program: String,
        /// What went wrong
        reason: String,
    },
    /// The interception backend cannot run on this host
    #[error("Tracer {tracer} unavailable: {reason}")]
    TracerUnavailable {
        /// Backend name
        tracer: String,
        /// Availability check failure
        reason: String,
    },
    /// Capture was cancelled; partial data is discarded
    #[error("Capture cancelled")]
    Cancelled,
    /// I/O failure while supervising the child
    #[error("I/O error during capture: {reason}")]
    Io {
        /// I/O message
        reason: String,
    },
}

impl CaptureError {
    pub(crate) fn io(err: std::io::Error) -> Self {
        Self::Io {
            reason: err.to_string(),
        }
    }

    /// Whether this error means no tracer backend could run
    #[must_use]
    pub const fn is_tracer_unavailable(&self) -> bool {
        matches!(self, Self::TracerUnavailable { .. })
    }
}
