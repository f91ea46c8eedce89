//! Orchestrator errors.
//!
//! Per-job problems never surface here: they become a
//! [`crate::FailureClass`] on the job. These errors cover configuration
//! and misuse of the job state machine.

use crate::job::Stage;
use thiserror::Error;

/// Result alias for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Orchestrator-level failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestratorError {
    /// A stage transition that does not move forward
    #[error("Illegal stage transition: {from} -> {to}")]
    IllegalTransition {
        /// Current stage
        from: Stage,
        /// Requested stage
        to: Stage,
    },

    /// Configuration values that cannot work
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong
        reason: String,
    },

    /// Configuration or manifest file could not be read or parsed
    #[error("Cannot load {path}: {reason}")]
    Load {
        /// File that failed
        path: String,
        /// Underlying error
        reason: String,
    },

    /// Comparison settings rejected
    #[error(transparent)]
    Compare(#[from] veritrace_compare::CompareError),
}
