//! Comparator configuration errors.

use thiserror::Error;

/// Invalid comparator configuration
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompareError {
    /// Threshold outside `[0, 1]` or not a number
    #[error("Syscall threshold must be within [0, 1], got {value}")]
    InvalidThreshold {
        /// Rejected value
        value: f64,
    },
    /// An ignore rule that can never be applied
    #[error("Invalid ignore rule: {reason}")]
    InvalidRule {
        /// Why the rule was rejected
        reason: String,
    },
}
