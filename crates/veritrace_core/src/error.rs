//! Core error types for VERITRACE.

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Invalid ID format
    #[error("Invalid ID: {reason}")]
    InvalidId {
        /// Why the identifier was rejected
        reason: String,
    },

    /// Invalid digest format
    #[error("Invalid digest: {reason}")]
    InvalidDigest {
        /// Why the digest was rejected
        reason: String,
    },

    /// Invalid version string
    #[error("Invalid version: {reason}")]
    InvalidVersion {
        /// Why the version was rejected
        reason: String,
    },

    /// Configuration value out of range
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfig {
        /// Offending field
        field: String,
        /// Why it was rejected
        reason: String,
    },
}
