//! Store errors.

use thiserror::Error;
use veritrace_core::TraceId;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Trace store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Format version this build cannot read
    #[error("Unsupported trace format version {found} (supported: {supported})")]
    UnsupportedVersion {
        /// Version found in the file
        found: u16,
        /// Version this build reads
        supported: u16,
    },
    /// Not a trace file
    #[error("Bad magic: not a trace file")]
    BadMagic,
    /// File decoded but failed integrity checks
    #[error("Corrupt trace: {reason}")]
    Corrupt {
        /// What did not match
        reason: String,
    },
    /// A trace with this id already exists
    #[error("Trace id collision: {id}")]
    IdCollision {
        /// The id that was already taken
        id: TraceId,
    },
    /// No trace with this id
    #[error("Trace not found: {id}")]
    NotFound {
        /// The missing id
        id: TraceId,
    },
    /// Trace could not be encoded
    #[error("Encoding failed: {reason}")]
    Encode {
        /// Encoder message
        reason: String,
    },
    /// Filesystem failure
    #[error("IO error: {reason}")]
    Io {
        /// I/O message
        reason: String,
    },
    /// A writer panicked while holding the store lock
    #[error("Store lock poisoned")]
    Poisoned,
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_version_display() {
        let err = StoreError::UnsupportedVersion {
            found: 7,
            supported: 1,
        };
        assert_eq!(
            err.to_string(),
            "Unsupported trace format version 7 (supported: 1)"
        );
    }

    #[test]
    fn test_io_conversion() {
        let err: StoreError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert!(matches!(err, StoreError::Io { .. }));
    }
}
