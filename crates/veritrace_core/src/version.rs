//! Version types for VERITRACE.
//!
//! `Version` tags the capturing tool; `FormatVersion` tags the on-disk
//! trace encoding so schema changes are detected instead of misread.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version of the crate that produced a trace
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Semantic version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    /// Major component
    pub major: u64,
    /// Minor component
    pub minor: u64,
    /// Patch component
    pub patch: u64,
}

impl Version {
    /// Create a new version
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// The version of this build
    #[must_use]
    pub fn current() -> Self {
        Self::parse(TOOL_VERSION).unwrap_or_default()
    }

    /// Parse from string
    ///
    /// # Errors
    ///
    /// Returns error if format is invalid
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(VersionError::InvalidFormat(s.to_string()));
        }

        let component = |p: &str| {
            p.parse::<u64>()
                .map_err(|_| VersionError::InvalidComponent(p.to_string()))
        };

        Ok(Self {
            major: component(parts[0])?,
            minor: component(parts[1])?,
            patch: component(parts[2])?,
        })
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::new(0, 1, 0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Version-related errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    /// Invalid format
    #[error("Invalid version format: {0}")]
    InvalidFormat(String),
    /// Invalid component
    #[error("Invalid version component: {0}")]
    InvalidComponent(String),
}

/// Trace encoding format tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FormatVersion(pub u16);

impl FormatVersion {
    /// The only format this build reads and writes
    pub const CURRENT: Self = Self(1);

    /// Whether this build can decode the format
    #[must_use]
    pub const fn is_supported(self) -> bool {
        self.0 == Self::CURRENT.0
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        let v = Version::parse("1.2.3").unwrap();
        assert_eq!(v, Version::new(1, 2, 3));
        assert_eq!(v.to_string(), "1.2.3");
    }

    #[test]
    fn test_version_parse_error() {
        assert!(matches!(
            Version::parse("1.2"),
            Err(VersionError::InvalidFormat(_))
        ));
        assert!(matches!(
            Version::parse("a.b.c"),
            Err(VersionError::InvalidComponent(_))
        ));
    }

    #[test]
    fn test_version_current_matches_package() {
        assert_eq!(Version::current().to_string(), TOOL_VERSION);
    }

    #[test]
    fn test_version_ord() {
        assert!(Version::new(1, 2, 3) < Version::new(1, 2, 4));
        assert!(Version::new(1, 9, 9) < Version::new(2, 0, 0));
    }

    #[test]
    fn test_format_version_support() {
        assert!(FormatVersion::CURRENT.is_supported());
        assert!(!FormatVersion(2).is_supported());
        assert!(!FormatVersion(0).is_supported());
        assert_eq!(FormatVersion::CURRENT.to_string(), "v1");
    }
}
