//! Wall-clock timestamps.
//!
//! Timestamps are metadata only. They never take part in trace identity;
//! event ordering is carried by position in the event list.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Wall clock timestamp - for metadata only, not for comparison logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since the Unix epoch
    pub seconds: u64,
    /// Sub-second nanoseconds
    pub nanos: u32,
}

impl Timestamp {
    /// Maximum nanoseconds per second
    pub const NANOS_PER_SEC: u32 = 1_000_000_000;

    /// Create a new timestamp
    #[must_use]
    pub fn new(seconds: u64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    /// Current time. A clock before the epoch reads as the epoch.
    #[must_use]
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            seconds: duration.as_secs(),
            nanos: duration.subsec_nanos(),
        }
    }

    /// Build from microseconds since the epoch
    #[must_use]
    pub fn from_epoch_micros(micros: u64) -> Self {
        Self {
            seconds: micros / 1_000_000,
            nanos: ((micros % 1_000_000) * 1_000) as u32,
        }
    }

    /// Microseconds since the epoch
    #[must_use]
    pub const fn as_micros(&self) -> u64 {
        self.seconds * 1_000_000 + (self.nanos / 1_000) as u64
    }

    /// Convert to milliseconds
    #[must_use]
    pub const fn as_millis(&self) -> u128 {
        self.seconds as u128 * 1_000 + self.nanos as u128 / 1_000_000
    }

    /// As a chrono UTC datetime
    #[must_use]
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.seconds).ok()?;
        Utc.timestamp_opt(secs, self.nanos).single()
    }

    /// RFC 3339 rendering, falling back to raw seconds
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        self.to_datetime()
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| self.to_string())
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_display() {
        let ts = Timestamp::new(12, 5);
        assert_eq!(ts.to_string(), "12.000000005");
    }

    #[test]
    fn test_timestamp_micros_roundtrip() {
        let ts = Timestamp::from_epoch_micros(1_700_000_000_123_456);
        assert_eq!(ts.seconds, 1_700_000_000);
        assert_eq!(ts.nanos, 123_456_000);
        assert_eq!(ts.as_micros(), 1_700_000_000_123_456);
    }

    #[test]
    fn test_timestamp_now_is_after_2020() {
        let ts = Timestamp::now();
        assert!(ts.seconds > 1_577_836_800);
    }

    #[test]
    fn test_timestamp_rfc3339() {
        let ts = Timestamp::new(0, 0);
        assert_eq!(ts.to_rfc3339(), "1970-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_timestamp_ordering() {
        assert!(Timestamp::new(1, 0) < Timestamp::new(1, 1));
        assert!(Timestamp::new(1, 999) < Timestamp::new(2, 0));
    }
}
