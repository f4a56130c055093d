//! Time handling for events and segment names

use chrono::Utc;
use serde::{Deserialize, Serialize};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Nanoseconds since the Unix epoch.
///
/// Serialized as a bare integer, the wire form of an event's `time` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp {
    nanos: i64,
}

impl Timestamp {
    pub fn from_nanos(nanos: i64) -> Self {
        Self { nanos }
    }

    /// Whole seconds since the epoch, saturating at the representable range
    pub fn from_secs(secs: i64) -> Self {
        Self {
            nanos: secs.saturating_mul(NANOS_PER_SEC),
        }
    }

    /// Wall clock time; zero if the clock is outside the representable range
    pub fn now() -> Self {
        Self {
            nanos: Utc::now().timestamp_nanos_opt().unwrap_or(0),
        }
    }

    pub fn as_nanos(&self) -> i64 {
        self.nanos
    }
}

/// Half-open time range `[start, end)` used to scan a segment's timestamp index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeRange {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }
}
