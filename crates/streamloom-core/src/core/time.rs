//! A UTC timestamp wrapper used for stream activity tracking and the
//! end-of-day boundary check.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A point in time, always normalized to UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(#[serde(with = "time::serde::rfc3339")] OffsetDateTime);

impl Timestamp {
    /// The current instant, per the system clock.
    #[must_use]
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    /// Wraps an existing `OffsetDateTime`, normalizing it to UTC.
    #[must_use]
    pub fn from_offset_date_time(dt: OffsetDateTime) -> Self {
        Self(dt.to_offset(time::UtcOffset::UTC))
    }

    /// The underlying `OffsetDateTime`.
    #[must_use]
    pub const fn as_offset_date_time(&self) -> OffsetDateTime {
        self.0
    }

    /// Seconds elapsed from `self` to `other`. Negative if `other` is
    /// earlier than `self`.
    #[must_use]
    pub fn seconds_until(&self, other: Timestamp) -> i64 {
        (other.0 - self.0).whole_seconds()
    }

    /// Returns a timestamp `seconds` later than `self` (negative moves
    /// earlier). Used by tests to simulate elapsed time deterministically.
    #[must_use]
    pub fn plus_seconds(&self, seconds: i64) -> Self {
        Self(self.0 + time::Duration::seconds(seconds))
    }

    /// True when this timestamp lands exactly on a UTC midnight boundary.
    #[must_use]
    pub fn is_midnight(&self) -> bool {
        let t = self.0.time();
        t.hour() == 0 && t.minute() == 0 && t.second() == 0
    }

    /// Parses an RFC 3339 timestamp string, as produced by most JSON event
    /// payloads for audit period boundaries.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is not a valid RFC 3339 timestamp.
    pub fn parse_rfc3339(value: &str) -> Result<Self, time::error::Parse> {
        OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
            .map(Self::from_offset_date_time)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
