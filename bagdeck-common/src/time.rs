//! Log-time primitives
//!
//! Recording time is `{sec, nsec}` as stamped by the recorder, not wall
//! clock. All engine arithmetic goes through nanosecond conversions so
//! carries and clamps live in one place.

use serde::{Deserialize, Serialize};
use std::fmt;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A point in recording time
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Time {
    pub sec: u32,
    pub nsec: u32,
}

impl Time {
    /// Zero time (start of the epoch used by the recording)
    pub const ZERO: Time = Time { sec: 0, nsec: 0 };

    /// Largest representable time
    pub const MAX: Time = Time {
        sec: u32::MAX,
        nsec: (NANOS_PER_SEC - 1) as u32,
    };

    /// Create a time, normalizing nanosecond overflow into seconds
    pub fn new(sec: u32, nsec: u32) -> Self {
        let extra = nsec as u64 / NANOS_PER_SEC;
        Time {
            sec: sec.saturating_add(extra as u32),
            nsec: (nsec as u64 % NANOS_PER_SEC) as u32,
        }
    }

    /// Create a time from whole seconds
    pub fn from_secs(sec: u32) -> Self {
        Time { sec, nsec: 0 }
    }

    /// Create a time from a total nanosecond count
    pub fn from_nanos(nanos: u64) -> Self {
        Time {
            sec: (nanos / NANOS_PER_SEC) as u32,
            nsec: (nanos % NANOS_PER_SEC) as u32,
        }
    }

    /// Total nanoseconds since time zero
    pub fn to_nanos(self) -> u64 {
        self.sec as u64 * NANOS_PER_SEC + self.nsec as u64
    }

    /// Add a nanosecond count, saturating at `Time::MAX`
    pub fn add_nanos(self, nanos: u64) -> Self {
        match self.to_nanos().checked_add(nanos) {
            Some(total) if total <= Time::MAX.to_nanos() => Time::from_nanos(total),
            _ => Time::MAX,
        }
    }

    /// Subtract a nanosecond count, saturating at zero
    pub fn saturating_sub_nanos(self, nanos: u64) -> Self {
        Time::from_nanos(self.to_nanos().saturating_sub(nanos))
    }

    /// Nanoseconds elapsed since `earlier`, or zero if `earlier` is later
    pub fn duration_since(self, earlier: Time) -> u64 {
        self.to_nanos().saturating_sub(earlier.to_nanos())
    }

    /// Clamp into `[start, end]` inclusive
    pub fn clamp_to(self, start: Time, end: Time) -> Self {
        if self < start {
            start
        } else if self > end {
            end
        } else {
            self
        }
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nsec)
    }
}

/// A half-open span of recording time: `[start, end)`
///
/// Cache queries and progress reporting use half-open ranges so adjacent
/// blocks tile without double-counting their shared boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Time,
    pub end: Time,
}

impl TimeRange {
    pub fn new(start: Time, end: Time) -> Self {
        TimeRange { start, end }
    }

    /// True when the range covers no time at all
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Length of the range in nanoseconds
    pub fn duration_nanos(&self) -> u64 {
        self.end.duration_since(self.start)
    }

    /// True when `t` lies inside `[start, end)`
    pub fn contains(&self, t: Time) -> bool {
        t >= self.start && t < self.end
    }

    /// Overlapping sub-range with `other`, if any
    pub fn intersect(&self, other: &TimeRange) -> Option<TimeRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if start < end {
            Some(TimeRange { start, end })
        } else {
            None
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
