use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A half-open interval `[start, end)` on the UTC timeline.
///
/// # Invariants
/// `start < end`. Construction through [`TimeRange::new`] enforces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    /// Returns `None` when `end <= start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (end > start).then_some(Self { start, end })
    }

    /// Builds the interval for a charter of `hours` starting at `start`.
    pub fn from_hours(start: DateTime<Utc>, hours: u32) -> Option<Self> {
        Self::new(start, start + Duration::hours(i64::from(hours)))
    }

    #[inline]
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    #[inline]
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    #[inline]
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Strict open-interval overlap: touching endpoints do not overlap.
    ///
    /// `self.start < other.end && self.end > other.start`
    #[inline]
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// Smallest interval covering both.
    pub fn hull(&self, other: &TimeRange) -> TimeRange {
        TimeRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}
