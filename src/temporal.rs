//! # Temporal Module
//!
//! Half-open validity intervals for historized entity versions.
//! All times are UTC epoch seconds; the `OPEN` sentinel marks a version
//! whose validity has not yet been superseded.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use time::OffsetDateTime;

/// A temporal instant as UTC epoch seconds.
/// Using i64 to support both past and future times, and to avoid floating point issues.
pub type Instant = i64;

/// Sentinel upper bound for a validity interval that is still open.
pub const OPEN: Instant = i64::MAX;

/// Convert an [`OffsetDateTime`] to an engine instant.
pub fn instant_from_datetime(dt: OffsetDateTime) -> Instant {
    dt.unix_timestamp()
}

/// A validity interval [start, end) where start < end.
///
/// Intervals are half-open: the start time is inclusive, the end time is
/// exclusive. Adjacent intervals [t0, t1) and [t1, t2) therefore tile time
/// without gaps, which is what the history partition invariant relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    /// Start time (inclusive)
    pub start: Instant,
    /// End time (exclusive, `OPEN` when not yet superseded)
    pub end: Instant,
}

impl Interval {
    /// Create a new interval with validation.
    ///
    /// # Errors
    /// Returns an error if start >= end (zero-length intervals are not allowed).
    pub fn new(start: Instant, end: Instant) -> anyhow::Result<Self> {
        if start >= end {
            anyhow::bail!(
                "Invalid interval: start ({}) must be less than end ({})",
                start,
                end
            );
        }
        Ok(Self { start, end })
    }

    /// Create an open-ended interval starting from a specific time.
    pub fn from_start(start: Instant) -> Self {
        Self { start, end: OPEN }
    }

    /// Check if this interval is still open (not yet superseded).
    pub fn is_open(&self) -> bool {
        self.end == OPEN
    }

    /// Check if this interval contains a specific instant.
    pub fn contains(&self, instant: Instant) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Get the duration of this interval in seconds.
    /// Returns None for open intervals.
    pub fn duration(&self) -> Option<i64> {
        if self.end == OPEN {
            None
        } else {
            Some(self.end - self.start)
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.end == OPEN {
            write!(f, "[{}, +∞)", self.start)
        } else {
            write!(f, "[{}, {})", self.start, self.end)
        }
    }
}

impl PartialOrd for Interval {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Interval {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.start.cmp(&other.start) {
            Ordering::Equal => self.end.cmp(&other.end),
            ordering => ordering,
        }
    }
}

/// Check if two intervals are adjacent (meet).
#[inline]
pub fn is_adjacent(a: &Interval, b: &Interval) -> bool {
    a.end == b.start || b.end == a.start
}

/// Check if two intervals overlap.
#[inline]
pub fn is_overlapping(a: &Interval, b: &Interval) -> bool {
    // Half-open intervals overlap unless one ends at or before the other's start.
    a.start < b.end && b.start < a.end
}

/// Compute the intersection of two intervals.
/// Returns None if the intervals don't overlap.
pub fn intersect(a: &Interval, b: &Interval) -> Option<Interval> {
    let start = a.start.max(b.start);
    let end = a.end.min(b.end);

    if start < end {
        Some(Interval { start, end })
    } else {
        None
    }
}

/// Check that a set of intervals tiles time with no gaps and no overlaps.
///
/// The intervals must be sortable into a chain where each interval's end
/// equals the next interval's start. An empty set tiles trivially.
pub fn tiles(intervals: &[Interval]) -> bool {
    if intervals.is_empty() {
        return true;
    }

    let mut sorted: Vec<Interval> = intervals.to_vec();
    sorted.sort();

    for pair in sorted.windows(2) {
        if pair[0].end != pair[1].start {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_creation() {
        let interval = Interval::new(100, 200).unwrap();
        assert_eq!(interval.start, 100);
        assert_eq!(interval.end, 200);
    }

    #[test]
    fn test_interval_validation() {
        assert!(Interval::new(100, 100).is_err());
        assert!(Interval::new(200, 100).is_err());
    }

    #[test]
    fn test_interval_contains() {
        let interval = Interval::new(100, 200).unwrap();
        assert!(interval.contains(150));
        assert!(interval.contains(100)); // 100 is included in [100, 200)
        assert!(!interval.contains(200)); // 200 is excluded from [100, 200)
        assert!(!interval.contains(50));
    }

    #[test]
    fn test_open_interval() {
        let open = Interval::from_start(100);
        assert!(open.is_open());
        assert!(open.contains(100));
        assert!(open.contains(i64::MAX - 1));
        assert_eq!(open.duration(), None);
        assert_eq!(format!("{}", open), "[100, +∞)");
    }

    #[test]
    fn test_intersection() {
        let a = Interval::new(100, 200).unwrap();
        let b = Interval::new(150, 250).unwrap();
        let c = Interval::new(300, 400).unwrap();

        let intersection = intersect(&a, &b).unwrap();
        assert_eq!(intersection.start, 150);
        assert_eq!(intersection.end, 200);

        assert!(intersect(&a, &c).is_none());
    }

    #[test]
    fn test_adjacent_intervals() {
        let a = Interval::new(100, 200).unwrap();
        let b = Interval::new(200, 300).unwrap();
        let c = Interval::new(300, 400).unwrap();

        assert!(is_adjacent(&a, &b));
        assert!(is_adjacent(&b, &c));
        assert!(!is_adjacent(&a, &c));
    }

    #[test]
    fn test_overlapping_intervals() {
        let a = Interval::new(100, 200).unwrap();
        let b = Interval::new(150, 250).unwrap();
        let c = Interval::new(200, 300).unwrap();

        assert!(is_overlapping(&a, &b));
        assert!(!is_overlapping(&a, &c));
    }

    #[test]
    fn test_tiles_clean_chain() {
        let chain = vec![
            Interval::new(100, 200).unwrap(),
            Interval::new(200, 300).unwrap(),
            Interval::from_start(300),
        ];
        assert!(tiles(&chain));
    }

    #[test]
    fn test_tiles_rejects_gap_and_overlap() {
        let gapped = vec![
            Interval::new(100, 200).unwrap(),
            Interval::new(250, 300).unwrap(),
        ];
        assert!(!tiles(&gapped));

        let overlapping = vec![
            Interval::new(100, 200).unwrap(),
            Interval::new(150, 300).unwrap(),
        ];
        assert!(!tiles(&overlapping));
    }

    #[test]
    fn test_tiles_empty_and_singleton() {
        assert!(tiles(&[]));
        assert!(tiles(&[Interval::from_start(0)]));
    }
}
