//! Garbage accounting for append-only calendar files.
//!
//! Appending is cheap but leaves garbage behind: superseded copies of
//! updated events, tombstones, and events written out of chronological
//! order. The counters below weigh that garbage; once the score passes the
//! configured threshold the next save rewrites the file from scratch.

use serde::{Deserialize, Serialize};

use crate::event::Timestamp;

const REMOVED_WEIGHT: u32 = 1;
const UNSORTED_WEIGHT: u32 = 3;
const DUPLICATE_WEIGHT: u32 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcCounters {
    /// Events stored more than once (updated by appending a new copy)
    pub duplicates: u32,
    /// Events written before an event that starts later
    pub unsorted: u32,
    /// Tombstones, and the stale copies they make dead
    pub removed: u32,
}

impl GcCounters {
    pub fn score(&self) -> u32 {
        self.removed
            .saturating_mul(REMOVED_WEIGHT)
            .saturating_add(self.unsorted.saturating_mul(UNSORTED_WEIGHT))
            .saturating_add(self.duplicates.saturating_mul(DUPLICATE_WEIGHT))
    }

    pub fn needs_rebuild(&self, threshold: u32) -> bool {
        self.score() > threshold
    }

    pub fn reset(&mut self) {
        *self = GcCounters::default();
    }
}

/// Start time of the latest event in file order, to tell when an append
/// lands out of order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOrder {
    high_water: Timestamp,
}

impl WriteOrder {
    /// Record that an event starting at `start` is written after everything
    /// seen so far. Returns `true` when that breaks chronological order.
    pub fn observe(&mut self, start: Timestamp) -> bool {
        let unsorted = start < self.high_water;
        self.high_water = self.high_water.max(start);
        unsorted
    }

    /// Whether an event starting at `start` would be written out of order.
    pub fn is_behind(&self, start: Timestamp) -> bool {
        start < self.high_water
    }

    pub fn reset_to(&mut self, start: Timestamp) {
        self.high_water = start;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_score() {
        let counters = GcCounters {
            duplicates: 5,
            unsorted: 2,
            removed: 3,
        };
        assert_eq!(counters.score(), 3 + 6 + 10);
        assert!(counters.needs_rebuild(18));
        assert!(!counters.needs_rebuild(19));
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let counters = GcCounters {
            duplicates: 50,
            ..Default::default()
        };
        assert!(!counters.needs_rebuild(100));
        let counters = GcCounters {
            unsorted: 34,
            ..Default::default()
        };
        assert!(counters.needs_rebuild(100));
    }

    #[test]
    fn test_write_order() {
        let mut order = WriteOrder::default();
        assert!(!order.observe(10));
        assert!(!order.observe(10));
        assert!(order.observe(5));
        assert!(!order.observe(20));
        assert!(order.observe(15));
        order.reset_to(0);
        assert!(!order.observe(1));
    }
}
