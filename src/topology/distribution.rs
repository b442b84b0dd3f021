//! Slot ranges and the expected partition of the keyspace across masters.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::TopologyError;
use super::verify::TopologyMismatch;

/// Number of hash slots in the keyspace.
pub const TOTAL_SLOTS: u32 = 16384;

/// Inclusive range of hash slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
}

impl SlotRange {
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Number of slots in the range.
    pub fn len(&self) -> u32 {
        if self.end < self.start {
            0
        } else {
            u32::from(self.end - self.start) + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }
}

impl fmt::Display for SlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

impl FromStr for SlotRange {
    type Err = TopologyError;

    /// Parses `"5461-10922"` or a single slot `"42"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |v: &str| {
            v.trim()
                .parse::<u16>()
                .ok()
                .filter(|slot| u32::from(*slot) < TOTAL_SLOTS)
                .ok_or_else(|| TopologyError::Parse(format!("invalid slot {:?}", v)))
        };

        let range = match s.split_once('-') {
            Some((start, end)) => SlotRange::new(parse(start)?, parse(end)?),
            None => {
                let slot = parse(s)?;
                SlotRange::new(slot, slot)
            }
        };

        if range.is_empty() {
            return Err(TopologyError::Parse(format!("inverted slot range {:?}", s)));
        }
        Ok(range)
    }
}

/// Split the keyspace into `masters` contiguous ranges.
///
/// Boundaries fall on `round(i * TOTAL_SLOTS / masters)`, so range sizes
/// differ by at most one slot and three masters get the familiar
/// `0-5460`, `5461-10922`, `10923-16383` layout.
pub fn expected_partition(masters: u32) -> Result<Vec<SlotRange>, TopologyError> {
    if masters == 0 || masters > TOTAL_SLOTS {
        return Err(TopologyError::InvalidMasterCount(masters));
    }

    let boundary = |i: u32| -> u32 {
        // floor(i * TOTAL / M + 1/2) in integers
        (2 * u64::from(i) * u64::from(TOTAL_SLOTS) + u64::from(masters)) as u32
            / (2 * masters)
    };

    let ranges = (0..masters)
        .map(|i| {
            let start = boundary(i);
            let end = boundary(i + 1) - 1;
            SlotRange::new(start as u16, end as u16)
        })
        .collect();

    Ok(ranges)
}

/// Index of the range that owns `slot`.
pub fn slot_owner(slot: u16, ranges: &[SlotRange]) -> Option<usize> {
    ranges.iter().position(|r| r.contains(slot))
}

/// Check that `ranges` cover `[0, TOTAL_SLOTS)` exactly once.
pub fn check_coverage(ranges: &[SlotRange]) -> Result<(), TopologyMismatch> {
    let mut sorted: Vec<SlotRange> = ranges.to_vec();
    sorted.sort();

    let mut next: u32 = 0;
    for range in &sorted {
        let start = u32::from(range.start);
        if start > next {
            return Err(TopologyMismatch::Gap { slot: next as u16 });
        }
        if start < next {
            return Err(TopologyMismatch::Overlap { slot: range.start });
        }
        next = u32::from(range.end) + 1;
    }

    if next < TOTAL_SLOTS {
        return Err(TopologyMismatch::Gap { slot: next as u16 });
    }
    Ok(())
}
