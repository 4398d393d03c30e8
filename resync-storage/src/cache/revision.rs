//! Partition revisions.
//!
//! Every state-changing mutation of a partition advances its revision.
//! Readers compare revisions to tell whether a snapshot moved on without
//! diffing entries.

use chrono::{DateTime, Utc};

/// A point in a partition's mutation history.
///
/// Compared by sequence first; `observed_at` is informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Revision {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this revision was produced.
    pub observed_at: DateTime<Utc>,
}

impl Revision {
    /// Create a revision with the given sequence number, observed now.
    pub fn new(sequence: u64) -> Self {
        Self {
            sequence,
            observed_at: Utc::now(),
        }
    }

    /// The revision before any collection was installed.
    pub fn zero() -> Self {
        Self {
            sequence: 0,
            observed_at: DateTime::UNIX_EPOCH,
        }
    }

    /// The revision following this one.
    pub fn next(&self) -> Self {
        Self::new(self.sequence + 1)
    }

    pub fn is_newer_than(&self, other: &Revision) -> bool {
        self.sequence > other.sequence
    }

    pub fn is_at_least(&self, other: &Revision) -> bool {
        self.sequence >= other.sequence
    }

    /// Number of mutations between two revisions.
    pub fn gap(&self, other: &Revision) -> u64 {
        self.sequence.abs_diff(other.sequence)
    }
}

impl Default for Revision {
    fn default() -> Self {
        Self::zero()
    }
}
