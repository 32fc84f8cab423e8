//! Ring buffer - bounded sample history for the criticality monitor

use std::collections::VecDeque;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Fixed-capacity sample history.
///
/// Pushing past capacity evicts the oldest sample. Reads are always in
/// chronological order (oldest first).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RingBuffer<T> {
    /// Buffered samples, oldest at the front.
    samples: VecDeque<T>,

    /// Maximum samples retained.
    capacity: usize,

    /// Total samples ever pushed (including evicted ones).
    pushed: u64,
}

impl<T> RingBuffer<T> {
    /// Create an empty buffer holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            pushed: 0,
        }
    }

    // =========================================================================
    // WRITING
    // =========================================================================

    /// Append a sample, trimming the oldest ones down to capacity.
    ///
    /// Returns the number of evicted samples.
    pub fn push(&mut self, sample: T) -> usize {
        self.pushed += 1;
        if self.capacity == 0 {
            return 1;
        }
        self.samples.push_back(sample);
        let mut evicted = 0;
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Drop every sample.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.pushed = 0;
    }

    // =========================================================================
    // READING
    // =========================================================================

    /// Iterate over buffered samples, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator + '_ {
        self.samples.iter()
    }

    /// The last `n` samples in chronological order (oldest first).
    pub fn read_window(&self, n: usize) -> Vec<&T> {
        let n = n.min(self.samples.len());
        self.samples.iter().skip(self.samples.len() - n).collect()
    }

    /// Most recent sample.
    pub fn latest(&self) -> Option<&T> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total samples pushed since creation or the last clear.
    pub fn pushed(&self) -> u64 {
        self.pushed
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Owned copy of the buffered samples, oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.samples.iter().cloned().collect()
    }
}
