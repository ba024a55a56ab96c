//! Bounded retention of the most recent flagged anomalies.

use std::collections::VecDeque;

/// Number of anomalies the detector keeps for the anomalies query.
pub const ANOMALY_BUFFER_CAPACITY: usize = 100;

/// Bounded FIFO: pushing at capacity drops the oldest entry.
#[derive(Debug, Clone)]
pub struct AnomalyBuffer<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> AnomalyBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: T) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Up to `limit` newest entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<T> {
        let start = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> Default for AnomalyBuffer<T> {
    fn default() -> Self {
        Self::new(ANOMALY_BUFFER_CAPACITY)
    }
}
