//! Bounded membership test over transaction ids.
//!
//! Drops re-deliveries of the same upstream event. The capacity bound
//! with oldest-first eviction is a required invariant: long-lived
//! sessions must not grow memory without limit.

use std::collections::{HashSet, VecDeque};

pub struct DedupFilter {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DedupFilter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Record `id` and return true if it has not been seen before.
    /// Returns false for a duplicate; callers drop duplicates before
    /// dispatch. When full, the oldest recorded id is evicted.
    pub fn first_seen(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }

    /// Forget everything. Called on manual disconnect: transaction ids
    /// from a dropped connection are irrelevant to a fresh one.
    pub fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_are_rejected() {
        let mut filter = DedupFilter::new(16);
        assert!(filter.first_seen("a"));
        assert!(!filter.first_seen("a"));
        assert!(filter.first_seen("b"));
        assert!(!filter.first_seen("b"));
        assert!(!filter.first_seen("a"));
    }

    #[test]
    fn third_distinct_id_is_never_dropped() {
        let mut filter = DedupFilter::new(16);
        assert!(filter.first_seen("a"));
        assert!(!filter.first_seen("a"));
        assert!(filter.first_seen("c"));
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let mut filter = DedupFilter::new(3);
        assert!(filter.first_seen("a"));
        assert!(filter.first_seen("b"));
        assert!(filter.first_seen("c"));
        // "a" is evicted to make room.
        assert!(filter.first_seen("d"));
        assert_eq!(filter.len(), 3);
        assert!(filter.first_seen("a"));
        // "c" and "d" are still present.
        assert!(!filter.first_seen("c"));
        assert!(!filter.first_seen("d"));
    }

    #[test]
    fn clear_forgets_everything() {
        let mut filter = DedupFilter::new(4);
        filter.first_seen("a");
        filter.first_seen("b");
        filter.clear();
        assert!(filter.is_empty());
        assert!(filter.first_seen("a"));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut filter = DedupFilter::new(0);
        assert!(filter.first_seen("a"));
        assert!(!filter.first_seen("a"));
    }
}
