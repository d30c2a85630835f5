use std::collections::{HashSet, VecDeque};

use crate::types::DedupKey;

/// Bounded set of already-processed trade keys.
///
/// When full, the oldest inserted key is evicted, so a burst of new trades
/// only ever forgets the tail of the window instead of the whole set.
#[derive(Debug)]
pub struct Deduplicator {
    order: VecDeque<DedupKey>,
    seen: HashSet<DedupKey>,
    capacity: usize,
}

impl Deduplicator {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    pub fn seen(&self, key: &DedupKey) -> bool {
        self.seen.contains(key)
    }

    pub fn mark(&mut self, key: DedupKey) {
        if self.seen.contains(&key) {
            return;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
    }

    /// Mark `key` and return `true` if it was not seen before.
    pub fn check_and_mark(&mut self, key: DedupKey) -> bool {
        if self.seen(&key) {
            return false;
        }
        self.mark(key);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
