//! Sequence-number arithmetic and the bounded recovery history

use crate::frame::SequenceNumber;
use std::collections::{HashSet, VecDeque};

/// Half of the 16-bit sequence space
const HALF_RANGE: i32 = 32768;

/// Full 16-bit sequence space
const RANGE: i32 = 65536;

/// Largest usable history window: beyond half the sequence space the signed
/// distance can no longer tell "behind" from "ahead"
pub const MAX_HISTORY_WINDOW: usize = HALF_RANGE as usize;

/// Signed modular distance from `reference` to `seq`
///
/// Returns a value in `-32768..=32767`: positive when `seq` is ahead of
/// `reference`, negative when behind, accounting for 16-bit wraparound.
///
/// # Example
/// ```
/// use frertester_core::recovery::window::seq_distance;
///
/// assert_eq!(seq_distance(0, 65535), 1);
/// assert_eq!(seq_distance(65535, 0), -1);
/// assert_eq!(seq_distance(8, 10), -2);
/// ```
pub fn seq_distance(seq: SequenceNumber, reference: SequenceNumber) -> i32 {
    (seq as i32 - reference as i32 + HALF_RANGE).rem_euclid(RANGE) - HALF_RANGE
}

/// Bounded set of recently accepted sequence numbers
///
/// Insertion order is kept so the least-recently-inserted entry is evicted on
/// overflow; membership is O(1).
#[derive(Debug, Clone)]
pub struct SequenceHistory {
    order: VecDeque<SequenceNumber>,
    members: HashSet<SequenceNumber>,
    capacity: usize,
}

impl SequenceHistory {
    /// Create an empty history holding at most `capacity` entries (min 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_HISTORY_WINDOW);
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    pub fn contains(&self, seq: SequenceNumber) -> bool {
        self.members.contains(&seq)
    }

    /// Insert a sequence number not already present
    ///
    /// Returns the evicted entry when the history was full.
    pub fn insert(&mut self, seq: SequenceNumber) -> Option<SequenceNumber> {
        if !self.members.insert(seq) {
            return None;
        }
        self.order.push_back(seq);
        if self.order.len() > self.capacity {
            let evicted = self.order.pop_front()?;
            self.members.remove(&evicted);
            return Some(evicted);
        }
        None
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries oldest first
    pub fn iter(&self) -> impl Iterator<Item = SequenceNumber> + '_ {
        self.order.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_simple() {
        assert_eq!(seq_distance(10, 8), 2);
        assert_eq!(seq_distance(8, 10), -2);
        assert_eq!(seq_distance(5, 5), 0);
    }

    #[test]
    fn test_distance_wraparound() {
        assert_eq!(seq_distance(0, 65535), 1);
        assert_eq!(seq_distance(1, 65534), 3);
        assert_eq!(seq_distance(65534, 1), -3);
    }

    #[test]
    fn test_distance_half_range() {
        assert_eq!(seq_distance(32768, 0), -32768);
        assert_eq!(seq_distance(32767, 0), 32767);
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = SequenceHistory::new(3);
        assert_eq!(history.insert(1), None);
        assert_eq!(history.insert(2), None);
        assert_eq!(history.insert(3), None);
        assert_eq!(history.insert(4), Some(1));
        assert!(!history.contains(1));
        assert!(history.contains(4));
        assert_eq!(history.iter().collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn test_history_duplicate_insert_keeps_order() {
        let mut history = SequenceHistory::new(3);
        history.insert(7);
        history.insert(8);
        assert_eq!(history.insert(7), None);
        assert_eq!(history.iter().collect::<Vec<_>>(), vec![7, 8]);
    }

    #[test]
    fn test_history_capacity_clamped() {
        assert_eq!(SequenceHistory::new(0).capacity(), 1);
        assert_eq!(
            SequenceHistory::new(100_000).capacity(),
            MAX_HISTORY_WINDOW
        );
    }

    #[test]
    fn test_history_clear() {
        let mut history = SequenceHistory::new(4);
        history.insert(1);
        history.clear();
        assert!(history.is_empty());
        assert!(!history.contains(1));
    }

    proptest::proptest! {
        #[test]
        fn prop_distance_recovers_sequence(seq: u16, reference: u16) {
            let d = seq_distance(seq, reference);
            proptest::prop_assert!((-32768..32768).contains(&d));
            proptest::prop_assert_eq!(reference.wrapping_add(d as u16), seq);
        }

        #[test]
        fn prop_history_never_exceeds_capacity(
            capacity in 1usize..64,
            seqs in proptest::collection::vec(proptest::prelude::any::<u16>(), 0..256),
        ) {
            let mut history = SequenceHistory::new(capacity);
            for seq in seqs {
                history.insert(seq);
                proptest::prop_assert!(history.len() <= capacity);
                proptest::prop_assert!(history.contains(seq));
            }
        }
    }
}
