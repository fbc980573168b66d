//! Virtual clock and event queue.
//!
//! Time is a bare tick counter that only moves when an event is popped, so
//! a machine's behavior is a pure function of its event history. Ties are
//! broken by activation order, which keeps multi-unit interleavings
//! deterministic across runs.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

/// Virtual time, in ticks. Delays are relative; deadlines are absolute.
pub type Tick = u64;

/// Deadline-ordered queue of pending activations keyed by `T`.
///
/// Each key holds at most one pending activation. `activate` is first-wins:
/// while a key is queued, further activations for it are ignored, mirroring
/// hardware where a device already counting down cannot be re-armed.
#[derive(Debug)]
pub struct EventQueue<T> {
    now: Tick,
    seq: u64,
    heap: BinaryHeap<Reverse<(Tick, u64, T)>>,
    pending: BTreeSet<T>,
}

impl<T: Copy + Ord> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            now: 0,
            seq: 0,
            heap: BinaryHeap::new(),
            pending: BTreeSet::new(),
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> Tick {
        self.now
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_pending(&self, key: T) -> bool {
        self.pending.contains(&key)
    }

    /// Schedules `key` to fire `delay` ticks from now. Returns false if the
    /// key already has a pending activation, in which case the earlier
    /// deadline stands.
    pub fn activate(&mut self, key: T, delay: Tick) -> bool {
        if !self.pending.insert(key) {
            return false;
        }
        let due = self.now + delay;
        self.heap.push(Reverse((due, self.seq, key)));
        self.seq += 1;
        true
    }

    /// Removes the earliest event, advances the clock to its deadline, and
    /// returns its key. The key becomes eligible for activation again.
    pub fn pop(&mut self) -> Option<T> {
        let Reverse((due, _, key)) = self.heap.pop()?;
        debug_assert!(due >= self.now);
        self.now = due;
        self.pending.remove(&key);
        Some(key)
    }
}

impl<T: Copy + Ord> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn pops_in_deadline_order() {
        let mut queue = EventQueue::new();
        queue.activate(1u32, 30);
        queue.activate(2u32, 10);
        queue.activate(3u32, 20);
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.now(), 10);
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.now(), 30);
        assert!(queue.is_empty());
    }

    #[test]
    fn equal_deadlines_fire_in_activation_order() {
        let mut queue = EventQueue::new();
        queue.activate(7u32, 50);
        queue.activate(3u32, 50);
        queue.activate(5u32, 50);
        assert_eq!(queue.pop(), Some(7));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), Some(5));
    }

    #[test]
    fn first_activation_wins() {
        let mut queue = EventQueue::new();
        assert!(queue.activate(1u32, 100));
        assert!(!queue.activate(1u32, 5));
        assert!(queue.is_pending(1));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.now(), 100);
        assert!(!queue.is_pending(1));
    }

    #[test]
    fn reactivation_allowed_after_pop() {
        let mut queue = EventQueue::new();
        queue.activate(1u32, 10);
        assert_eq!(queue.pop(), Some(1));
        assert!(queue.activate(1u32, 10));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.now(), 20);
    }

    #[test]
    fn delays_compound_from_current_time() {
        let mut queue = EventQueue::new();
        queue.activate(1u32, 25);
        queue.pop();
        queue.activate(2u32, 25);
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.now(), 50);
    }
}
