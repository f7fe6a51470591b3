//! Timer heap for deferred callbacks.
//!
//! Callbacks are ordered by `(deadline, sequence)`, so callbacks sharing a
//! deadline run in the order they were scheduled.

use crate::types::Time;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

pub(crate) type TimerCallback = Box<dyn FnOnce()>;

/// A timer entry in the heap.
struct TimerEntry {
    deadline: Time,
    seq: u64,
    callback: TimerCallback,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first)
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of callbacks ordered by deadline.
#[derive(Default)]
pub(crate) struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

impl TimerHeap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Arms a callback and returns its sequence number.
    pub(crate) fn insert(&mut self, deadline: Time, callback: TimerCallback) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(TimerEntry {
            deadline,
            seq,
            callback,
        });
        seq
    }

    /// Sequence number the next inserted callback will receive.
    pub(crate) const fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Returns the earliest deadline, if any.
    pub(crate) fn peek_deadline(&self) -> Option<Time> {
        self.heap.peek().map(|e| e.deadline)
    }

    /// Pops the earliest callback due at `now` that was armed before `before_seq`.
    ///
    /// Callbacks armed while a batch is running carry a later sequence and
    /// are left for the next tick.
    pub(crate) fn pop_due(&mut self, now: Time, before_seq: u64) -> Option<TimerCallback> {
        let entry = self.heap.peek()?;
        if entry.deadline > now || entry.seq >= before_seq {
            return None;
        }
        self.heap.pop().map(|e| e.callback)
    }

    /// Removes every armed callback.
    pub(crate) fn drain(&mut self) -> Vec<TimerCallback> {
        self.heap.drain().map(|e| e.callback).collect()
    }
}

impl fmt::Debug for TimerHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHeap")
            .field("len", &self.heap.len())
            .field("next_deadline", &self.peek_deadline())
            .finish()
    }
}
