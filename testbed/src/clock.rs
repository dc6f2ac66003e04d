//! Event queue with deterministic ordering.
//!
//! Deliveries and tasks share one queue and one sequence counter, so the
//! execution order of a run depends only on the order in which work was
//! enqueued, never on the container's internals.

use crate::{SimError, SimResult, Time};
use std::collections::BTreeMap;

/// `base + delta`, failing when the sum leaves the representable time range
pub fn time_after(base: Time, delta: Time) -> SimResult<Time> {
    base.checked_add(delta).ok_or_else(|| {
        SimError::InvalidParameter(format!(
            "virtual time overflow: {}ms + {}ms",
            base, delta
        ))
    })
}

/// Key for ordering queued work.
///
/// Items are ordered by:
/// 1. Time (earlier first)
/// 2. Sequence number (enqueue order for equal times)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    /// Virtual time at which the item is due.
    pub time: Time,
    /// Globally increasing enqueue counter.
    pub sequence: u64,
}

/// Min-queue of items keyed by [`EventKey`]
#[derive(Debug, Clone)]
pub struct EventQueue<T> {
    items: BTreeMap<EventKey, T>,
    next_sequence: u64,
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            items: BTreeMap::new(),
            next_sequence: 0,
        }
    }

    /// Enqueue `item` at `time`, assigning the next sequence number
    pub fn push(&mut self, time: Time, item: T) -> EventKey {
        let key = EventKey {
            time,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.items.insert(key, item);
        key
    }

    /// Time of the earliest pending item
    pub fn peek_time(&self) -> Option<Time> {
        self.items.keys().next().map(|key| key.time)
    }

    /// Remove the earliest item if it is due at or before `until`
    pub fn pop_due(&mut self, until: Time) -> Option<(EventKey, T)> {
        match self.peek_time() {
            Some(time) if time <= until => self.items.pop_first(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of items ever enqueued
    pub fn enqueued(&self) -> u64 {
        self.next_sequence
    }

    /// Pending items in execution order
    pub fn iter(&self) -> impl Iterator<Item = (&EventKey, &T)> {
        self.items.iter()
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_key_ordering() {
        let earlier = EventKey { time: 1, sequence: 9 };
        let later = EventKey { time: 2, sequence: 0 };
        assert!(earlier < later);

        let first = EventKey { time: 5, sequence: 1 };
        let second = EventKey { time: 5, sequence: 2 };
        assert!(first < second);
    }

    #[test]
    fn test_pop_due_respects_deadline() {
        let mut queue = EventQueue::new();
        queue.push(10, "late");
        queue.push(3, "early");

        assert_eq!(queue.pop_due(2), None);
        assert_eq!(queue.pop_due(5).map(|(_, item)| item), Some("early"));
        assert_eq!(queue.pop_due(9), None);
        assert_eq!(queue.pop_due(10).map(|(_, item)| item), Some("late"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_equal_times_pop_in_enqueue_order() {
        let mut queue = EventQueue::new();
        for i in 0..5 {
            queue.push(0, i);
        }
        let popped: Vec<i32> = std::iter::from_fn(|| queue.pop_due(0).map(|(_, i)| i)).collect();
        assert_eq!(popped, vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.enqueued(), 5);
    }

    #[test]
    fn test_time_after_rejects_overflow() {
        assert_eq!(time_after(10, 5), Ok(15));
        assert!(matches!(
            time_after(Time::MAX - 1, 2),
            Err(SimError::InvalidParameter(_))
        ));
    }
}
