//! Virtual-clock event queue
//!
//! [`EventQueue`] is the [`Scheduler`] used by tests and by the simulator,
//! and by the node runtime which advances it from a real clock. Events
//! fire in deadline order; ties fire in scheduling order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use crate::time::Timestamp;
use crate::traits::{Scheduler, TimerId};

/// Deadline-ordered queue of pending events
#[derive(Debug)]
pub struct EventQueue<T> {
    now: Timestamp,
    next_id: u64,
    heap: BinaryHeap<Reverse<(Timestamp, u64)>>,
    pending: HashMap<u64, (Timestamp, T)>,
}

impl<T> EventQueue<T> {
    /// Create an empty queue at time zero
    pub fn new() -> Self {
        Self::starting_at(Timestamp::ZERO)
    }

    /// Create an empty queue at the given time
    pub fn starting_at(now: Timestamp) -> Self {
        Self {
            now,
            next_id: 1,
            heap: BinaryHeap::new(),
            pending: HashMap::new(),
        }
    }

    /// Number of pending events
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if no event is pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Move the clock forward; moving backwards is ignored
    pub fn advance_to(&mut self, now: Timestamp) {
        if now > self.now {
            self.now = now;
        }
    }

    /// Move the clock forward by `delta`
    pub fn advance_by(&mut self, delta: Duration) {
        self.now += delta;
    }

    /// Deadline of the earliest pending event
    pub fn next_deadline(&mut self) -> Option<Timestamp> {
        self.discard_cancelled();
        self.heap.peek().map(|Reverse((due, _))| *due)
    }

    /// Pop the earliest event if it is due at the current time
    pub fn pop_due(&mut self) -> Option<(TimerId, T)> {
        self.discard_cancelled();
        let Reverse((due, _)) = *self.heap.peek()?;
        if due > self.now {
            return None;
        }
        self.pop_front()
    }

    /// Pop the earliest event, advancing the clock to its deadline
    pub fn pop_next(&mut self) -> Option<(Timestamp, TimerId, T)> {
        self.discard_cancelled();
        let Reverse((due, _)) = *self.heap.peek()?;
        self.advance_to(due);
        self.pop_front().map(|(id, event)| (due, id, event))
    }

    /// Iterate over pending events (unordered)
    pub fn pending_events(&self) -> impl Iterator<Item = (TimerId, Timestamp, &T)> {
        self.pending
            .iter()
            .map(|(id, (due, event))| (TimerId(*id), *due, event))
    }

    fn pop_front(&mut self) -> Option<(TimerId, T)> {
        let Reverse((_, id)) = self.heap.pop()?;
        self.pending
            .remove(&id)
            .map(|(_, event)| (TimerId(id), event))
    }

    fn discard_cancelled(&mut self) {
        while let Some(Reverse((_, id))) = self.heap.peek() {
            if self.pending.contains_key(id) {
                break;
            }
            self.heap.pop();
        }
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Scheduler<T> for EventQueue<T> {
    fn now(&self) -> Timestamp {
        self.now
    }

    fn schedule(&mut self, delay: Duration, event: T) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        let due = self.now + delay;
        self.heap.push(Reverse((due, id)));
        self.pending.insert(id, (due, event));
        TimerId(id)
    }

    fn cancel(&mut self, id: TimerId) -> bool {
        self.pending.remove(&id.0).is_some()
    }

    fn is_pending(&self, id: TimerId) -> bool {
        self.pending.contains_key(&id.0)
    }

    fn delay_left(&self, id: TimerId) -> Option<Duration> {
        self.pending
            .get(&id.0)
            .map(|(due, _)| due.saturating_duration_since(self.now))
    }
}
