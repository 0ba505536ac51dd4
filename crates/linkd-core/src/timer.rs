//! Ordered one-shot timer queue.
//!
//! Timers are identified by the event value they carry. Scheduling inserts
//! the entry before the first entry with a strictly later deadline, so timers
//! with equal deadlines fire in the order they were scheduled. Cancellation
//! removes the first entry whose event compares equal.
//!
//! The queue never reads the clock. Callers pass `now` into every method, and
//! the session loop re-reads the clock before each [`TimerQueue::pop_due`] so
//! a handler that schedules a zero-delay timer sees it fire in the same pass
//! only if its deadline has actually been reached.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug)]
struct Entry<E> {
    id: TimerId,
    deadline: Instant,
    event: E,
}

/// Deadline-ordered queue of pending events.
#[derive(Debug)]
pub struct TimerQueue<E> {
    entries: VecDeque<Entry<E>>,
    next_id: u64,
}

impl<E> TimerQueue<E> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self { entries: VecDeque::new(), next_id: 0 }
    }

    /// Schedule `event` to fire `delay` after `now`.
    ///
    /// Returns `None` if the deadline is not representable; the timer is not
    /// scheduled in that case.
    pub fn schedule(&mut self, event: E, delay: Duration, now: Instant) -> Option<TimerId> {
        let Some(deadline) = now.checked_add(delay) else {
            tracing::warn!(?delay, "timer deadline overflows, not scheduled");
            return None;
        };

        let id = TimerId(self.next_id);
        self.next_id += 1;

        let index = self.entries.partition_point(|entry| entry.deadline <= deadline);
        self.entries.insert(index, Entry { id, deadline, event });
        Some(id)
    }

    /// Cancel a timer by handle.
    pub fn cancel_id(&mut self, id: TimerId) -> bool {
        match self.entries.iter().position(|entry| entry.id == id) {
            Some(index) => {
                self.entries.remove(index);
                true
            },
            None => false,
        }
    }

    /// Time until the earliest deadline, clamped at zero.
    ///
    /// `None` when the queue is empty, meaning the caller may block
    /// indefinitely.
    pub fn time_until_next(&self, now: Instant) -> Option<Duration> {
        self.entries.front().map(|entry| entry.deadline.saturating_duration_since(now))
    }

    /// Remove and return the earliest event if its deadline has passed.
    pub fn pop_due(&mut self, now: Instant) -> Option<E> {
        if self.entries.front()?.deadline <= now {
            self.entries.pop_front().map(|entry| entry.event)
        } else {
            None
        }
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no timers are pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every pending timer.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<E: PartialEq> TimerQueue<E> {
    /// Cancel the first pending timer carrying `event`.
    ///
    /// Returns `false` if no such timer exists.
    pub fn cancel(&mut self, event: &E) -> bool {
        match self.entries.iter().position(|entry| entry.event == *event) {
            Some(index) => {
                self.entries.remove(index);
                true
            },
            None => false,
        }
    }

    /// Whether a timer carrying `event` is pending.
    pub fn contains(&self, event: &E) -> bool {
        self.entries.iter().any(|entry| entry.event == *event)
    }
}

impl<E> Default for TimerQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}
