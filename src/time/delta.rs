//! Sleep timeline: a delta queue of sleeping threads.
//!
//! Each node stores its wake time relative to the node before it, so only the
//! head has to be touched when time advances. The absolute remaining time of
//! a node is the sum of the deltas from the head up to and including it.

use super::{Duration, Instant};
use crate::thread::ThreadId;

use alloc::collections::VecDeque;
use alloc::vec::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SleepNode {
    thread: ThreadId,
    delta: u64,
}

/// Sleeping threads ordered by remaining time to wake.
#[derive(Debug, Default)]
pub struct SleepTimeline {
    nodes: VecDeque<SleepNode>,
    /// Sum of all advances so far, used to turn absolute wake times into deltas.
    now: Instant,
}

impl SleepTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current time as seen by the timeline.
    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, thread: ThreadId) -> bool {
        self.nodes.iter().any(|node| node.thread == thread)
    }

    /// Insert `thread` to wake at the absolute time `wake_time`.
    ///
    /// A wake time that already passed is due at the next advance. Threads
    /// with equal wake times wake in insertion order.
    pub fn enqueue(&mut self, thread: ThreadId, wake_time: Instant) {
        let remaining = wake_time.duration_since(self.now);
        self.enqueue_after(thread, remaining);
    }

    /// Insert `thread` to wake `delay` from now.
    pub fn enqueue_after(&mut self, thread: ThreadId, delay: Duration) {
        let mut remaining = delay.as_nanos();
        let mut pos = self.nodes.len();

        for (i, node) in self.nodes.iter_mut().enumerate() {
            if remaining < node.delta {
                // The new node goes in front; the old one becomes relative to it.
                node.delta -= remaining;
                pos = i;
                break;
            }
            remaining -= node.delta;
        }

        self.nodes.insert(
            pos,
            SleepNode {
                thread,
                delta: remaining,
            },
        );
    }

    /// Advance time by `elapsed`.
    ///
    /// The head delta drops by `elapsed`, floored at zero. When ticks are
    /// coalesced and `elapsed` exceeds the head delta, the rest is taken off
    /// the following nodes in turn so every node keeps its absolute wake time.
    pub fn update_wake_time(&mut self, elapsed: Duration) {
        let mut carry = elapsed.as_nanos();
        self.now = self.now.saturating_add(elapsed);

        for node in self.nodes.iter_mut() {
            if carry == 0 {
                break;
            }
            let step = node.delta.min(carry);
            node.delta -= step;
            carry -= step;
        }
    }

    /// Pop the head if it is due.
    ///
    /// Several threads can share a wake time, so callers loop until this
    /// returns `None`.
    pub fn dequeue(&mut self) -> Option<ThreadId> {
        match self.nodes.front() {
            Some(node) if node.delta == 0 => self.nodes.pop_front().map(|node| node.thread),
            _ => None,
        }
    }

    /// Unlink `thread` from any position.
    ///
    /// # Returns
    ///
    /// `false` if the thread was not sleeping.
    pub fn remove_waiting_thread(&mut self, thread: ThreadId) -> bool {
        let Some(pos) = self.nodes.iter().position(|node| node.thread == thread) else {
            return false;
        };
        let removed = self.nodes.remove(pos);
        if let (Some(removed), Some(next)) = (removed, self.nodes.get_mut(pos)) {
            next.delta = next.delta.saturating_add(removed.delta);
        }
        true
    }

    /// Sleeping threads with their absolute wake times, soonest first.
    pub fn sleepers(&self) -> Vec<(ThreadId, Instant)> {
        let mut wake = self.now;
        self.nodes
            .iter()
            .map(|node| {
                wake = wake.saturating_add(Duration::from_nanos(node.delta));
                (node.thread, wake)
            })
            .collect()
    }

    /// Time until the head is due, `None` when nobody sleeps.
    pub fn next_wake_in(&self) -> Option<Duration> {
        self.nodes.front().map(|node| Duration::from_nanos(node.delta))
    }
}
