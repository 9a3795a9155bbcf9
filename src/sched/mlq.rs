//! Multi-level ready queue.
//!
//! One FIFO [`PriorityQueueLevel`] per scheduling policy, kept in a chain
//! ordered from the highest to the lowest priority. Every lookup walks the
//! chain from the top, so a thread in a lower level is only returned when all
//! higher levels are empty. There is no aging: under constant high priority
//! load a lower level is never served.

use crate::thread::{SchedulingPolicy, ThreadId};

use alloc::collections::VecDeque;
use alloc::vec::Vec;

/// FIFO queue of ready threads sharing one scheduling policy.
#[derive(Debug)]
pub struct PriorityQueueLevel {
    policy: SchedulingPolicy,
    threads: VecDeque<ThreadId>,
}

impl PriorityQueueLevel {
    pub fn new(policy: SchedulingPolicy) -> Self {
        Self {
            policy,
            threads: VecDeque::new(),
        }
    }

    pub fn policy(&self) -> SchedulingPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn threads(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.threads.iter().copied()
    }

    fn remove(&mut self, thread_id: ThreadId) -> Option<ThreadId> {
        let pos = self.threads.iter().position(|&t| t == thread_id)?;
        self.threads.remove(pos)
    }
}

/// The ready queue: a chain of [`PriorityQueueLevel`]s, highest first.
///
/// The level after `levels[i]` is its lower-priority neighbour.
#[derive(Debug)]
pub struct MultiLevelQueue {
    levels: Vec<PriorityQueueLevel>,
}

impl MultiLevelQueue {
    /// Build the chain for `policies`, which are sorted highest first.
    /// Duplicates are ignored.
    pub fn new(policies: &[SchedulingPolicy]) -> Self {
        let mut sorted: Vec<SchedulingPolicy> = policies.to_vec();
        sorted.sort();
        sorted.dedup();
        Self {
            levels: sorted.into_iter().map(PriorityQueueLevel::new).collect(),
        }
    }

    /// Policies served by this queue, highest first.
    pub fn policies(&self) -> impl Iterator<Item = SchedulingPolicy> + '_ {
        self.levels.iter().map(PriorityQueueLevel::policy)
    }

    pub fn has_level(&self, policy: SchedulingPolicy) -> bool {
        self.level(policy).is_some()
    }

    pub fn level(&self, policy: SchedulingPolicy) -> Option<&PriorityQueueLevel> {
        self.levels.iter().find(|level| level.policy == policy)
    }

    /// Number of threads queued at `policy`, zero for an unknown level.
    pub fn level_len(&self, policy: SchedulingPolicy) -> usize {
        self.level(policy).map_or(0, PriorityQueueLevel::len)
    }

    /// Append the thread to the level matching `policy`.
    ///
    /// Returns `false` if no level carries that policy. Callers treat this
    /// as a programming error: every thread must have a valid policy.
    pub fn enqueue(&mut self, thread: ThreadId, policy: SchedulingPolicy) -> bool {
        match self.levels.iter_mut().find(|level| level.policy == policy) {
            Some(level) => {
                level.threads.push_back(thread);
                true
            }
            None => false,
        }
    }

    /// Head of the highest non-empty level, without removing it.
    pub fn peek(&self) -> Option<ThreadId> {
        self.levels
            .iter()
            .find_map(|level| level.threads.front().copied())
    }

    /// Remove and return the head of the highest non-empty level.
    ///
    /// `None` means nothing is ready to run.
    pub fn dequeue(&mut self) -> Option<ThreadId> {
        self.levels
            .iter_mut()
            .find_map(|level| level.threads.pop_front())
    }

    /// Policy of the level the next `dequeue` would take from.
    pub fn peek_policy(&self) -> Option<SchedulingPolicy> {
        self.levels
            .iter()
            .find(|level| !level.is_empty())
            .map(PriorityQueueLevel::policy)
    }

    /// Snapshot of every queued thread, highest level first.
    ///
    /// Meant for introspection, not for the scheduling path.
    pub fn queued_threads(&self) -> Vec<ThreadId> {
        self.levels.iter().flat_map(PriorityQueueLevel::threads).collect()
    }

    /// Pull a thread out of whatever level it sits in.
    pub fn remove(&mut self, thread_id: ThreadId) -> Option<ThreadId> {
        self.levels
            .iter_mut()
            .find_map(|level| level.remove(thread_id))
    }

    pub fn contains(&self, thread_id: ThreadId) -> bool {
        self.levels
            .iter()
            .any(|level| level.threads.contains(&thread_id))
    }

    pub fn len(&self) -> usize {
        self.levels.iter().map(PriorityQueueLevel::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(PriorityQueueLevel::is_empty)
    }
}

impl Default for MultiLevelQueue {
    fn default() -> Self {
        Self::new(&SchedulingPolicy::ALL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn tid(id: usize) -> ThreadId {
        ThreadId::new(id).unwrap()
    }

    #[test]
    fn test_levels_sorted_highest_first() {
        let queue = MultiLevelQueue::new(&[
            SchedulingPolicy::Background,
            SchedulingPolicy::LowLatency,
            SchedulingPolicy::Normal,
            SchedulingPolicy::Normal,
        ]);
        assert_eq!(
            queue.policies().collect::<Vec<_>>(),
            vec![
                SchedulingPolicy::LowLatency,
                SchedulingPolicy::Normal,
                SchedulingPolicy::Background
            ]
        );
    }

    #[test]
    fn test_enqueue_unknown_policy_fails() {
        let mut queue = MultiLevelQueue::new(&[SchedulingPolicy::Normal]);
        assert!(!queue.enqueue(tid(1), SchedulingPolicy::Background));
        assert!(queue.is_empty());
        assert!(queue.enqueue(tid(1), SchedulingPolicy::Normal));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.level_len(SchedulingPolicy::Normal), 1);
        assert_eq!(queue.level_len(SchedulingPolicy::Background), 0);
        assert!(!queue.has_level(SchedulingPolicy::Background));
    }

    #[test]
    fn test_dequeue_prefers_highest_level() {
        let mut queue = MultiLevelQueue::default();
        queue.enqueue(tid(1), SchedulingPolicy::Background);
        queue.enqueue(tid(2), SchedulingPolicy::Normal);
        queue.enqueue(tid(3), SchedulingPolicy::LowLatency);

        assert_eq!(queue.peek(), Some(tid(3)));
        assert_eq!(queue.peek_policy(), Some(SchedulingPolicy::LowLatency));
        assert_eq!(queue.dequeue(), Some(tid(3)));
        assert_eq!(queue.dequeue(), Some(tid(2)));
        assert_eq!(queue.dequeue(), Some(tid(1)));
        assert_eq!(queue.dequeue(), None);
        assert_eq!(queue.peek(), None);
    }

    #[test]
    fn test_fifo_within_level() {
        let mut queue = MultiLevelQueue::default();
        for id in 1..=4 {
            queue.enqueue(tid(id), SchedulingPolicy::Normal);
        }
        let order: Vec<_> = core::iter::from_fn(|| queue.dequeue()).collect();
        assert_eq!(order, vec![tid(1), tid(2), tid(3), tid(4)]);
    }

    #[test]
    fn test_peek_does_not_mutate() {
        let mut queue = MultiLevelQueue::default();
        queue.enqueue(tid(5), SchedulingPolicy::Normal);
        assert_eq!(queue.peek(), Some(tid(5)));
        assert_eq!(queue.peek(), Some(tid(5)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_queued_threads_snapshot_order() {
        let mut queue = MultiLevelQueue::default();
        queue.enqueue(tid(1), SchedulingPolicy::Background);
        queue.enqueue(tid(2), SchedulingPolicy::Normal);
        queue.enqueue(tid(3), SchedulingPolicy::Normal);
        queue.enqueue(tid(4), SchedulingPolicy::LowLatency);

        assert_eq!(queue.queued_threads(), vec![tid(4), tid(2), tid(3), tid(1)]);
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_remove_from_any_level() {
        let mut queue = MultiLevelQueue::default();
        queue.enqueue(tid(1), SchedulingPolicy::Normal);
        queue.enqueue(tid(2), SchedulingPolicy::Normal);
        queue.enqueue(tid(3), SchedulingPolicy::Background);

        assert_eq!(queue.remove(tid(3)), Some(tid(3)));
        assert_eq!(queue.remove(tid(1)), Some(tid(1)));
        assert_eq!(queue.remove(tid(1)), None);
        assert!(!queue.contains(tid(1)));
        assert_eq!(queue.queued_threads(), vec![tid(2)]);
    }

    #[test]
    fn test_priority_holds_for_interleaved_operations() {
        let policies = SchedulingPolicy::ALL;
        let mut queue = MultiLevelQueue::default();
        let mut policy_of = vec![SchedulingPolicy::Normal; 64];
        let mut next = 1;

        // Deterministic mix of enqueues and dequeues across all levels
        for round in 0..40usize {
            let policy = policies[(round * 7 + 3) % policies.len()];
            policy_of[next] = policy;
            queue.enqueue(tid(next), policy);
            next += 1;

            if round % 3 == 2 {
                let best = queue.peek_policy().unwrap();
                let got = queue.dequeue().unwrap();
                assert_eq!(policy_of[got.get()], best);
                // Nothing queued may outrank what was just returned
                assert!(queue
                    .queued_threads()
                    .iter()
                    .all(|t| !policy_of[t.get()].outranks(best)));
            }
        }
    }
}
