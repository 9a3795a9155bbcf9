//! Recursive mutex with FIFO hand-off.
//!
//! The mutex only tracks ownership and the wait queue. It never blocks or
//! wakes anything itself: every transition returns an outcome and the kernel
//! moves threads between containers accordingly.

use super::MutexId;
use crate::thread::ThreadId;

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;

/// Result of [`Mutex::lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// The mutex was free, the caller owns it with count 1
    Acquired,
    /// The caller already owned it; new lock count
    Reentered(usize),
    /// Owned by someone else; the caller was appended to the wait queue
    MustBlock,
}

/// Result of [`Mutex::unlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// The caller does not own the mutex, nothing changed
    NotOwner,
    /// Count dropped but the caller still owns it
    StillHeld(usize),
    /// The mutex is free
    Released,
    /// Ownership moved to the first waiter, which must be made ready
    HandedOff(ThreadId),
}

/// Result of [`Mutex::remove_waiting_thread`] when the thread was involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The thread was only waiting; ownership is untouched
    Waiter,
    /// The thread owned the mutex; carries the new owner, if any
    Owner(Option<ThreadId>),
}

#[derive(Debug)]
pub struct Mutex {
    handle: MutexId,
    name: String,
    owner: Option<ThreadId>,
    lock_count: usize,
    wait_queue: VecDeque<ThreadId>,
}

impl Mutex {
    pub fn new(handle: MutexId, name: String) -> Self {
        Self {
            handle,
            name,
            owner: None,
            lock_count: 0,
            wait_queue: VecDeque::new(),
        }
    }

    pub fn handle(&self) -> MutexId {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> Option<ThreadId> {
        self.owner
    }

    pub fn lock_count(&self) -> usize {
        self.lock_count
    }

    pub fn is_locked(&self) -> bool {
        self.owner.is_some()
    }

    /// Threads waiting for ownership, first in line first.
    pub fn waiting_threads(&self) -> Vec<ThreadId> {
        self.wait_queue.iter().copied().collect()
    }

    pub fn is_waiting(&self, thread: ThreadId) -> bool {
        self.wait_queue.contains(&thread)
    }

    pub fn lock(&mut self, caller: ThreadId) -> LockOutcome {
        match self.owner {
            None => {
                self.owner = Some(caller);
                self.lock_count = 1;
                LockOutcome::Acquired
            }
            Some(owner) if owner == caller => {
                self.lock_count = self.lock_count.saturating_add(1);
                LockOutcome::Reentered(self.lock_count)
            }
            Some(_) => {
                self.wait_queue.push_back(caller);
                LockOutcome::MustBlock
            }
        }
    }

    pub fn unlock(&mut self, caller: ThreadId) -> UnlockOutcome {
        if self.owner != Some(caller) {
            return UnlockOutcome::NotOwner;
        }
        self.lock_count -= 1;
        if self.lock_count > 0 {
            return UnlockOutcome::StillHeld(self.lock_count);
        }
        match self.hand_off() {
            Some(next) => UnlockOutcome::HandedOff(next),
            None => UnlockOutcome::Released,
        }
    }

    /// Take `thread` out of this mutex, used when it is terminated.
    ///
    /// An owner gives up all of its recursive locks at once.
    pub fn remove_waiting_thread(&mut self, thread: ThreadId) -> Option<Removal> {
        if self.owner == Some(thread) {
            return Some(Removal::Owner(self.hand_off()));
        }
        let pos = self.wait_queue.iter().position(|&t| t == thread)?;
        self.wait_queue.remove(pos);
        Some(Removal::Waiter)
    }

    fn hand_off(&mut self) -> Option<ThreadId> {
        self.owner = self.wait_queue.pop_front();
        self.lock_count = usize::from(self.owner.is_some());
        self.owner
    }

    pub fn info(&self) -> MutexInfo {
        MutexInfo {
            handle: self.handle,
            name: self.name.clone(),
            owner: self.owner,
            lock_count: self.lock_count,
            waiting: self.waiting_threads(),
        }
    }
}

/// Copy of a mutex's state, handed out by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutexInfo {
    pub handle: MutexId,
    pub name: String,
    pub owner: Option<ThreadId>,
    pub lock_count: usize,
    pub waiting: Vec<ThreadId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn tid(id: usize) -> ThreadId {
        ThreadId::new(id).unwrap()
    }

    fn mutex() -> Mutex {
        Mutex::new(MutexId::new(1).unwrap(), "test".into())
    }

    #[test]
    fn test_lock_free_mutex() {
        let mut m = mutex();
        assert!(!m.is_locked());
        assert_eq!(m.lock(tid(1)), LockOutcome::Acquired);
        assert_eq!(m.owner(), Some(tid(1)));
        assert_eq!(m.lock_count(), 1);
    }

    #[test]
    fn test_recursion_needs_matching_unlocks() {
        let mut m = mutex();
        m.lock(tid(1));
        assert_eq!(m.lock(tid(1)), LockOutcome::Reentered(2));
        assert_eq!(m.lock(tid(1)), LockOutcome::Reentered(3));
        assert_eq!(m.lock(tid(2)), LockOutcome::MustBlock);

        assert_eq!(m.unlock(tid(1)), UnlockOutcome::StillHeld(2));
        assert_eq!(m.owner(), Some(tid(1)));
        assert_eq!(m.unlock(tid(1)), UnlockOutcome::StillHeld(1));
        assert_eq!(m.owner(), Some(tid(1)));
        assert_eq!(m.unlock(tid(1)), UnlockOutcome::HandedOff(tid(2)));
        assert_eq!(m.owner(), Some(tid(2)));
        assert_eq!(m.lock_count(), 1);
    }

    #[test]
    fn test_unlock_by_non_owner_is_ignored() {
        let mut m = mutex();
        assert_eq!(m.unlock(tid(1)), UnlockOutcome::NotOwner);
        m.lock(tid(1));
        assert_eq!(m.unlock(tid(2)), UnlockOutcome::NotOwner);
        assert_eq!(m.owner(), Some(tid(1)));
        assert_eq!(m.lock_count(), 1);
    }

    #[test]
    fn test_hand_off_is_fifo() {
        let mut m = mutex();
        m.lock(tid(1));
        m.lock(tid(2));
        m.lock(tid(3));
        assert_eq!(m.waiting_threads(), vec![tid(2), tid(3)]);

        assert_eq!(m.unlock(tid(1)), UnlockOutcome::HandedOff(tid(2)));
        assert_eq!(m.unlock(tid(2)), UnlockOutcome::HandedOff(tid(3)));
        assert_eq!(m.unlock(tid(3)), UnlockOutcome::Released);
        assert!(!m.is_locked());
        assert_eq!(m.lock_count(), 0);
    }

    #[test]
    fn test_remove_waiter_keeps_owner() {
        let mut m = mutex();
        m.lock(tid(1));
        m.lock(tid(2));
        m.lock(tid(3));

        assert_eq!(m.remove_waiting_thread(tid(2)), Some(Removal::Waiter));
        assert_eq!(m.remove_waiting_thread(tid(2)), None);
        assert_eq!(m.owner(), Some(tid(1)));
        assert_eq!(m.waiting_threads(), vec![tid(3)]);
        assert_eq!(m.remove_waiting_thread(tid(9)), None);
    }

    #[test]
    fn test_remove_owner_hands_off() {
        let mut m = mutex();
        m.lock(tid(1));
        m.lock(tid(1));
        m.lock(tid(2));

        assert_eq!(m.remove_waiting_thread(tid(1)), Some(Removal::Owner(Some(tid(2)))));
        assert_eq!(m.owner(), Some(tid(2)));
        assert_eq!(m.lock_count(), 1);

        assert_eq!(m.remove_waiting_thread(tid(2)), Some(Removal::Owner(None)));
        assert!(!m.is_locked());
    }

    #[test]
    fn test_info_snapshot() {
        let mut m = mutex();
        m.lock(tid(4));
        m.lock(tid(5));
        let info = m.info();
        assert_eq!(info.name, "test");
        assert_eq!(info.owner, Some(tid(4)));
        assert_eq!(info.lock_count, 1);
        assert_eq!(info.waiting, vec![tid(5)]);
    }
}
