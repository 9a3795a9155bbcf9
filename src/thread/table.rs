//! Arena of thread records addressed by handle.

use super::{Thread, ThreadId};
use crate::errors::SpawnError;

use alloc::vec::Vec;

/// Owns every live [`Thread`]. Slot `n - 1` holds the thread with handle `n`,
/// so lookup by handle is a single index operation. Handles are never reused;
/// a reaped thread leaves an empty slot behind.
#[derive(Debug)]
pub struct ThreadTable {
    slots: Vec<Option<Thread>>,
    live: usize,
    max_threads: usize,
}

impl ThreadTable {
    pub fn new(max_threads: usize) -> Self {
        Self {
            slots: Vec::new(),
            live: 0,
            max_threads,
        }
    }

    /// Make room for one more thread and return the handle it will get.
    ///
    /// Nothing is committed: if the caller bails out afterwards the table is
    /// unchanged apart from spare capacity.
    pub fn reserve(&mut self) -> Result<ThreadId, SpawnError> {
        let next = self.slots.len() + 1;
        if next > self.max_threads {
            return Err(SpawnError::TooManyThreads);
        }
        self.slots
            .try_reserve(1)
            .map_err(|_| SpawnError::OutOfMemory)?;
        ThreadId::new(next).ok_or(SpawnError::TooManyThreads)
    }

    /// Store a thread whose handle came from [`reserve`](Self::reserve).
    ///
    /// Returns the thread back if its handle is not the reserved one.
    pub fn insert(&mut self, thread: Thread) -> Result<ThreadId, Thread> {
        let id = thread.id();
        if id.get() != self.slots.len() + 1 || self.slots.len() == self.slots.capacity() {
            return Err(thread);
        }
        self.slots.push(Some(thread));
        self.live += 1;
        Ok(id)
    }

    pub fn get(&self, id: ThreadId) -> Option<&Thread> {
        self.slots.get(id.get() - 1).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: ThreadId) -> Option<&mut Thread> {
        self.slots.get_mut(id.get() - 1).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.get(id).is_some()
    }

    /// Drop the record from the arena and hand it to the caller.
    pub fn remove(&mut self, id: ThreadId) -> Option<Thread> {
        let removed = self.slots.get_mut(id.get() - 1).and_then(Option::take);
        if removed.is_some() {
            self.live -= 1;
        }
        removed
    }

    /// Slot index the next inserted thread lands in.
    pub fn mark(&self) -> usize {
        self.slots.len()
    }

    /// Undo every insert made since `mark` and hand the records back.
    ///
    /// The handles of the discarded records are handed out again, so this is
    /// only for records nobody has seen yet.
    pub fn rollback(&mut self, mark: usize) -> Vec<Thread> {
        let start = mark.min(self.slots.len());
        let removed: Vec<Thread> = self.slots.drain(start..).flatten().collect();
        self.live -= removed.len();
        removed
    }

    /// Number of live threads.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Thread> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    pub fn ids(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.iter().map(Thread::id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::SchedulingPolicy;
    use alloc::vec;

    fn spawn(table: &mut ThreadTable, name: &str) -> ThreadId {
        let id = table.reserve().unwrap();
        table
            .insert(Thread::new(id, name.into(), SchedulingPolicy::Normal))
            .unwrap()
    }

    #[test]
    fn test_handles_are_sequential_and_never_reused() {
        let mut table = ThreadTable::new(16);
        let a = spawn(&mut table, "a");
        let b = spawn(&mut table, "b");
        assert_eq!((a.get(), b.get()), (1, 2));

        assert!(table.remove(a).is_some());
        assert!(table.remove(a).is_none());
        assert!(!table.contains(a));

        let c = spawn(&mut table, "c");
        assert_eq!(c.get(), 3);
        assert_eq!(table.len(), 2);
        assert_eq!(table.ids().collect::<Vec<_>>(), vec![b, c]);
    }

    #[test]
    fn test_reserve_respects_limit() {
        let mut table = ThreadTable::new(1);
        spawn(&mut table, "only");
        assert_eq!(table.reserve(), Err(SpawnError::TooManyThreads));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_rollback_discards_recent_inserts() {
        let mut table = ThreadTable::new(8);
        let kept = spawn(&mut table, "kept");
        let mark = table.mark();
        spawn(&mut table, "x");
        spawn(&mut table, "y");

        let removed = table.rollback(mark);
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].name(), "x");
        assert_eq!(table.len(), 1);
        assert_eq!(table.ids().collect::<Vec<_>>(), vec![kept]);
        assert_eq!(spawn(&mut table, "z").get(), 2);
    }

    #[test]
    fn test_insert_rejects_unreserved_handle() {
        let mut table = ThreadTable::new(4);
        let bogus = ThreadId::new(3).unwrap();
        let thread = Thread::new(bogus, "bogus".into(), SchedulingPolicy::Normal);
        assert!(table.insert(thread).is_err());
        assert!(table.is_empty());
    }
}
