//! User-facing synchronization primitives.
//!
//! The scheduler's own state is protected by a `spin::Mutex` under an
//! interrupt guard; the [`Mutex`] here is the blocking primitive handed to
//! threads through the kernel.

use crate::errors::MutexError;

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::num::NonZeroUsize;

pub mod mutex;

pub use mutex::{LockOutcome, Mutex, MutexInfo, Removal, UnlockOutcome};

/// Maximum length of a mutex name in bytes.
pub const MAX_MUTEX_NAME_LEN: usize = 128;

/// Handle of a kernel mutex. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MutexId(NonZeroUsize);

impl MutexId {
    pub fn new(id: usize) -> Option<Self> {
        NonZeroUsize::new(id).map(Self)
    }

    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl core::fmt::Display for MutexId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry of mutexes addressed by handle.
#[derive(Debug)]
pub struct MutexTable {
    slots: Vec<Option<Mutex>>,
    live: usize,
    max_mutexes: usize,
}

impl MutexTable {
    pub fn new(max_mutexes: usize) -> Self {
        Self {
            slots: Vec::new(),
            live: 0,
            max_mutexes,
        }
    }

    /// Register a new, unlocked mutex.
    ///
    /// An empty name is replaced by `Mutex-<handle>`. On failure the table is
    /// unchanged.
    pub fn create(&mut self, name: &str) -> Result<MutexId, MutexError> {
        if name.len() > MAX_MUTEX_NAME_LEN {
            return Err(MutexError::InvalidName);
        }
        let next = self.slots.len() + 1;
        if next > self.max_mutexes {
            return Err(MutexError::TooManyMutexes);
        }
        let handle = MutexId::new(next).ok_or(MutexError::TooManyMutexes)?;
        self.slots
            .try_reserve(1)
            .map_err(|_| MutexError::TooManyMutexes)?;

        let name = if name.is_empty() {
            format!("Mutex-{}", handle)
        } else {
            String::from(name)
        };
        self.slots.push(Some(Mutex::new(handle, name)));
        self.live += 1;
        Ok(handle)
    }

    pub fn get(&self, handle: MutexId) -> Option<&Mutex> {
        self.slots.get(handle.get() - 1).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, handle: MutexId) -> Option<&mut Mutex> {
        self.slots.get_mut(handle.get() - 1).and_then(Option::as_mut)
    }

    /// Drop an unowned mutex.
    pub fn release(&mut self, handle: MutexId) -> Result<(), MutexError> {
        let slot = self
            .slots
            .get_mut(handle.get() - 1)
            .ok_or(MutexError::NotFound(handle.get()))?;
        let mutex = slot.as_ref().ok_or(MutexError::NotFound(handle.get()))?;
        if mutex.is_locked() {
            return Err(MutexError::StillOwned(handle.get()));
        }
        *slot = None;
        self.live -= 1;
        Ok(())
    }

    /// Mutexes currently owned by `thread`.
    pub fn owned_by(&self, thread: crate::thread::ThreadId) -> Vec<MutexId> {
        self.iter()
            .filter(|mutex| mutex.owner() == Some(thread))
            .map(Mutex::handle)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mutex> {
        self.slots.iter().filter_map(Option::as_ref)
    }
}
