//! Kernel stack allocation for scheduled threads.
//!
//! Every thread created through the kernel gets a kernel stack from this
//! pool. Stacks of reaped threads are handed back and reused by the next
//! thread of the same size class.

use crate::errors::MemoryError;
use alloc::alloc::{alloc, dealloc, Layout};
use alloc::vec::Vec;
use core::ptr::NonNull;
use portable_atomic::{AtomicUsize, Ordering};
use spin::Mutex;

const STACK_ALIGN: usize = 4096;

/// Stack size classes for the pool allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackSizeClass {
    /// Small stack: 4 KiB
    Small = 4096,
    /// Medium stack: 16 KiB
    Medium = 16384,
    /// Large stack: 64 KiB
    Large = 65536,
    /// Extra large stack: 256 KiB
    ExtraLarge = 262144,
}

impl StackSizeClass {
    /// Get the size in bytes for this stack class.
    pub fn size(self) -> usize {
        self as usize
    }

    /// Choose the smallest size class that can hold `requested_size` bytes.
    pub fn for_size(requested_size: usize) -> Option<Self> {
        match requested_size {
            0..=4096 => Some(Self::Small),
            4097..=16384 => Some(Self::Medium),
            16385..=65536 => Some(Self::Large),
            65537..=262144 => Some(Self::ExtraLarge),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            StackSizeClass::Small => 0,
            StackSizeClass::Medium => 1,
            StackSizeClass::Large => 2,
            StackSizeClass::ExtraLarge => 3,
        }
    }
}

/// Address range of a stack. `bottom` is the lowest address, `top` is one
/// past the highest; stacks grow down from `top`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackBounds {
    pub bottom: usize,
    pub top: usize,
}

impl StackBounds {
    pub const fn new(bottom: usize, top: usize) -> Self {
        Self { bottom, top }
    }

    pub fn size(&self) -> usize {
        self.top.saturating_sub(self.bottom)
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.bottom && addr < self.top
    }
}

/// An owned kernel stack. The memory is freed when the stack is dropped.
pub struct Stack {
    memory: NonNull<u8>,
    size_class: StackSizeClass,
}

impl Stack {
    /// Usable stack size in bytes.
    pub fn size(&self) -> usize {
        self.size_class.size()
    }

    pub fn size_class(&self) -> StackSizeClass {
        self.size_class
    }

    pub fn bounds(&self) -> StackBounds {
        let bottom = self.memory.as_ptr() as usize;
        StackBounds::new(bottom, bottom + self.size())
    }

    /// Initial stack pointer for a fresh thread, 16 byte aligned.
    pub fn initial_stack_pointer(&self) -> usize {
        self.bounds().top & !0xF
    }

    fn layout(size_class: StackSizeClass) -> Result<Layout, MemoryError> {
        Layout::from_size_align(size_class.size(), STACK_ALIGN).map_err(|_| MemoryError::InvalidLayout)
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        if let Ok(layout) = Self::layout(self.size_class) {
            // SAFETY: `memory` was returned by `alloc` with this exact layout.
            unsafe { dealloc(self.memory.as_ptr(), layout) };
        }
    }
}

impl core::fmt::Debug for Stack {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stack")
            .field("bounds", &self.bounds())
            .field("size_class", &self.size_class)
            .finish()
    }
}

// SAFETY: a Stack is an exclusively owned heap block.
unsafe impl Send for Stack {}
unsafe impl Sync for Stack {}

/// Pool-based allocator for kernel stacks.
///
/// Maintains one free list per size class. Allocation failure is reported to
/// the caller and never retried. At most `max_in_use` stacks are handed out
/// at a time.
pub struct StackPool {
    free_stacks: [Mutex<Vec<Stack>>; 4],
    max_in_use: usize,
    stats: StackPoolStats,
}

#[derive(Debug, Default)]
struct StackPoolStats {
    /// Number of stacks allocated from the heap
    allocated: AtomicUsize,
    /// Number of stacks returned to the pool
    deallocated: AtomicUsize,
    /// Number of stacks currently in use
    in_use: AtomicUsize,
}

impl Default for StackPool {
    fn default() -> Self {
        Self::new()
    }
}

impl StackPool {
    pub const fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// Pool that refuses to hand out more than `max_in_use` stacks.
    pub const fn with_limit(max_in_use: usize) -> Self {
        Self {
            free_stacks: [
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
            ],
            max_in_use,
            stats: StackPoolStats {
                allocated: AtomicUsize::new(0),
                deallocated: AtomicUsize::new(0),
                in_use: AtomicUsize::new(0),
            },
        }
    }

    /// Allocate a stack of the given size class, reusing a pooled one first.
    pub fn allocate(&self, size_class: StackSizeClass) -> Result<Stack, MemoryError> {
        if self.stats.in_use.load(Ordering::Acquire) >= self.max_in_use {
            return Err(MemoryError::OutOfMemory);
        }
        if let Some(mut free_list) = self.free_stacks[size_class.index()].try_lock() {
            if let Some(stack) = free_list.pop() {
                self.stats.in_use.fetch_add(1, Ordering::AcqRel);
                return Ok(stack);
            }
        }

        self.allocate_new_stack(size_class)
    }

    /// Return a stack to the pool for reuse.
    ///
    /// If the free list cannot grow the stack is freed instead.
    pub fn deallocate(&self, stack: Stack) {
        self.stats.in_use.fetch_sub(1, Ordering::AcqRel);
        self.stats.deallocated.fetch_add(1, Ordering::AcqRel);

        let mut free_list = self.free_stacks[stack.size_class.index()].lock();
        if free_list.try_reserve(1).is_ok() {
            free_list.push(stack);
        }
    }

    /// `(allocated, deallocated, in_use)` counters.
    pub fn stats(&self) -> (usize, usize, usize) {
        (
            self.stats.allocated.load(Ordering::Acquire),
            self.stats.deallocated.load(Ordering::Acquire),
            self.stats.in_use.load(Ordering::Acquire),
        )
    }

    fn allocate_new_stack(&self, size_class: StackSizeClass) -> Result<Stack, MemoryError> {
        let layout = Stack::layout(size_class)?;
        // SAFETY: the layout has a non-zero size.
        let memory = unsafe { alloc(layout) };
        let memory = NonNull::new(memory).ok_or(MemoryError::OutOfMemory)?;

        self.stats.allocated.fetch_add(1, Ordering::AcqRel);
        self.stats.in_use.fetch_add(1, Ordering::AcqRel);

        Ok(Stack { memory, size_class })
    }
}
