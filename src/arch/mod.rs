//! Architecture abstraction for interrupt control and context switching.
//!
//! The scheduler never touches hardware directly. Everything it needs from
//! the CPU goes through the [`Arch`] trait: masking interrupts around its
//! critical sections, asking which core it runs on, and handing two saved
//! contexts to the switch routine.

use crate::thread::ExecutionContext;
use core::marker::PhantomData;
use portable_atomic::{AtomicBool, Ordering};

/// CPU identifier type.
pub type CpuId = usize;

/// Architecture abstraction trait.
///
/// # Safety
///
/// Implementations involve direct hardware manipulation. `context_switch`
/// has preconditions that must be upheld by the caller.
pub trait Arch {
    /// Enable interrupts on the current CPU.
    fn enable_interrupts();

    /// Disable interrupts on the current CPU.
    ///
    /// This creates a critical section where the current thread cannot be
    /// preempted by the timer.
    fn disable_interrupts();

    /// Check if interrupts are currently enabled.
    fn interrupts_enabled() -> bool;

    /// Index of the CPU executing the caller.
    fn current_cpu() -> CpuId;

    /// Load the thread-local storage pointer of the thread about to run.
    fn set_thread_pointer(_tls: usize) {}

    /// Switch from one thread context to another.
    ///
    /// Returns once the thread owning `prev` is scheduled again.
    ///
    /// # Safety
    ///
    /// - `prev` and `next` must point to valid, properly aligned contexts that
    ///   stay alive for the duration of the call
    /// - Must be called with interrupts disabled
    /// - The `next` context must represent a valid execution state
    unsafe fn context_switch(prev: *mut ExecutionContext, next: *const ExecutionContext);
}

/// Scoped critical section: interrupts are disabled while the guard lives.
///
/// Guards nest. Dropping a guard restores the interrupt state that was in
/// effect when it was created, so only the outermost guard re-enables
/// interrupts.
#[must_use = "interrupts are re-enabled as soon as the guard is dropped"]
pub struct InterruptGuard<A: Arch> {
    was_enabled: bool,
    _arch: PhantomData<A>,
}

impl<A: Arch> InterruptGuard<A> {
    /// Disable interrupts until the returned guard is dropped.
    pub fn new() -> Self {
        let was_enabled = A::interrupts_enabled();
        if was_enabled {
            A::disable_interrupts();
        }
        Self {
            was_enabled,
            _arch: PhantomData,
        }
    }

    /// Whether this guard will re-enable interrupts on drop.
    pub fn restores_interrupts(&self) -> bool {
        self.was_enabled
    }
}

impl<A: Arch> Default for InterruptGuard<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Arch> Drop for InterruptGuard<A> {
    fn drop(&mut self) {
        if self.was_enabled {
            A::enable_interrupts();
        }
    }
}

static HOST_INTERRUPTS: AtomicBool = AtomicBool::new(true);

/// Software model of a single-core machine.
///
/// Used for host builds and tests: the interrupt flag is a plain atomic and
/// a context switch returns immediately, so the caller observes the
/// scheduler's bookkeeping right after a blocking call.
pub struct HostArch;

impl Arch for HostArch {
    fn enable_interrupts() {
        HOST_INTERRUPTS.store(true, Ordering::Release);
    }

    fn disable_interrupts() {
        HOST_INTERRUPTS.store(false, Ordering::Release);
    }

    fn interrupts_enabled() -> bool {
        HOST_INTERRUPTS.load(Ordering::Acquire)
    }

    fn current_cpu() -> CpuId {
        0
    }

    unsafe fn context_switch(_prev: *mut ExecutionContext, _next: *const ExecutionContext) {
        // Nothing to restore on the host
    }
}
