#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![forbid(unreachable_pub)]

//! Multi-level priority scheduling core for a kernel.
//!
//! The crate keeps track of which thread runs on which CPU, which threads are
//! ready, sleeping or blocked on a mutex, and decides what runs next. It does
//! not boot anything, touch devices or switch registers itself: the embedding
//! kernel supplies an [`Arch`] implementation and a [`Timer`] and calls into
//! the [`Kernel`] from its timer interrupt and system-call handlers.
//!
//! # Scheduling model
//!
//! - One FIFO ready queue per [`SchedulingPolicy`], strictly ordered
//!   (`LowLatency` before `Normal` before `Background`), no aging
//! - Preemption when a thread's quantum runs out at a timer tick
//! - Sleeping threads wait in a delta queue and are woken by the tick
//! - Recursive kernel mutexes with FIFO hand-off to the first waiter
//!
//! # Quick Start
//!
//! ```ignore
//! use mlq_sched::{HostArch, Kernel, PeriodicTimer, SchedulerConfig, ThreadBuilder};
//! use mlq_sched::SchedulingPolicy;
//!
//! let kernel: Kernel<HostArch, PeriodicTimer> =
//!     Kernel::new(SchedulerConfig::default(), PeriodicTimer::pit())?;
//! kernel.init(idle_loop as usize, None)?;
//!
//! let worker = kernel.create_thread(
//!     ThreadBuilder::new(worker_main as usize)
//!         .name("worker")
//!         .policy(SchedulingPolicy::Normal),
//! )?;
//!
//! // From the timer interrupt handler:
//! kernel.on_timer_tick();
//! ```

// Core modules
pub mod arch;
pub mod config;
pub mod errors;
pub mod kernel;
pub mod mem;
pub mod sched;
pub mod sync;
pub mod thread;
pub mod time;

#[cfg(test)]
extern crate std;

extern crate alloc;

#[cfg(test)]
mod tests;

// ============================================================================
// Public API
// ============================================================================

// Architecture abstraction
pub use arch::{Arch, CpuId, HostArch, InterruptGuard};

// Configuration
pub use config::SchedulerConfig;

// Kernel
pub use kernel::Kernel;

// Ready queue
pub use sched::{MultiLevelQueue, PriorityQueueLevel};

// Synchronization
pub use sync::{LockOutcome, MutexId, MutexInfo, UnlockOutcome};

// Threads
pub use thread::{SchedulingPolicy, ThreadBuilder, ThreadId, ThreadInfo, ThreadState};

// Memory management
pub use mem::{Stack, StackBounds, StackPool, StackSizeClass};

// Time
pub use time::{Duration, Instant, PeriodicTimer, SleepTimeline, Timer, TimerMode};

// Errors
pub use errors::{
    MemoryError, MutexError, SchedError, SchedResult, SpawnError, ThreadError, TimerError,
};
