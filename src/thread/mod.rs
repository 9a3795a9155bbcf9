//! Thread records: the schedulable unit.
//!
//! A [`Thread`] is owned by the [`ThreadTable`] arena. Every other structure
//! (ready queue, sleep timeline, mutex wait queues, per-CPU running slots)
//! refers to it by [`ThreadId`] only.

use crate::mem::{Stack, StackBounds};
use crate::sync::MutexId;

use alloc::boxed::Box;
use alloc::string::String;
use core::num::NonZeroUsize;

pub mod builder;
pub mod table;

pub use builder::ThreadBuilder;
pub use table::ThreadTable;

/// Maximum length of a thread name in bytes.
pub const MAX_THREAD_NAME_LEN: usize = 128;

/// Unique identifier for threads.
///
/// Thread IDs are never reused and are guaranteed to be non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(NonZeroUsize);

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ThreadId {
    /// Create a thread ID, `None` for zero.
    pub fn new(id: usize) -> Option<Self> {
        NonZeroUsize::new(id).map(Self)
    }

    /// Get the raw ID value.
    pub fn get(self) -> usize {
        self.0.get()
    }

    /// Get the ID as u64.
    pub fn as_u64(self) -> u64 {
        self.0.get() as u64
    }
}

/// Scheduling class of a thread, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum SchedulingPolicy {
    /// Interactive and system threads that must react quickly
    LowLatency = 1,
    /// Default for most threads
    Normal = 2,
    /// Only runs when nothing else is ready
    Background = 3,
}

impl SchedulingPolicy {
    /// All policies, highest priority first.
    pub const ALL: [SchedulingPolicy; 3] = [
        SchedulingPolicy::LowLatency,
        SchedulingPolicy::Normal,
        SchedulingPolicy::Background,
    ];

    /// `true` if `self` is strictly more important than `other`.
    pub fn outranks(self, other: SchedulingPolicy) -> bool {
        (self as u8) < (other as u8)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SchedulingPolicy::LowLatency => "LowLatency",
            SchedulingPolicy::Normal => "Normal",
            SchedulingPolicy::Background => "Background",
        }
    }
}

/// Thread execution state.
///
/// The state names the single container a thread lives in:
/// `Ready` - a ready-queue level, `Running` - a CPU slot, `Blocked` - a mutex
/// wait queue, `Sleeping` - the sleep timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// Thread is ready to run
    Ready = 1,
    /// Thread is currently running
    Running = 2,
    /// Thread waits for a mutex
    Blocked = 3,
    /// Thread waits for its wake time
    Sleeping = 4,
    /// Thread has finished or was killed
    Terminated = 5,
}

/// Saved execution context: where a thread resumes when switched to.
///
/// The architecture's switch routine spills everything else onto the kernel
/// stack; the scheduler only keeps the stack pointer, the resume address and
/// the start argument of a fresh thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ExecutionContext {
    pub stack_pointer: usize,
    pub resume_address: usize,
    pub argument: usize,
}

/// One schedulable unit.
#[derive(Debug)]
pub struct Thread {
    id: ThreadId,
    name: String,
    policy: SchedulingPolicy,
    state: ThreadState,
    // Boxed so the address stays put while the table grows; the switch
    // routine uses it after the scheduler lock is released.
    context: Box<ExecutionContext>,
    kernel_stack: Option<Stack>,
    boot_stack: Option<StackBounds>,
    user_stack: Option<StackBounds>,
    tls: usize,
    waiting_on: Option<MutexId>,
}

impl Thread {
    /// Create a thread record in the `Ready` state.
    pub fn new(id: ThreadId, name: String, policy: SchedulingPolicy) -> Self {
        Self {
            id,
            name,
            policy,
            state: ThreadState::Ready,
            context: Box::new(ExecutionContext::default()),
            kernel_stack: None,
            boot_stack: None,
            user_stack: None,
            tls: 0,
            waiting_on: None,
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> SchedulingPolicy {
        self.policy
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn set_state(&mut self, new_state: ThreadState) {
        self.state = new_state;
    }

    /// Mutex this thread is blocked on, if any.
    pub fn waiting_on(&self) -> Option<MutexId> {
        self.waiting_on
    }

    pub fn set_waiting_on(&mut self, mutex: Option<MutexId>) {
        self.waiting_on = mutex;
    }

    pub fn tls(&self) -> usize {
        self.tls
    }

    pub fn set_tls(&mut self, tls: usize) {
        self.tls = tls;
    }

    pub fn user_stack(&self) -> Option<StackBounds> {
        self.user_stack
    }

    pub fn set_user_stack(&mut self, bounds: Option<StackBounds>) {
        self.user_stack = bounds;
    }

    /// Kernel stack bounds, either the pool stack or the adopted boot stack.
    pub fn kernel_stack(&self) -> Option<StackBounds> {
        self.kernel_stack
            .as_ref()
            .map(Stack::bounds)
            .or(self.boot_stack)
    }

    /// Adopt a stack that was not allocated by the pool (the boot stack).
    pub fn adopt_kernel_stack(&mut self, bounds: StackBounds) {
        self.boot_stack = Some(bounds);
    }

    /// Attach a pool stack and prepare the context to start at `entry_point`.
    pub fn setup_initial_context(&mut self, stack: Stack, entry_point: usize, arg: usize) {
        *self.context = ExecutionContext {
            stack_pointer: stack.initial_stack_pointer(),
            resume_address: entry_point,
            argument: arg,
        };
        self.kernel_stack = Some(stack);
    }

    /// Give the kernel stack back, leaving the record without one.
    pub fn take_kernel_stack(&mut self) -> Option<Stack> {
        self.kernel_stack.take()
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Stable pointer to the saved context for the switch routine.
    pub fn context_ptr(&mut self) -> *mut ExecutionContext {
        &mut *self.context as *mut ExecutionContext
    }

    /// Snapshot for introspection.
    pub fn info(&self) -> ThreadInfo {
        ThreadInfo {
            id: self.id,
            name: self.name.clone(),
            policy: self.policy,
            state: self.state,
            waiting_on: self.waiting_on,
            kernel_stack: self.kernel_stack(),
            user_stack: self.user_stack,
            tls: self.tls,
        }
    }
}

/// Copy of a thread's public attributes, handed out by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: String,
    pub policy: SchedulingPolicy,
    pub state: ThreadState,
    pub waiting_on: Option<MutexId>,
    pub kernel_stack: Option<StackBounds>,
    pub user_stack: Option<StackBounds>,
    pub tls: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{StackPool, StackSizeClass};

    fn tid(id: usize) -> ThreadId {
        ThreadId::new(id).unwrap()
    }

    #[test]
    fn test_thread_id_rejects_zero() {
        assert!(ThreadId::new(0).is_none());
        assert_eq!(tid(42).get(), 42);
        assert_eq!(tid(42).as_u64(), 42);
    }

    #[test]
    fn test_policy_ordering() {
        assert!(SchedulingPolicy::LowLatency.outranks(SchedulingPolicy::Normal));
        assert!(SchedulingPolicy::Normal.outranks(SchedulingPolicy::Background));
        assert!(!SchedulingPolicy::Normal.outranks(SchedulingPolicy::Normal));
        assert!(!SchedulingPolicy::Background.outranks(SchedulingPolicy::LowLatency));
    }

    #[test]
    fn test_thread_state_transitions() {
        let mut thread = Thread::new(tid(1), "worker".into(), SchedulingPolicy::Normal);
        assert_eq!(thread.state(), ThreadState::Ready);

        thread.set_state(ThreadState::Running);
        assert_eq!(thread.state(), ThreadState::Running);

        thread.set_state(ThreadState::Blocked);
        assert_eq!(thread.state(), ThreadState::Blocked);

        thread.set_state(ThreadState::Terminated);
        assert_eq!(thread.state(), ThreadState::Terminated);
    }

    #[test]
    fn test_initial_context_uses_stack_top() {
        let pool = StackPool::new();
        let stack = pool.allocate(StackSizeClass::Small).unwrap();
        let top = stack.initial_stack_pointer();
        let bounds = stack.bounds();

        let mut thread = Thread::new(tid(2), "entry".into(), SchedulingPolicy::Normal);
        thread.setup_initial_context(stack, 0x4000, 7);

        assert_eq!(thread.context().stack_pointer, top);
        assert_eq!(thread.context().resume_address, 0x4000);
        assert_eq!(thread.context().argument, 7);
        assert_eq!(thread.kernel_stack(), Some(bounds));

        let ptr = thread.context_ptr();
        assert_eq!(ptr as *const _, thread.context() as *const _);
    }

    #[test]
    fn test_boot_stack_is_reported_as_kernel_stack() {
        let mut thread = Thread::new(tid(3), "Bootstrap".into(), SchedulingPolicy::LowLatency);
        assert_eq!(thread.kernel_stack(), None);
        thread.adopt_kernel_stack(StackBounds::new(0x1000, 0x2000));
        assert_eq!(thread.kernel_stack(), Some(StackBounds::new(0x1000, 0x2000)));
        assert!(thread.take_kernel_stack().is_none());
    }
}
