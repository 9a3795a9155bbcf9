//! Error handling for the scheduling core.
//!
//! Data-structure level operations (ready queue, sleep timeline, mutex state
//! machine) report failure through `bool`/`Option`. The [`Kernel`] turns those
//! into the typed errors below, and the system-call layer turns the typed errors
//! into negative status codes via [`SchedError::status_code`].
//!
//! [`Kernel`]: crate::kernel::Kernel

#![allow(clippy::uninlined_format_args)]

use core::fmt;

/// Result type for scheduler operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Top-level error type for every operation exposed by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// Thread creation errors
    Spawn(SpawnError),
    /// Thread lookup and lifecycle errors
    Thread(ThreadError),
    /// Mutex errors
    Mutex(MutexError),
    /// Memory allocation errors
    Memory(MemoryError),
    /// Timer errors
    Timer(TimerError),
    /// Kernel has not been initialized yet
    NotInitialized,
    /// `init` was called twice
    AlreadyInitialized,
    /// Configuration rejected by [`SchedulerConfig::validate`]
    ///
    /// [`SchedulerConfig::validate`]: crate::config::SchedulerConfig::validate
    InvalidConfig(&'static str),
}

/// Errors that can occur while creating a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnError {
    /// The thread name is empty or too long
    InvalidName,
    /// No ready-queue level exists for the requested policy
    InvalidPolicy,
    /// Requested kernel stack is larger than the largest size class
    InvalidStackSize(usize),
    /// All thread handles are in use
    TooManyThreads,
    /// Kernel stack or table storage could not be allocated
    OutOfMemory,
}

/// Errors related to an existing thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadError {
    /// No thread with the given handle exists
    NotFound(usize),
    /// The thread is not where its state says it is
    Inconsistent(usize),
    /// No thread is running on the CPU
    NoRunningThread(usize),
    /// Idle threads cannot block, sleep or be terminated
    Protected(usize),
}

/// Mutex errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutexError {
    /// No mutex with the given handle exists
    NotFound(usize),
    /// The mutex is still owned and cannot be released
    StillOwned(usize),
    /// The mutex name exceeds the maximum length
    InvalidName,
    /// All mutex handles are in use
    TooManyMutexes,
}

/// Memory-related errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// Out of memory
    OutOfMemory,
    /// Invalid memory layout
    InvalidLayout,
}

/// Timer errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    /// Timer already running
    AlreadyRunning,
    /// Timer has not been started
    NotRunning,
    /// Invalid timer frequency
    InvalidFrequency(u64),
    /// Invalid quantum
    InvalidQuantum,
}

impl SchedError {
    /// Status code handed back to user space by the system-call layer.
    ///
    /// `-1` invalid argument, `-2` not found, `-3` busy, `-4` resources
    /// exhausted, `-5` not initialized.
    pub fn status_code(&self) -> i64 {
        match self {
            SchedError::Spawn(SpawnError::InvalidName)
            | SchedError::Spawn(SpawnError::InvalidPolicy)
            | SchedError::Spawn(SpawnError::InvalidStackSize(_))
            | SchedError::Mutex(MutexError::InvalidName)
            | SchedError::Timer(TimerError::InvalidFrequency(_))
            | SchedError::Timer(TimerError::InvalidQuantum)
            | SchedError::Memory(MemoryError::InvalidLayout)
            | SchedError::Thread(ThreadError::Protected(_))
            | SchedError::InvalidConfig(_) => -1,
            SchedError::Thread(ThreadError::NotFound(_))
            | SchedError::Thread(ThreadError::NoRunningThread(_))
            | SchedError::Mutex(MutexError::NotFound(_)) => -2,
            SchedError::Mutex(MutexError::StillOwned(_))
            | SchedError::Thread(ThreadError::Inconsistent(_))
            | SchedError::Timer(TimerError::AlreadyRunning)
            | SchedError::AlreadyInitialized => -3,
            SchedError::Spawn(SpawnError::TooManyThreads)
            | SchedError::Spawn(SpawnError::OutOfMemory)
            | SchedError::Mutex(MutexError::TooManyMutexes)
            | SchedError::Memory(MemoryError::OutOfMemory) => -4,
            SchedError::NotInitialized | SchedError::Timer(TimerError::NotRunning) => -5,
        }
    }
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::Spawn(e) => write!(f, "Thread spawn error: {}", e),
            SchedError::Thread(e) => write!(f, "Thread error: {}", e),
            SchedError::Mutex(e) => write!(f, "Mutex error: {}", e),
            SchedError::Memory(e) => write!(f, "Memory error: {}", e),
            SchedError::Timer(e) => write!(f, "Timer error: {}", e),
            SchedError::NotInitialized => write!(f, "Scheduler not initialized"),
            SchedError::AlreadyInitialized => write!(f, "Scheduler already initialized"),
            SchedError::InvalidConfig(reason) => write!(f, "Invalid configuration: {}", reason),
        }
    }
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::InvalidName => write!(f, "Invalid thread name"),
            SpawnError::InvalidPolicy => write!(f, "No ready queue for the scheduling policy"),
            SpawnError::InvalidStackSize(bytes) => {
                write!(f, "No kernel stack size class holds {} bytes", bytes)
            }
            SpawnError::TooManyThreads => write!(f, "Maximum number of threads reached"),
            SpawnError::OutOfMemory => write!(f, "Out of memory for thread creation"),
        }
    }
}

impl fmt::Display for ThreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadError::NotFound(id) => write!(f, "No thread with handle {}", id),
            ThreadError::Inconsistent(id) => {
                write!(f, "Thread {} is missing from the queue of its state", id)
            }
            ThreadError::NoRunningThread(cpu) => write!(f, "No running thread on CPU {}", cpu),
            ThreadError::Protected(id) => write!(f, "Thread {} is an idle thread", id),
        }
    }
}

impl fmt::Display for MutexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutexError::NotFound(id) => write!(f, "No mutex with handle {}", id),
            MutexError::StillOwned(id) => write!(f, "Mutex {} is still owned", id),
            MutexError::InvalidName => write!(f, "Invalid mutex name"),
            MutexError::TooManyMutexes => write!(f, "Maximum number of mutexes reached"),
        }
    }
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::OutOfMemory => write!(f, "Out of memory"),
            MemoryError::InvalidLayout => write!(f, "Invalid memory layout"),
        }
    }
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerError::AlreadyRunning => write!(f, "Timer already running"),
            TimerError::NotRunning => write!(f, "Timer not running"),
            TimerError::InvalidFrequency(freq) => write!(f, "Invalid timer frequency: {} Hz", freq),
            TimerError::InvalidQuantum => write!(f, "Invalid quantum"),
        }
    }
}

// Conversion implementations for ergonomic error handling

impl From<SpawnError> for SchedError {
    fn from(error: SpawnError) -> Self {
        SchedError::Spawn(error)
    }
}

impl From<ThreadError> for SchedError {
    fn from(error: ThreadError) -> Self {
        SchedError::Thread(error)
    }
}

impl From<MutexError> for SchedError {
    fn from(error: MutexError) -> Self {
        SchedError::Mutex(error)
    }
}

impl From<MemoryError> for SchedError {
    fn from(error: MemoryError) -> Self {
        SchedError::Memory(error)
    }
}

impl From<TimerError> for SchedError {
    fn from(error: TimerError) -> Self {
        SchedError::Timer(error)
    }
}

impl From<MemoryError> for SpawnError {
    fn from(_error: MemoryError) -> Self {
        SpawnError::OutOfMemory
    }
}
