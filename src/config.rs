//! Scheduler configuration.

use crate::errors::SchedError;
use crate::mem::StackSizeClass;
use crate::thread::SchedulingPolicy;
use crate::time::{Duration, DEFAULT_QUANTUM_NS, TIMER_FREQUENCY_HZ};

use alloc::vec::Vec;

/// Largest handle value a 16 bit handle counter can hand out.
pub const MAX_HANDLES: usize = 65_535;

/// Parameters fixed when the kernel is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of CPUs, each gets its own running slot and idle thread
    pub num_cpus: usize,
    /// Time a thread may run before it is preempted
    pub quantum: Duration,
    /// Requested timer interrupt rate
    pub tick_frequency_hz: u64,
    /// Ready-queue levels, any order; duplicates are rejected
    pub policies: Vec<SchedulingPolicy>,
    pub max_threads: usize,
    pub max_mutexes: usize,
    /// Size class of kernel stacks for new threads
    pub kernel_stack: StackSizeClass,
    /// Kernel stacks that may be in use at once, idle threads included
    pub max_kernel_stacks: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_cpus: 1,
            quantum: Duration::from_nanos(DEFAULT_QUANTUM_NS),
            tick_frequency_hz: TIMER_FREQUENCY_HZ,
            policies: SchedulingPolicy::ALL.to_vec(),
            max_threads: MAX_HANDLES,
            max_mutexes: MAX_HANDLES,
            kernel_stack: StackSizeClass::Medium,
            max_kernel_stacks: MAX_HANDLES,
        }
    }
}

impl SchedulerConfig {
    pub fn with_num_cpus(mut self, num_cpus: usize) -> Self {
        self.num_cpus = num_cpus;
        self
    }

    pub fn with_quantum(mut self, quantum: Duration) -> Self {
        self.quantum = quantum;
        self
    }

    pub fn with_tick_frequency(mut self, hz: u64) -> Self {
        self.tick_frequency_hz = hz;
        self
    }

    pub fn with_policies(mut self, policies: &[SchedulingPolicy]) -> Self {
        self.policies = policies.to_vec();
        self
    }

    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    pub fn with_max_mutexes(mut self, max_mutexes: usize) -> Self {
        self.max_mutexes = max_mutexes;
        self
    }

    pub fn with_kernel_stack(mut self, size_class: StackSizeClass) -> Self {
        self.kernel_stack = size_class;
        self
    }

    pub fn with_max_kernel_stacks(mut self, max_kernel_stacks: usize) -> Self {
        self.max_kernel_stacks = max_kernel_stacks;
        self
    }

    pub fn validate(&self) -> Result<(), SchedError> {
        if self.num_cpus == 0 {
            return Err(SchedError::InvalidConfig("at least one CPU is required"));
        }
        if self.quantum.is_zero() {
            return Err(SchedError::InvalidConfig("quantum must not be zero"));
        }
        if self.tick_frequency_hz == 0 {
            return Err(SchedError::InvalidConfig("tick frequency must not be zero"));
        }
        if self.policies.is_empty() {
            return Err(SchedError::InvalidConfig("no scheduling policy configured"));
        }
        let mut seen = [false; SchedulingPolicy::ALL.len()];
        for policy in &self.policies {
            let slot = &mut seen[*policy as usize - 1];
            if *slot {
                return Err(SchedError::InvalidConfig("duplicate scheduling policy"));
            }
            *slot = true;
        }
        // Idle threads take one handle per CPU, the bootstrap thread another
        if self.max_threads <= self.num_cpus {
            return Err(SchedError::InvalidConfig("thread limit below CPU count"));
        }
        Ok(())
    }
}
