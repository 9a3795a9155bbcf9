//! Test helper utilities shared by the scenario tests.

use crate::arch::{Arch, CpuId};
use crate::config::SchedulerConfig;
use crate::kernel::Kernel;
use crate::thread::{ExecutionContext, SchedulingPolicy, ThreadBuilder, ThreadId};
use crate::time::PeriodicTimer;

use alloc::vec::Vec;
use std::cell::{Cell, RefCell};

std::thread_local! {
    static CPU: Cell<CpuId> = Cell::new(0);
    static INTERRUPTS: Cell<bool> = Cell::new(true);
    static THREAD_POINTER: Cell<usize> = Cell::new(0);
    static SWITCHED_TO: RefCell<Vec<ThreadId>> = RefCell::new(Vec::new());
    static CREATED: RefCell<Vec<ThreadId>> = RefCell::new(Vec::new());
    static TERMINATED: RefCell<Vec<(ThreadId, ThreadId)>> = RefCell::new(Vec::new());
}

/// Architecture whose CPU number and interrupt flag are per test thread, so
/// tests running in parallel do not see each other.
pub(crate) struct TestArch;

impl Arch for TestArch {
    fn enable_interrupts() {
        INTERRUPTS.with(|flag| flag.set(true));
    }

    fn disable_interrupts() {
        INTERRUPTS.with(|flag| flag.set(false));
    }

    fn interrupts_enabled() -> bool {
        INTERRUPTS.with(Cell::get)
    }

    fn current_cpu() -> CpuId {
        CPU.with(Cell::get)
    }

    fn set_thread_pointer(tls: usize) {
        THREAD_POINTER.with(|tp| tp.set(tls));
    }

    unsafe fn context_switch(_prev: *mut ExecutionContext, _next: *const ExecutionContext) {}
}

pub(crate) type TestKernel = Kernel<TestArch, PeriodicTimer>;

pub(crate) const IDLE_ENTRY: usize = 0x1000;
pub(crate) const WORKER_ENTRY: usize = 0x2000;

/// Build and initialize a kernel; returns it with the bootstrap thread.
pub(crate) fn boot(config: SchedulerConfig) -> (TestKernel, ThreadId) {
    let kernel = Kernel::new(config, PeriodicTimer::pit()).unwrap();
    let bootstrap = kernel.init(IDLE_ENTRY, None).unwrap();
    (kernel, bootstrap)
}

pub(crate) fn boot_default() -> (TestKernel, ThreadId) {
    boot(SchedulerConfig::default())
}

pub(crate) fn spawn(kernel: &TestKernel, name: &str, policy: SchedulingPolicy) -> ThreadId {
    kernel
        .create_thread(ThreadBuilder::new(WORKER_ENTRY).name(name).policy(policy))
        .unwrap()
}

pub(crate) fn tick(kernel: &TestKernel, count: usize) {
    for _ in 0..count {
        kernel.on_timer_tick();
    }
}

/// Run `f` as if it executed on `cpu`.
pub(crate) fn on_cpu<R>(cpu: CpuId, f: impl FnOnce() -> R) -> R {
    let saved = CPU.with(|c| c.replace(cpu));
    let result = f();
    CPU.with(|c| c.set(saved));
    result
}

fn record_switch(next: ThreadId) {
    SWITCHED_TO.with(|log| log.borrow_mut().push(next));
}

/// Start logging the incoming thread of every context switch.
pub(crate) fn record_switches(kernel: &TestKernel) {
    SWITCHED_TO.with(|log| log.borrow_mut().clear());
    kernel.set_on_context_switch(Some(record_switch));
}

pub(crate) fn switched_to() -> Vec<ThreadId> {
    SWITCHED_TO.with(|log| log.borrow().clone())
}

/// Thread pointer last loaded on this test thread.
pub(crate) fn thread_pointer() -> usize {
    THREAD_POINTER.with(Cell::get)
}

fn record_created(id: ThreadId) {
    CREATED.with(|log| log.borrow_mut().push(id));
}

fn record_terminated(id: ThreadId, next: ThreadId) {
    TERMINATED.with(|log| log.borrow_mut().push((id, next)));
}

/// Start logging thread creation and termination events.
pub(crate) fn record_lifecycle(kernel: &TestKernel) {
    CREATED.with(|log| log.borrow_mut().clear());
    TERMINATED.with(|log| log.borrow_mut().clear());
    kernel.set_on_thread_created(Some(record_created));
    kernel.set_on_thread_terminated(Some(record_terminated));
}

pub(crate) fn created() -> Vec<ThreadId> {
    CREATED.with(|log| log.borrow().clone())
}

pub(crate) fn terminated() -> Vec<(ThreadId, ThreadId)> {
    TERMINATED.with(|log| log.borrow().clone())
}

pub(crate) fn assert_consistent(kernel: &TestKernel) {
    if let Err(e) = kernel.check_consistency() {
        panic!("scheduler state inconsistent: {}", e);
    }
}
