//! Kernel abstraction for managing the scheduling core.
//!
//! [`Kernel`] owns every thread record, the multi-level ready queue, the
//! sleep timeline, the mutex registry and one running slot per CPU. All of
//! it sits behind a single `spin::Mutex` that is only ever taken inside an
//! [`InterruptGuard`], so the timer interrupt cannot observe a half-finished
//! transition. Context switches are decided under the lock and carried out
//! after it is released, with interrupts still disabled.

use crate::arch::{Arch, CpuId, InterruptGuard};
use crate::config::SchedulerConfig;
use crate::errors::{MutexError, SchedError, SchedResult, SpawnError, ThreadError};
use crate::mem::{StackBounds, StackPool};
use crate::sched::MultiLevelQueue;
use crate::sync::{LockOutcome, MutexId, MutexInfo, MutexTable, Removal, UnlockOutcome};
use crate::thread::{
    ExecutionContext, SchedulingPolicy, Thread, ThreadBuilder, ThreadId, ThreadInfo, ThreadState,
    ThreadTable,
};
use crate::time::{Duration, Instant, SleepTimeline, Timer};

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::marker::PhantomData;
use portable_atomic::{AtomicBool, AtomicU64, Ordering};

/// Name of the thread adopted from the boot code.
pub const BOOTSTRAP_THREAD_NAME: &str = "Bootstrap";

/// Callback fired with a single thread: the incoming thread of a context
/// switch, or a thread that was just created.
pub type ThreadHook = fn(ThreadId);

/// Callback fired with a terminated thread and the thread that runs next in
/// its place.
pub type TerminationHook = fn(ThreadId, ThreadId);

#[derive(Debug, Default, Clone, Copy)]
struct Hooks {
    context_switch: Option<ThreadHook>,
    thread_created: Option<ThreadHook>,
    thread_terminated: Option<TerminationHook>,
}

/// Per-CPU scheduling slot.
#[derive(Debug, Default, Clone)]
struct CpuSlot {
    running: Option<ThreadId>,
    idle: Option<ThreadId>,
    /// Thread this CPU last switched away from. Its record must outlive the
    /// switch, so it is not reaped while it sits here.
    previous: Option<ThreadId>,
    quantum_remaining: u64,
}

/// Everything guarded by the scheduler lock.
struct SchedState {
    threads: ThreadTable,
    ready: MultiLevelQueue,
    sleeping: SleepTimeline,
    mutexes: MutexTable,
    cpus: Vec<CpuSlot>,
    terminated: Vec<ThreadId>,
}

impl SchedState {
    fn slot(&self, cpu: CpuId) -> SchedResult<&CpuSlot> {
        self.cpus
            .get(cpu)
            .ok_or(SchedError::Thread(ThreadError::NoRunningThread(cpu)))
    }

    fn is_idle(&self, id: ThreadId) -> bool {
        self.cpus.iter().any(|slot| slot.idle == Some(id))
    }

    /// Running thread of `cpu`, refusing idle threads and threads that
    /// another CPU already terminated.
    fn caller(&self, cpu: CpuId) -> SchedResult<ThreadId> {
        let id = self
            .slot(cpu)?
            .running
            .ok_or(ThreadError::NoRunningThread(cpu))?;
        if self.is_idle(id) {
            return Err(ThreadError::Protected(id.get()).into());
        }
        match self.threads.get(id).map(Thread::state) {
            Some(ThreadState::Running) => Ok(id),
            _ => Err(ThreadError::NotFound(id.get()).into()),
        }
    }

    fn policy_of(&self, id: ThreadId) -> Option<SchedulingPolicy> {
        self.threads.get(id).map(Thread::policy)
    }

    fn set_state(&mut self, id: ThreadId, state: ThreadState) {
        if let Some(thread) = self.threads.get_mut(id) {
            thread.set_state(state);
        }
    }

    /// Move a thread into the ready queue.
    fn make_ready(&mut self, id: ThreadId) {
        let Some(thread) = self.threads.get_mut(id) else {
            log::warn!("Cannot make unknown thread {} ready", id);
            return;
        };
        thread.set_state(ThreadState::Ready);
        thread.set_waiting_on(None);
        let policy = thread.policy();
        if !self.ready.enqueue(id, policy) {
            log::error!("No ready queue for policy {} of thread {}", policy.as_str(), id);
        }
    }

    fn describe(&self, id: ThreadId) -> (usize, &str) {
        (id.get(), self.threads.get(id).map_or("?", Thread::name))
    }
}

/// Context switch decided under the lock, performed after it is released.
struct SwitchPlan {
    prev: *mut ExecutionContext,
    next: *const ExecutionContext,
    next_id: ThreadId,
    next_tls: usize,
}

/// Main kernel handle that manages the scheduling core.
///
/// # Type Parameters
///
/// * `A` - Architecture implementation
/// * `T` - Timer driving preemption and sleep
pub struct Kernel<A: Arch, T: Timer> {
    config: SchedulerConfig,
    timer: T,
    /// Stack pool for kernel stacks
    stack_pool: StackPool,
    initialized: AtomicBool,
    context_switches: AtomicU64,
    hooks: spin::Mutex<Hooks>,
    state: spin::Mutex<SchedState>,
    _arch: PhantomData<fn() -> A>,
}

impl<A: Arch, T: Timer> Kernel<A, T> {
    /// Create a kernel instance.
    ///
    /// # Arguments
    ///
    /// * `config` - Scheduler parameters, validated here
    /// * `timer` - Interrupt source, started by [`init`](Self::init)
    pub fn new(config: SchedulerConfig, timer: T) -> SchedResult<Self> {
        config.validate()?;
        let state = SchedState {
            threads: ThreadTable::new(config.max_threads),
            ready: MultiLevelQueue::new(&config.policies),
            sleeping: SleepTimeline::new(),
            mutexes: MutexTable::new(config.max_mutexes),
            cpus: alloc::vec![CpuSlot::default(); config.num_cpus],
            terminated: Vec::new(),
        };
        let stack_pool = StackPool::with_limit(config.max_kernel_stacks);
        Ok(Self {
            config,
            timer,
            stack_pool,
            initialized: AtomicBool::new(false),
            context_switches: AtomicU64::new(0),
            hooks: spin::Mutex::new(Hooks::default()),
            state: spin::Mutex::new(state),
            _arch: PhantomData,
        })
    }

    /// Start scheduling.
    ///
    /// Adopts the code already running on CPU 0 as the bootstrap thread,
    /// creates one idle thread per CPU starting at `idle_entry` and starts
    /// the timer. Nothing is left registered if any step fails.
    ///
    /// # Returns
    ///
    /// Handle of the bootstrap thread.
    pub fn init(&self, idle_entry: usize, boot_stack: Option<StackBounds>) -> SchedResult<ThreadId> {
        let guard = InterruptGuard::<A>::new();
        if self.is_initialized() {
            return Err(SchedError::AlreadyInitialized);
        }
        self.timer.start(self.config.tick_frequency_hz, self.config.quantum)?;

        let bootstrap = match self.install_boot_threads(idle_entry, boot_stack) {
            Ok(id) => id,
            Err(e) => {
                let _ = self.timer.stop();
                return Err(e);
            }
        };

        self.initialized.store(true, Ordering::Release);
        log::debug!(
            "Scheduler initialized: {} CPU(s), quantum {}ns, timer {} at {}Hz",
            self.config.num_cpus,
            self.config.quantum.as_nanos(),
            self.timer.name(),
            self.timer.frequency_hz()
        );
        for id in self.thread_ids() {
            self.notify_created(&guard, id);
        }
        Ok(bootstrap)
    }

    fn install_boot_threads(
        &self,
        idle_entry: usize,
        boot_stack: Option<StackBounds>,
    ) -> SchedResult<ThreadId> {
        let mut state = self.state.lock();
        let mark = state.threads.mark();
        let result = self.populate_boot_threads(&mut state, idle_entry, boot_stack);
        if result.is_err() {
            for mut thread in state.threads.rollback(mark) {
                if let Some(stack) = thread.take_kernel_stack() {
                    self.stack_pool.deallocate(stack);
                }
            }
            for slot in state.cpus.iter_mut() {
                *slot = CpuSlot::default();
            }
            log::warn!("Scheduler setup failed, boot threads discarded");
        }
        result
    }

    fn populate_boot_threads(
        &self,
        state: &mut SchedState,
        idle_entry: usize,
        boot_stack: Option<StackBounds>,
    ) -> SchedResult<ThreadId> {
        let mut policies = state.ready.policies();
        let highest = policies.next().unwrap_or(SchedulingPolicy::LowLatency);
        let lowest = policies.last().unwrap_or(highest);

        let bootstrap = state.threads.reserve()?;
        let mut thread = Thread::new(bootstrap, String::from(BOOTSTRAP_THREAD_NAME), highest);
        if let Some(bounds) = boot_stack {
            thread.adopt_kernel_stack(bounds);
        }
        thread.set_state(ThreadState::Running);
        state
            .threads
            .insert(thread)
            .map_err(|_| SpawnError::TooManyThreads)?;

        let quantum = self.config.quantum.as_nanos();
        for cpu in 0..self.config.num_cpus {
            let builder = ThreadBuilder::new(idle_entry)
                .name(format!("Idle-{}", cpu))
                .policy(lowest)
                .argument(cpu);
            let idle = self.spawn_locked(state, builder, false)?;

            let slot = &mut state.cpus[cpu];
            slot.idle = Some(idle);
            slot.quantum_remaining = quantum;
            slot.running = Some(if cpu == 0 { bootstrap } else { idle });
            if cpu != 0 {
                state.set_state(idle, ThreadState::Running);
            }
        }
        Ok(bootstrap)
    }

    /// Check if the kernel has been initialized.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn ensure_initialized(&self) -> SchedResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(SchedError::NotInitialized)
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    /// Time since the timer started.
    pub fn now(&self) -> Instant {
        self.timer.time_since_start()
    }

    /// Install a callback fired with the incoming thread on every switch.
    pub fn set_on_context_switch(&self, hook: Option<ThreadHook>) {
        let _guard = InterruptGuard::<A>::new();
        self.hooks.lock().context_switch = hook;
    }

    /// Install a callback fired for every thread registered, boot and idle
    /// threads included.
    pub fn set_on_thread_created(&self, hook: Option<ThreadHook>) {
        let _guard = InterruptGuard::<A>::new();
        self.hooks.lock().thread_created = hook;
    }

    /// Install a callback fired with each terminated thread and its successor.
    pub fn set_on_thread_terminated(&self, hook: Option<TerminationHook>) {
        let _guard = InterruptGuard::<A>::new();
        self.hooks.lock().thread_terminated = hook;
    }

    fn notify_created(&self, _guard: &InterruptGuard<A>, id: ThreadId) {
        let hook = self.hooks.lock().thread_created;
        if let Some(hook) = hook {
            hook(id);
        }
    }

    fn notify_terminated(&self, _guard: &InterruptGuard<A>, id: ThreadId, next: ThreadId) {
        let hook = self.hooks.lock().thread_terminated;
        if let Some(hook) = hook {
            hook(id, next);
        }
    }

    pub fn context_switch_count(&self) -> u64 {
        self.context_switches.load(Ordering::Relaxed)
    }

    /// Stack pool statistics as `(allocated, deallocated, in_use)`.
    pub fn stack_stats(&self) -> (usize, usize, usize) {
        self.stack_pool.stats()
    }

    /// Create a thread and make it ready.
    ///
    /// Nothing is registered if any step fails.
    pub fn create_thread(&self, builder: ThreadBuilder) -> SchedResult<ThreadId> {
        self.ensure_initialized()?;
        let guard = InterruptGuard::<A>::new();
        let id = {
            let mut state = self.state.lock();
            self.spawn_locked(&mut state, builder, true)?
        };
        self.notify_created(&guard, id);
        Ok(id)
    }

    fn spawn_locked(
        &self,
        state: &mut SchedState,
        builder: ThreadBuilder,
        enqueue: bool,
    ) -> Result<ThreadId, SpawnError> {
        builder.validate()?;
        let policy = builder.get_policy();
        if !state.ready.has_level(policy) {
            return Err(SpawnError::InvalidPolicy);
        }

        let id = state.threads.reserve()?;
        let size_class = builder
            .kernel_stack_class()
            .unwrap_or(self.config.kernel_stack);
        let stack = self.stack_pool.allocate(size_class)?;

        let entry_point = builder.entry_point();
        let argument = builder.get_argument();
        let mut thread = builder.into_thread(id);
        thread.setup_initial_context(stack, entry_point, argument);

        if let Err(mut rejected) = state.threads.insert(thread) {
            if let Some(stack) = rejected.take_kernel_stack() {
                self.stack_pool.deallocate(stack);
            }
            return Err(SpawnError::TooManyThreads);
        }
        if enqueue && !state.ready.enqueue(id, policy) {
            log::error!("No ready queue for policy {} of thread {}", policy.as_str(), id);
        }
        log::debug!(
            "Created thread \"{}-{}\" ({})",
            id,
            state.threads.get(id).map_or("?", Thread::name),
            policy.as_str()
        );
        Ok(id)
    }

    /// Thread running on the calling CPU.
    pub fn running_thread(&self) -> Option<ThreadId> {
        self.running_thread_on(A::current_cpu())
    }

    pub fn running_thread_on(&self, cpu: CpuId) -> Option<ThreadId> {
        let _guard = InterruptGuard::<A>::new();
        let running = self.state.lock().cpus.get(cpu).and_then(|slot| slot.running);
        running
    }

    pub fn idle_thread(&self, cpu: CpuId) -> Option<ThreadId> {
        let _guard = InterruptGuard::<A>::new();
        let idle = self.state.lock().cpus.get(cpu).and_then(|slot| slot.idle);
        idle
    }

    pub fn thread_info(&self, id: ThreadId) -> SchedResult<ThreadInfo> {
        let _guard = InterruptGuard::<A>::new();
        let info = self.state.lock().threads.get(id).map(Thread::info);
        info.ok_or_else(|| ThreadError::NotFound(id.get()).into())
    }

    /// Handles of all threads that have not been reaped.
    pub fn thread_ids(&self) -> Vec<ThreadId> {
        let _guard = InterruptGuard::<A>::new();
        let ids = self.state.lock().threads.ids().collect();
        ids
    }

    /// Ready threads, highest level first.
    pub fn ready_threads(&self) -> Vec<ThreadId> {
        let _guard = InterruptGuard::<A>::new();
        let ready = self.state.lock().ready.queued_threads();
        ready
    }

    /// Sleeping threads with their wake times, soonest first.
    pub fn sleeping_threads(&self) -> Vec<(ThreadId, Instant)> {
        let _guard = InterruptGuard::<A>::new();
        let sleepers = self.state.lock().sleeping.sleepers();
        sleepers
    }

    /// Give up the CPU; the caller goes to the tail of its level.
    pub fn yield_now(&self) -> SchedResult<()> {
        self.ensure_initialized()?;
        let guard = InterruptGuard::<A>::new();
        let cpu = A::current_cpu();
        let mut state = self.state.lock();
        let current = state.slot(cpu)?.running;

        let plan = match current {
            Some(id) if state.is_idle(id) => {
                if state.ready.is_empty() {
                    None
                } else {
                    self.execute_next(&mut state, cpu)
                }
            }
            Some(id) => {
                if state.threads.get(id).map(Thread::state) == Some(ThreadState::Running) {
                    state.make_ready(id);
                }
                self.execute_next(&mut state, cpu)
            }
            None => self.execute_next(&mut state, cpu),
        };
        drop(state);

        if let Some(plan) = plan {
            self.switch_to(&guard, plan);
        }
        Ok(())
    }

    /// Timer interrupt entry point.
    ///
    /// CPU 0 keeps time: it advances the timer and the sleep timeline and
    /// wakes due threads. Every CPU then charges the tick to its running
    /// thread and preempts it when its quantum is used up, when a woken
    /// thread outranks it, or when it was terminated from another CPU.
    pub fn on_timer_tick(&self) {
        if !self.is_initialized() {
            return;
        }
        let guard = InterruptGuard::<A>::new();
        let cpu = A::current_cpu();
        let mut state = self.state.lock();
        if cpu >= state.cpus.len() {
            return;
        }

        let mut best_woken: Option<SchedulingPolicy> = None;
        let elapsed = if cpu == 0 {
            let elapsed = self.timer.on_interrupt();
            state.sleeping.update_wake_time(elapsed);
            while let Some(id) = state.sleeping.dequeue() {
                let (handle, name) = state.describe(id);
                log::trace!("Waking thread \"{}-{}\" up", handle, name);
                state.make_ready(id);
                if let Some(policy) = state.policy_of(id) {
                    best_woken = Some(best_woken.map_or(policy, |p| p.min(policy)));
                }
            }
            elapsed
        } else {
            Duration::from_nanos(self.timer.nanos_per_tick())
        };

        let plan = self.tick_locked(&mut state, cpu, elapsed, best_woken);
        drop(state);

        if let Some(plan) = plan {
            self.switch_to(&guard, plan);
        }
    }

    fn tick_locked(
        &self,
        state: &mut SchedState,
        cpu: CpuId,
        elapsed: Duration,
        best_woken: Option<SchedulingPolicy>,
    ) -> Option<SwitchPlan> {
        let Some(running) = state.cpus[cpu].running else {
            return self.execute_next(state, cpu);
        };
        let Some(thread) = state.threads.get(running) else {
            return self.execute_next(state, cpu);
        };

        if thread.state() == ThreadState::Terminated {
            return self.execute_next(state, cpu);
        }
        if state.is_idle(running) {
            return if state.ready.is_empty() {
                None
            } else {
                self.execute_next(state, cpu)
            };
        }

        let policy = thread.policy();
        let slot = &mut state.cpus[cpu];
        slot.quantum_remaining = slot.quantum_remaining.saturating_sub(elapsed.as_nanos());
        let expired = slot.quantum_remaining == 0;
        let outranked = best_woken.map_or(false, |woken| woken.outranks(policy));

        if !expired && !outranked {
            return None;
        }
        if state.ready.is_empty() {
            state.cpus[cpu].quantum_remaining = self.config.quantum.as_nanos();
            return None;
        }
        state.make_ready(running);
        self.execute_next(state, cpu)
    }

    /// Suspend the calling thread until `wake_time`.
    ///
    /// Returns immediately if `wake_time` is not in the future.
    pub fn sleep_until(&self, wake_time: Instant) -> SchedResult<()> {
        self.sleep_with(|_| wake_time)
    }

    /// Suspend the calling thread for `duration`.
    pub fn sleep_for(&self, duration: Duration) -> SchedResult<()> {
        self.sleep_with(|now| now + duration)
    }

    fn sleep_with(&self, wake_at: impl FnOnce(Instant) -> Instant) -> SchedResult<()> {
        self.ensure_initialized()?;
        let guard = InterruptGuard::<A>::new();
        let cpu = A::current_cpu();
        let mut state = self.state.lock();
        let current = state.caller(cpu)?;

        let now = state.sleeping.now();
        let wake_time = wake_at(now);
        if wake_time <= now {
            return Ok(());
        }

        let (handle, name) = state.describe(current);
        log::trace!(
            "Putting thread \"{}-{}\" to sleep for {}ns",
            handle,
            name,
            wake_time.duration_since(now).as_nanos()
        );
        state.set_state(current, ThreadState::Sleeping);
        state.sleeping.enqueue(current, wake_time);
        let plan = self.execute_next(&mut state, cpu);
        drop(state);

        if let Some(plan) = plan {
            self.switch_to(&guard, plan);
        }
        Ok(())
    }

    /// Register a mutex. An empty name gets a generated one.
    pub fn create_mutex(&self, name: &str) -> SchedResult<MutexId> {
        let _guard = InterruptGuard::<A>::new();
        let handle = self.state.lock().mutexes.create(name)?;
        log::trace!("Created mutex {}", handle);
        Ok(handle)
    }

    pub fn find_mutex(&self, handle: MutexId) -> SchedResult<MutexInfo> {
        let _guard = InterruptGuard::<A>::new();
        let info = self.state.lock().mutexes.get(handle).map(|mutex| mutex.info());
        info.ok_or_else(|| MutexError::NotFound(handle.get()).into())
    }

    /// Snapshot of every registered mutex.
    pub fn mutexes(&self) -> Vec<MutexInfo> {
        let _guard = InterruptGuard::<A>::new();
        let infos = self.state.lock().mutexes.iter().map(|mutex| mutex.info()).collect();
        infos
    }

    /// Remove a mutex from the registry. Fails while it is owned.
    pub fn release_mutex(&self, handle: MutexId) -> SchedResult<()> {
        let _guard = InterruptGuard::<A>::new();
        self.state.lock().mutexes.release(handle)?;
        Ok(())
    }

    /// Lock a mutex for the calling thread.
    ///
    /// On [`LockOutcome::MustBlock`] the caller was suspended; by the time
    /// this returns on real hardware the mutex has been handed to it.
    pub fn lock_mutex(&self, handle: MutexId) -> SchedResult<LockOutcome> {
        self.ensure_initialized()?;
        let guard = InterruptGuard::<A>::new();
        let cpu = A::current_cpu();
        let mut state = self.state.lock();
        let current = state.caller(cpu)?;

        let outcome = state
            .mutexes
            .get_mut(handle)
            .ok_or(MutexError::NotFound(handle.get()))?
            .lock(current);

        let plan = match outcome {
            LockOutcome::Acquired | LockOutcome::Reentered(_) => {
                log::trace!("Thread {} holds mutex {} ({:?})", current, handle, outcome);
                None
            }
            LockOutcome::MustBlock => {
                log::trace!("Thread {} blocks on mutex {}", current, handle);
                if let Some(thread) = state.threads.get_mut(current) {
                    thread.set_state(ThreadState::Blocked);
                    thread.set_waiting_on(Some(handle));
                }
                self.execute_next(&mut state, cpu)
            }
        };
        drop(state);

        if let Some(plan) = plan {
            self.switch_to(&guard, plan);
        }
        Ok(outcome)
    }

    /// Unlock a mutex held by the calling thread.
    ///
    /// When the count drops to zero the first waiter becomes the owner and is
    /// made ready. The caller keeps running.
    pub fn unlock_mutex(&self, handle: MutexId) -> SchedResult<UnlockOutcome> {
        self.ensure_initialized()?;
        let _guard = InterruptGuard::<A>::new();
        let cpu = A::current_cpu();
        let mut state = self.state.lock();
        let current = state.caller(cpu)?;

        let outcome = state
            .mutexes
            .get_mut(handle)
            .ok_or(MutexError::NotFound(handle.get()))?
            .unlock(current);

        if let UnlockOutcome::HandedOff(next) = outcome {
            log::trace!("Mutex {} handed from thread {} to {}", handle, current, next);
            state.make_ready(next);
        }
        Ok(outcome)
    }

    /// Terminate a thread in any state.
    ///
    /// Mutexes it owns pass to their next waiter. A thread running on the
    /// calling CPU is switched away from at once; one running on another CPU
    /// is switched away from at that CPU's next tick. Terminating an already
    /// terminated thread succeeds without effect.
    pub fn terminate_thread(&self, id: ThreadId) -> SchedResult<()> {
        self.ensure_initialized()?;
        let guard = InterruptGuard::<A>::new();
        let cpu = A::current_cpu();
        let mut state = self.state.lock();

        let Some(thread) = state.threads.get(id) else {
            log::warn!("Cannot terminate unknown thread {}", id);
            return Err(ThreadError::NotFound(id.get()).into());
        };
        if state.is_idle(id) {
            return Err(ThreadError::Protected(id.get()).into());
        }
        let thread_state = thread.state();
        let waiting_on = thread.waiting_on();
        let host_cpu = state.cpus.iter().position(|slot| slot.running == Some(id));

        let found = match thread_state {
            ThreadState::Terminated => return Ok(()),
            ThreadState::Ready => state.ready.remove(id).is_some(),
            ThreadState::Sleeping => state.sleeping.remove_waiting_thread(id),
            ThreadState::Blocked => match waiting_on {
                Some(handle) => state
                    .mutexes
                    .get_mut(handle)
                    .and_then(|mutex| mutex.remove_waiting_thread(id))
                    .is_some(),
                None => false,
            },
            ThreadState::Running => host_cpu.is_some(),
        };
        if !found {
            log::error!("Thread {} is not where its state {:?} says", id, thread_state);
        }

        for handle in state.mutexes.owned_by(id) {
            let removal = state
                .mutexes
                .get_mut(handle)
                .and_then(|mutex| mutex.remove_waiting_thread(id));
            if let Some(Removal::Owner(Some(next))) = removal {
                log::trace!("Mutex {} passes from terminated thread {} to {}", handle, id, next);
                state.make_ready(next);
            }
        }

        if let Some(thread) = state.threads.get_mut(id) {
            thread.set_state(ThreadState::Terminated);
            thread.set_waiting_on(None);
        }
        state.terminated.push(id);
        let (handle, name) = state.describe(id);
        log::debug!("Terminated thread \"{}-{}\"", handle, name);

        let on_this_cpu = state.cpus.get(cpu).and_then(|slot| slot.running) == Some(id);
        let plan = if on_this_cpu {
            self.execute_next(&mut state, cpu)
        } else {
            None
        };
        let next = if on_this_cpu {
            state.cpus.get(cpu).and_then(|slot| slot.running)
        } else {
            let idle = state
                .cpus
                .get(host_cpu.unwrap_or(cpu))
                .and_then(|slot| slot.idle);
            state.ready.peek().or(idle)
        };
        drop(state);

        if let Some(next) = next {
            self.notify_terminated(&guard, id, next);
        }
        if let Some(plan) = plan {
            self.switch_to(&guard, plan);
        }
        Ok(())
    }

    /// Terminate the calling thread with `exit_code`.
    pub fn exit_current(&self, exit_code: i32) -> SchedResult<()> {
        let cpu = A::current_cpu();
        let current = {
            let _guard = InterruptGuard::<A>::new();
            let state = self.state.lock();
            let id = state.caller(cpu)?;
            let (handle, name) = state.describe(id);
            log::trace!("Thread \"{}-{}\" has finished. Exit Code: {}", handle, name, exit_code);
            id
        };
        self.terminate_thread(current)
    }

    /// Set the thread-local storage pointer of the calling thread.
    ///
    /// The pointer is loaded right away and again whenever the thread is
    /// switched to.
    pub fn set_thread_control_block(&self, tls: usize) -> SchedResult<()> {
        self.ensure_initialized()?;
        let _guard = InterruptGuard::<A>::new();
        let cpu = A::current_cpu();
        let mut state = self.state.lock();
        let current = state.caller(cpu)?;
        if let Some(thread) = state.threads.get_mut(current) {
            thread.set_tls(tls);
        }
        drop(state);

        A::set_thread_pointer(tls);
        Ok(())
    }

    /// Free the records and kernel stacks of terminated threads.
    ///
    /// Threads still referenced by a CPU slot are kept for a later pass.
    ///
    /// # Returns
    ///
    /// Number of threads reaped.
    pub fn reap_terminated(&self) -> usize {
        let _guard = InterruptGuard::<A>::new();
        let mut state = self.state.lock();
        let pending = core::mem::take(&mut state.terminated);
        let mut reaped = 0;

        for id in pending {
            let in_use = state
                .cpus
                .iter()
                .any(|slot| slot.running == Some(id) || slot.previous == Some(id));
            if in_use {
                state.terminated.push(id);
                continue;
            }
            if let Some(mut thread) = state.threads.remove(id) {
                log::debug!("Reaping thread \"{}-{}\"", id, thread.name());
                if let Some(stack) = thread.take_kernel_stack() {
                    self.stack_pool.deallocate(stack);
                }
                reaped += 1;
            }
        }
        reaped
    }

    /// Check that every thread sits in exactly the container its state names.
    pub fn check_consistency(&self) -> SchedResult<()> {
        let _guard = InterruptGuard::<A>::new();
        let state = self.state.lock();

        for thread in state.threads.iter() {
            let id = thread.id();
            let in_ready = state.ready.contains(id);
            let in_timeline = state.sleeping.contains(id);
            let waits_on: Vec<MutexId> = state
                .mutexes
                .iter()
                .filter(|mutex| mutex.is_waiting(id))
                .map(|mutex| mutex.handle())
                .collect();
            let on_cpu = state
                .cpus
                .iter()
                .filter(|slot| slot.running == Some(id))
                .count();

            let memberships = usize::from(in_ready)
                + usize::from(in_timeline)
                + waits_on.len()
                + on_cpu;
            let consistent = match thread.state() {
                ThreadState::Ready if state.is_idle(id) => memberships == 0,
                ThreadState::Ready => in_ready && memberships == 1,
                ThreadState::Running => on_cpu == 1 && memberships == 1,
                ThreadState::Sleeping => in_timeline && memberships == 1,
                ThreadState::Blocked => {
                    memberships == 1 && thread.waiting_on().map_or(false, |m| waits_on == [m])
                }
                ThreadState::Terminated => memberships == on_cpu && on_cpu <= 1,
            };
            if !consistent {
                return Err(ThreadError::Inconsistent(id.get()).into());
            }
        }
        Ok(())
    }

    /// Pick the next thread for `cpu` and install it in the running slot.
    ///
    /// The caller has already moved the outgoing thread to its new container.
    /// Falls back to the CPU's idle thread when nothing is ready.
    fn execute_next(&self, state: &mut SchedState, cpu: CpuId) -> Option<SwitchPlan> {
        let slot = state.cpus.get(cpu)?;
        let prev = slot.running;
        let idle = slot.idle;
        let next = state.ready.dequeue().or(idle)?;

        let slot = &mut state.cpus[cpu];
        slot.running = Some(next);
        slot.quantum_remaining = self.config.quantum.as_nanos();
        state.set_state(next, ThreadState::Running);

        let prev = prev?;
        if prev == next {
            return None;
        }
        state.cpus[cpu].previous = Some(prev);
        if prev_is_running(state, prev) {
            // Only the idle thread leaves without a new container
            state.set_state(prev, ThreadState::Ready);
        }

        let (from, from_name) = state.describe(prev);
        let (to, to_name) = state.describe(next);
        log::trace!(
            "CPU {}: \"{}-{}\" -> \"{}-{}\"",
            cpu,
            from,
            from_name,
            to,
            to_name
        );

        let prev_ctx = state.threads.get_mut(prev)?.context_ptr();
        let next_thread = state.threads.get_mut(next)?;
        let next_tls = next_thread.tls();
        let next_ctx = next_thread.context_ptr() as *const ExecutionContext;
        Some(SwitchPlan {
            prev: prev_ctx,
            next: next_ctx,
            next_id: next,
            next_tls,
        })
    }

    fn switch_to(&self, _guard: &InterruptGuard<A>, plan: SwitchPlan) {
        self.context_switches.fetch_add(1, Ordering::Relaxed);
        let hook = self.hooks.lock().context_switch;
        if let Some(hook) = hook {
            hook(plan.next_id);
        }
        A::set_thread_pointer(plan.next_tls);
        // SAFETY: both contexts are boxed inside thread records that are not
        // reaped while a CPU slot refers to them, and interrupts are disabled
        // for the lifetime of `_guard`.
        unsafe { A::context_switch(plan.prev, plan.next) }
    }
}

fn prev_is_running(state: &SchedState, id: ThreadId) -> bool {
    state.threads.get(id).map(Thread::state) == Some(ThreadState::Running)
}
