//! Timer capability used by the scheduler.
//!
//! The kernel only talks to the [`Timer`] trait. A concrete source is picked
//! when the kernel is built; [`PeriodicTimer`] models a programmable interval
//! timer that divides a fixed quartz frequency.

use super::{Duration, Instant, TickCounter};
use crate::errors::TimerError;

use portable_atomic::{AtomicBool, AtomicU64, Ordering};

/// Quartz frequency of the legacy programmable interval timer.
pub const PIT_QUARTZ_FREQUENCY_HZ: u64 = 1_193_182;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// Interrupt at a fixed rate
    Periodic,
    /// Interrupt once after a programmed delay
    OneShot,
}

impl TimerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TimerMode::Periodic => "Periodic",
            TimerMode::OneShot => "OneShot",
        }
    }
}

/// Interrupt source driving preemption and sleep wake-ups.
pub trait Timer: Send + Sync {
    fn name(&self) -> &str;

    fn mode(&self) -> TimerMode;

    /// Frequency the timer actually runs at, after any clamping.
    fn frequency_hz(&self) -> u64;

    fn nanos_per_tick(&self) -> u64;

    /// Time slice granted to a thread before it is preempted.
    fn quantum(&self) -> Duration;

    fn time_since_start(&self) -> Instant;

    fn is_running(&self) -> bool;

    /// Program the timer.
    ///
    /// # Arguments
    ///
    /// * `frequency_hz` - Requested interrupt rate
    /// * `quantum` - Time slice handed to every thread
    fn start(&self, frequency_hz: u64, quantum: Duration) -> Result<(), TimerError>;

    fn stop(&self) -> Result<(), TimerError>;

    /// Account one hardware interrupt.
    ///
    /// # Returns
    ///
    /// Time elapsed since the previous interrupt.
    fn on_interrupt(&self) -> Duration;
}

/// Periodic timer dividing a fixed source frequency.
///
/// Requested frequencies above the source frequency are clamped to it.
#[derive(Debug)]
pub struct PeriodicTimer {
    name: &'static str,
    source_frequency_hz: u64,
    running: AtomicBool,
    quantum: AtomicU64,
    counter: TickCounter,
}

impl PeriodicTimer {
    pub const fn new(name: &'static str, source_frequency_hz: u64) -> Self {
        Self {
            name,
            source_frequency_hz,
            running: AtomicBool::new(false),
            quantum: AtomicU64::new(0),
            counter: TickCounter::new(),
        }
    }

    /// The legacy programmable interval timer.
    pub const fn pit() -> Self {
        Self::new("PIT", PIT_QUARTZ_FREQUENCY_HZ)
    }

    pub fn source_frequency_hz(&self) -> u64 {
        self.source_frequency_hz
    }

    /// Divider programmed into the source for the running frequency.
    pub fn divider(&self) -> u64 {
        self.source_frequency_hz
            .checked_div(self.counter.frequency())
            .unwrap_or(0)
    }

    pub fn ticks(&self) -> u64 {
        self.counter.ticks()
    }
}

impl Timer for PeriodicTimer {
    fn name(&self) -> &str {
        self.name
    }

    fn mode(&self) -> TimerMode {
        TimerMode::Periodic
    }

    fn frequency_hz(&self) -> u64 {
        self.counter.frequency()
    }

    fn nanos_per_tick(&self) -> u64 {
        self.counter.ns_per_tick()
    }

    fn quantum(&self) -> Duration {
        Duration::from_nanos(self.quantum.load(Ordering::Acquire))
    }

    fn time_since_start(&self) -> Instant {
        self.counter.now()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn start(&self, frequency_hz: u64, quantum: Duration) -> Result<(), TimerError> {
        if frequency_hz == 0 {
            return Err(TimerError::InvalidFrequency(frequency_hz));
        }
        if quantum.is_zero() {
            return Err(TimerError::InvalidQuantum);
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TimerError::AlreadyRunning);
        }

        log::debug!(
            "Requested {} configuration: Mode={}, TargetFrequency={}Hz, Quantum={}ns",
            self.name,
            TimerMode::Periodic.as_str(),
            frequency_hz,
            quantum.as_nanos()
        );
        let frequency = if frequency_hz > self.source_frequency_hz {
            log::debug!(
                "Requested frequency of {}Hz exceeds source frequency {}Hz, clamping",
                frequency_hz,
                self.source_frequency_hz
            );
            self.source_frequency_hz
        } else {
            frequency_hz
        };

        self.quantum.store(quantum.as_nanos(), Ordering::Release);
        self.counter.configure(frequency);
        log::debug!("Time between IRQs will be ~{}ns", self.counter.ns_per_tick());
        Ok(())
    }

    fn stop(&self) -> Result<(), TimerError> {
        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TimerError::NotRunning);
        }
        Ok(())
    }

    fn on_interrupt(&self) -> Duration {
        if !self.is_running() {
            return Duration::ZERO;
        }
        self.counter.increment();
        self.counter.tick_duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{DEFAULT_QUANTUM_NS, TIMER_FREQUENCY_HZ};

    #[test]
    fn test_start_configures_counter() {
        let timer = PeriodicTimer::pit();
        assert!(!timer.is_running());
        timer
            .start(TIMER_FREQUENCY_HZ, Duration::from_nanos(DEFAULT_QUANTUM_NS))
            .unwrap();

        assert!(timer.is_running());
        assert_eq!(timer.name(), "PIT");
        assert_eq!(timer.mode(), TimerMode::Periodic);
        assert_eq!(timer.frequency_hz(), 1000);
        assert_eq!(timer.nanos_per_tick(), 1_000_000);
        assert_eq!(timer.divider(), PIT_QUARTZ_FREQUENCY_HZ / 1000);
        assert_eq!(timer.quantum(), Duration::from_millis(50));
    }

    #[test]
    fn test_frequency_above_source_is_clamped() {
        let timer = PeriodicTimer::new("test", 1000);
        timer.start(5000, Duration::from_millis(1)).unwrap();
        assert_eq!(timer.frequency_hz(), 1000);
        assert_eq!(timer.divider(), 1);
    }

    #[test]
    fn test_start_rejects_bad_parameters() {
        let timer = PeriodicTimer::pit();
        assert_eq!(
            timer.start(0, Duration::from_millis(1)),
            Err(TimerError::InvalidFrequency(0))
        );
        assert_eq!(timer.start(100, Duration::ZERO), Err(TimerError::InvalidQuantum));
        assert!(!timer.is_running());

        timer.start(100, Duration::from_millis(1)).unwrap();
        assert_eq!(
            timer.start(100, Duration::from_millis(1)),
            Err(TimerError::AlreadyRunning)
        );
    }

    #[test]
    fn test_interrupts_advance_time_only_while_running() {
        let timer = PeriodicTimer::pit();
        assert_eq!(timer.on_interrupt(), Duration::ZERO);

        timer.start(1000, Duration::from_millis(50)).unwrap();
        assert_eq!(timer.on_interrupt(), Duration::from_millis(1));
        assert_eq!(timer.on_interrupt(), Duration::from_millis(1));
        assert_eq!(timer.ticks(), 2);
        assert_eq!(timer.time_since_start(), Instant::from_nanos(2_000_000));

        timer.stop().unwrap();
        assert_eq!(timer.stop(), Err(TimerError::NotRunning));
        assert_eq!(timer.on_interrupt(), Duration::ZERO);
    }
}
