//! Tick counting.

use super::{Duration, Instant, NANOS_PER_SEC};
use portable_atomic::{AtomicU64, Ordering};

/// Counter of timer interrupts since the timer was started.
///
/// Incremented from the timer interrupt and read from anywhere, so all
/// fields are atomics. The frequency is fixed when the timer is programmed.
pub struct TickCounter {
    /// Number of ticks since the timer started
    ticks: AtomicU64,
    /// Tick frequency in Hz
    frequency: AtomicU64,
    /// Nanoseconds per tick
    ns_per_tick: AtomicU64,
}

impl TickCounter {
    /// Create a stopped counter; it counts nothing until
    /// [`configure`](Self::configure) sets a frequency.
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            frequency: AtomicU64::new(0),
            ns_per_tick: AtomicU64::new(0),
        }
    }

    /// Set the tick frequency and reset the count.
    ///
    /// # Arguments
    ///
    /// * `frequency` - Timer frequency in Hz, must not be zero
    pub fn configure(&self, frequency: u64) {
        let ns_per_tick = NANOS_PER_SEC.checked_div(frequency).unwrap_or(0);
        self.frequency.store(frequency, Ordering::Release);
        self.ns_per_tick.store(ns_per_tick, Ordering::Release);
        self.ticks.store(0, Ordering::Release);
    }

    /// Increment the tick counter (called from the timer interrupt).
    ///
    /// # Returns
    ///
    /// The tick count after the increment.
    pub fn increment(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    /// Get the current tick count.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Get the tick frequency in Hz.
    pub fn frequency(&self) -> u64 {
        self.frequency.load(Ordering::Acquire)
    }

    pub fn ns_per_tick(&self) -> u64 {
        self.ns_per_tick.load(Ordering::Acquire)
    }

    /// Convert ticks to nanoseconds.
    pub fn ticks_to_nanos(&self, ticks: u64) -> u64 {
        ticks.saturating_mul(self.ns_per_tick())
    }

    /// Convert nanoseconds to whole ticks.
    pub fn nanos_to_ticks(&self, nanos: u64) -> u64 {
        nanos.checked_div(self.ns_per_tick()).unwrap_or(0)
    }

    /// Length of one tick.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_nanos(self.ns_per_tick())
    }

    /// Get current time as an instant.
    pub fn now(&self) -> Instant {
        Instant::from_nanos(self.ticks_to_nanos(self.ticks()))
    }
}

impl Default for TickCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for TickCounter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TickCounter")
            .field("ticks", &self.ticks())
            .field("frequency", &self.frequency())
            .finish()
    }
}
