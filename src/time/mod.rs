//! Time keeping for the scheduler.
//!
//! All time values are nanosecond counts since the timer was started. The
//! arithmetic saturates instead of wrapping, so a counter that reaches the
//! end of the 64-bit range stays there.

pub mod delta;
pub mod tick;
pub mod timer;

pub use delta::SleepTimeline;
pub use tick::TickCounter;
pub use timer::{PeriodicTimer, Timer, TimerMode, PIT_QUARTZ_FREQUENCY_HZ};

/// Frequency in Hz for timer interrupts.
pub const TIMER_FREQUENCY_HZ: u64 = 1000; // 1 kHz = 1ms per tick

/// Default quantum duration in nanoseconds (50ms).
pub const DEFAULT_QUANTUM_NS: u64 = 50_000_000;

pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Point in time, in nanoseconds since the timer started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Instant(u64);

impl Instant {
    /// The moment the timer started.
    pub const ZERO: Instant = Instant(0);

    /// Create a new instant from nanoseconds since start.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Get nanoseconds since start.
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub fn duration_since(self, earlier: Instant) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    pub fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.as_nanos()))
    }
}

impl core::ops::Add<Duration> for Instant {
    type Output = Self;

    fn add(self, duration: Duration) -> Self {
        self.saturating_add(duration)
    }
}

/// A span of time in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(u64);

impl Duration {
    pub const ZERO: Duration = Duration(0);

    /// Create a duration from nanoseconds.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Create a duration from microseconds.
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros.saturating_mul(1_000))
    }

    /// Create a duration from milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(NANOS_PER_SEC))
    }

    /// Get nanoseconds in this duration.
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub const fn as_micros(self) -> u64 {
        self.0 / 1_000
    }

    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn saturating_sub(self, other: Duration) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl core::ops::Add for Duration {
    type Output = Self;

    fn add(self, other: Duration) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_units() {
        assert_eq!(Duration::from_millis(50).as_nanos(), DEFAULT_QUANTUM_NS);
        assert_eq!(Duration::from_secs(1).as_millis(), 1000);
        assert_eq!(Duration::from_micros(3).as_nanos(), 3_000);
        assert!(Duration::ZERO.is_zero());
    }

    #[test]
    fn test_arithmetic_saturates() {
        let late = Instant::from_nanos(u64::MAX - 1);
        assert_eq!((late + Duration::from_nanos(10)).as_nanos(), u64::MAX);
        assert_eq!(Duration::from_secs(u64::MAX).as_nanos(), u64::MAX);

        let early = Instant::from_nanos(5);
        assert_eq!(early.duration_since(late), Duration::ZERO);
        assert_eq!(late.duration_since(early).as_nanos(), u64::MAX - 6);
        assert_eq!(Duration::from_nanos(3).saturating_sub(Duration::from_nanos(4)), Duration::ZERO);
    }
}
