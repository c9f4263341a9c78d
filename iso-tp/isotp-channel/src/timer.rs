//! Clock abstraction to support `std` and `no_std` environments.

use core::time::Duration;

/// Abstraction over a monotonic clock.
///
/// ISO-TP needs a monotonically increasing time source to implement deadlines (N_Bs, N_Cr, …) and
/// pacing (STmin).
pub trait Clock {
    /// Instant type produced by the clock.
    type Instant: Copy + PartialOrd;

    /// Current instant.
    fn now(&self) -> Self::Instant;
    /// Elapsed duration since an instant.
    fn elapsed(&self, earlier: Self::Instant) -> Duration;
    /// Add a duration to an instant (saturating if needed).
    fn add(&self, instant: Self::Instant, dur: Duration) -> Self::Instant;
}

#[cfg(feature = "std")]
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[cfg(feature = "std")]
/// Standard library clock wrapper.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdClock;

#[cfg(feature = "std")]
impl Clock for StdClock {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn elapsed(&self, earlier: Self::Instant) -> Duration {
        earlier.elapsed()
    }

    /// Add with `checked_add`; on overflow the result is pinned a century ahead, so the deadline
    /// still lies in the future.
    fn add(&self, instant: Self::Instant, dur: Duration) -> Self::Instant {
        instant
            .checked_add(dur)
            .or_else(|| instant.checked_add(FAR_FUTURE))
            .unwrap_or(instant)
    }
}

/// Clock over a host-supplied monotonic microsecond counter.
///
/// Typical sources are a free-running hardware timer or an RTOS tick converted to microseconds.
/// Instants are plain `u64` microsecond values, which also makes this the natural clock for tests
/// that drive time by hand.
#[derive(Clone, Copy, Debug)]
pub struct MicrosClock<F> {
    source: F,
}

impl<F: Fn() -> u64> MicrosClock<F> {
    /// Wrap a function returning the current time in microseconds.
    pub const fn new(source: F) -> Self {
        Self { source }
    }
}

impl<F: Fn() -> u64> Clock for MicrosClock<F> {
    type Instant = u64;

    fn now(&self) -> u64 {
        (self.source)()
    }

    fn elapsed(&self, earlier: u64) -> Duration {
        Duration::from_micros(self.now().saturating_sub(earlier))
    }

    fn add(&self, instant: u64, dur: Duration) -> u64 {
        let micros = u64::try_from(dur.as_micros()).unwrap_or(u64::MAX);
        instant.saturating_add(micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    #[test]
    fn micros_clock_reads_source_and_saturates() {
        let now = Cell::new(1_000u64);
        let clock = MicrosClock::new(|| now.get());
        assert_eq!(clock.now(), 1_000);
        assert_eq!(clock.add(1_000, Duration::from_millis(2)), 3_000);
        assert_eq!(clock.add(u64::MAX - 1, Duration::from_secs(1)), u64::MAX);

        now.set(1_250);
        assert_eq!(clock.elapsed(1_000), Duration::from_micros(250));
        assert_eq!(clock.elapsed(2_000), Duration::ZERO);
    }

    #[cfg(feature = "std")]
    #[test]
    fn std_clock_overflow_stays_in_the_future() {
        let clock = StdClock;
        let now = clock.now();
        let deadline = clock.add(now, Duration::MAX);
        assert!(deadline > now + Duration::from_secs(3600));
        assert_eq!(clock.add(now, Duration::from_millis(5)), now + Duration::from_millis(5));
    }
}
