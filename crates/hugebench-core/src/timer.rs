//! Cycle-accurate interval timing.
//!
//! A [`CycleClock`] brackets an interval with `start`/`stop` and subtracts the
//! calibrated cost of the two primitives from the raw delta. The calibration
//! uses the very same primitives, taking the minimum over [`TIMER_ROUNDS`]
//! empty intervals.

use std::time::Instant;

use log::{debug, warn};
use serde::Serialize;

use crate::util::TIMER_ROUNDS;

/// An elapsed cycle count, net of the clock's calibrated overhead.
///
/// Negative values indicate a calibration or ordering problem. They are
/// reported as they are, not clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CycleSample(pub i64);

impl CycleSample {
    /// Net cycles
    pub fn cycles(&self) -> i64 {
        self.0
    }

    /// Whether the net value went below zero
    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }
}

impl std::fmt::Display for CycleSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A monotonic counter readable from user space.
pub trait CycleClock {
    /// Reads the counter at the beginning of an interval.
    fn start(&self) -> u64;

    /// Reads the counter at the end of an interval and returns the raw delta.
    fn stop(&self, start: u64) -> u64;

    /// Calibrated cost of one `start`/`stop` pair.
    fn overhead(&self) -> u64;

    /// Short name for reports.
    fn name(&self) -> &'static str;

    /// Ends an interval and returns the delta net of [`CycleClock::overhead`].
    fn elapsed(&self, start: u64) -> CycleSample {
        let raw = self.stop(start);
        CycleSample(raw as i64 - self.overhead() as i64)
    }
}

/// Measures the execution of `f`.
pub fn measure<C: CycleClock + ?Sized, T>(clock: &C, f: impl FnOnce() -> T) -> (CycleSample, T) {
    let start = clock.start();
    let ret = f();
    let sample = clock.elapsed(start);
    if sample.is_negative() {
        warn!(
            "Negative cycle count {} (overhead {}), clock calibration is off",
            sample,
            clock.overhead()
        );
    }
    (sample, ret)
}

/// Minimum raw delta of `rounds` empty intervals.
fn calibrate(start: impl Fn() -> u64, stop: impl Fn(u64) -> u64, rounds: usize) -> u64 {
    let mut min = u64::MAX;
    for _ in 0..rounds {
        let t = start();
        let delta = stop(t);
        min = min.min(delta);
    }
    if min == u64::MAX { 0 } else { min }
}

/// Time stamp counter clock using serialized `rdtsc`/`rdtscp`.
#[cfg(target_arch = "x86_64")]
#[derive(Debug, Clone)]
pub struct TscClock {
    overhead: u64,
}

#[cfg(target_arch = "x86_64")]
impl TscClock {
    /// Creates the clock and calibrates its overhead.
    pub fn new() -> Self {
        Self::with_rounds(TIMER_ROUNDS)
    }

    /// Creates the clock, calibrating over `rounds` empty intervals.
    pub fn with_rounds(rounds: usize) -> Self {
        let overhead = calibrate(Self::read_start, |t| Self::read_end().wrapping_sub(t), rounds);
        debug!("TSC overhead: {} cycles ({} rounds)", overhead, rounds);
        TscClock { overhead }
    }

    #[inline(always)]
    fn read_start() -> u64 {
        use std::arch::x86_64::{_mm_lfence, _mm_mfence, _rdtsc};
        unsafe {
            _mm_mfence();
            _mm_lfence();
            let t = _rdtsc();
            _mm_lfence();
            t
        }
    }

    #[inline(always)]
    fn read_end() -> u64 {
        use std::arch::x86_64::{__rdtscp, _mm_lfence};
        unsafe {
            let mut aux = 0;
            let t = __rdtscp(&mut aux);
            _mm_lfence();
            t
        }
    }
}

#[cfg(target_arch = "x86_64")]
impl Default for TscClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_arch = "x86_64")]
impl CycleClock for TscClock {
    #[inline(always)]
    fn start(&self) -> u64 {
        Self::read_start()
    }

    #[inline(always)]
    fn stop(&self, start: u64) -> u64 {
        Self::read_end().wrapping_sub(start)
    }

    fn overhead(&self) -> u64 {
        self.overhead
    }

    fn name(&self) -> &'static str {
        "tsc"
    }
}

/// Nanosecond clock based on [`Instant`], for hosts without a usable TSC.
#[derive(Debug, Clone)]
pub struct InstantClock {
    base: Instant,
    overhead: u64,
}

impl InstantClock {
    /// Creates the clock and calibrates its overhead.
    pub fn new() -> Self {
        Self::with_rounds(TIMER_ROUNDS)
    }

    /// Creates the clock, calibrating over `rounds` empty intervals.
    pub fn with_rounds(rounds: usize) -> Self {
        let mut clock = InstantClock {
            base: Instant::now(),
            overhead: 0,
        };
        let overhead = calibrate(|| clock.start(), |t| clock.stop(t), rounds);
        clock.overhead = overhead;
        debug!("Instant overhead: {} ns ({} rounds)", clock.overhead, rounds);
        clock
    }
}

impl Default for InstantClock {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleClock for InstantClock {
    fn start(&self) -> u64 {
        self.base.elapsed().as_nanos() as u64
    }

    fn stop(&self, start: u64) -> u64 {
        (self.base.elapsed().as_nanos() as u64).saturating_sub(start)
    }

    fn overhead(&self) -> u64 {
        self.overhead
    }

    fn name(&self) -> &'static str {
        "instant"
    }
}

/// Clock selection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClockKind {
    /// The time stamp counter on x86_64, [`InstantClock`] elsewhere
    #[default]
    Auto,
    /// Always use [`InstantClock`]
    Instant,
}

impl ClockKind {
    /// Constructs and calibrates the selected clock.
    pub fn build(&self) -> Box<dyn CycleClock> {
        match self {
            #[cfg(target_arch = "x86_64")]
            ClockKind::Auto => Box::new(TscClock::new()),
            #[cfg(not(target_arch = "x86_64"))]
            ClockKind::Auto => Box::new(InstantClock::new()),
            ClockKind::Instant => Box::new(InstantClock::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::make_vec;

    const SAMPLES: usize = 1000;

    fn non_negative_share(clock: &dyn CycleClock) -> f64 {
        let samples = make_vec(SAMPLES, |_| measure(clock, || ()).0);
        samples.iter().filter(|s| !s.is_negative()).count() as f64 / SAMPLES as f64
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_tsc_zero_interval_non_negative() {
        let clock = TscClock::new();
        assert!(non_negative_share(&clock) >= 0.95);
    }

    #[test]
    fn test_instant_zero_interval_non_negative() {
        let clock = InstantClock::new();
        assert!(non_negative_share(&clock) >= 0.95);
    }

    #[test]
    fn test_measure_returns_value() {
        let clock = InstantClock::with_rounds(10);
        let (sample, v) = measure(&clock, || {
            std::thread::sleep(std::time::Duration::from_millis(2));
            7
        });
        assert_eq!(v, 7);
        assert!(sample.cycles() >= 1_000_000);
    }

    struct FixedClock {
        raw: u64,
        overhead: u64,
    }

    impl CycleClock for FixedClock {
        fn start(&self) -> u64 {
            100
        }
        fn stop(&self, _start: u64) -> u64 {
            self.raw
        }
        fn overhead(&self) -> u64 {
            self.overhead
        }
        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    #[test]
    fn test_overhead_subtracted() {
        let clock = FixedClock {
            raw: 500,
            overhead: 40,
        };
        assert_eq!(measure(&clock, || ()).0, CycleSample(460));
    }

    #[test]
    fn test_negative_sample_not_clamped() {
        let clock = FixedClock {
            raw: 10,
            overhead: 40,
        };
        let (sample, _) = measure(&clock, || ());
        assert_eq!(sample.cycles(), -30);
        assert!(sample.is_negative());
    }

    #[test]
    fn test_calibrate_takes_minimum() {
        let deltas = std::cell::Cell::new(0u64);
        let overhead = calibrate(
            || 0,
            |_| {
                let d = deltas.get();
                deltas.set(d + 1);
                50 - (d % 7)
            },
            100,
        );
        assert_eq!(overhead, 44);
        assert_eq!(calibrate(|| 0, |_| 1, 0), 0);
    }
}
