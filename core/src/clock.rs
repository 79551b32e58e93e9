//! # Cycle Timer
//!
//! Wraps a free-running hardware cycle counter and turns raw deltas into
//! wall-clock time. A 32-bit counter at a few hundred MHz wraps within
//! seconds, so every window is cross-checked against the coarse
//! millisecond tick:
//!
//! ```text
//!   start_window()                                   end_window()
//!        │                                                │
//!  cycles▼ 0 ──────────▶ 2^w-1 │ 0 ──────────▶ raw        ▼
//!        ├─────────── wrap ────┴──────────────────────────┤
//!  tick  t0 ─────────────────────────────────────────────▶ t1
//!
//!  raw       = (end - start) mod 2^w
//!  corrected = raw + ((t1 - t0) / max_ms) * 2^w     if t1 - t0 > max_ms
//! ```
//!
//! `max_ms` is the longest span the counter can represent before wrapping,
//! derived once from the calibrated frequency.

use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use aiperf_hal::{CycleCounter, TickSource};

use crate::error::{ErrorKind, PerfError, PerfResult};

// =============================================================================
// Cycle Time
// =============================================================================

/// Wall-clock decomposition of a cycle count
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct CycleTime {
    /// Whole seconds
    pub s: u32,
    /// Milliseconds within the second
    pub ms: u32,
    /// Microseconds within the millisecond
    pub us: u32,
}

impl CycleTime {
    /// Zero duration
    pub const ZERO: Self = Self { s: 0, ms: 0, us: 0 };

    /// Whole milliseconds
    pub fn as_millis(&self) -> u64 {
        self.s as u64 * 1_000 + self.ms as u64
    }

    /// Whole microseconds
    pub fn as_micros(&self) -> u64 {
        self.as_millis() * 1_000 + self.us as u64
    }

    /// Milliseconds as a float
    pub fn as_millis_f64(&self) -> f64 {
        self.as_micros() as f64 / 1_000.0
    }
}

impl fmt::Display for CycleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} ms", self.as_millis_f64())
    }
}

/// Convert cycles at `frequency` Hz into s/ms/µs
///
/// Each field comes from the remainder of the coarser one, so a partial
/// millisecond is never counted twice. Zero frequency yields zero.
pub fn cycles_to_time(cycles: u64, frequency: u64) -> CycleTime {
    if frequency == 0 {
        return CycleTime::ZERO;
    }
    let freq = frequency as u128;
    let cycles = cycles as u128;
    let s = cycles / freq;
    let rem = cycles % freq;
    let ms = rem * 1_000 / freq;
    let us = (rem * 1_000_000 / freq) % 1_000;
    CycleTime {
        s: s.min(u32::MAX as u128) as u32,
        ms: ms as u32,
        us: us as u32,
    }
}

// =============================================================================
// Cycle Clock
// =============================================================================

/// Calibrated cycle timer
///
/// Window state lives in atomics so the clock can be shared by reference
/// with the node observer while the runner drives windows.
#[derive(Debug)]
pub struct CycleClock<C: CycleCounter, T: TickSource> {
    counter: C,
    ticks: T,
    frequency: u64,
    max_ms: u64,
    fix_overflow: bool,
    start_cycles: AtomicU64,
    start_tick: AtomicU32,
}

impl<C: CycleCounter, T: TickSource> CycleClock<C, T> {
    /// Build a clock for a counter whose frequency is already known
    ///
    /// Usually the core clock read back from the clock tree at bring-up.
    pub fn with_frequency(counter: C, ticks: T, frequency: u64) -> PerfResult<Self> {
        if frequency == 0 {
            return Err(PerfError::new(
                ErrorKind::CalibrationFailed,
                "counter frequency is zero",
            ));
        }
        let max_ms = cycles_to_time(counter.mask(), frequency).as_millis();
        log::info!(
            "Clock: counter at {} MHz, {}-bit, wraps after {} ms",
            frequency / 1_000_000,
            counter.width(),
            max_ms
        );
        Ok(Self {
            counter,
            ticks,
            frequency,
            max_ms,
            fix_overflow: cfg!(feature = "fix-clk-overflow"),
            start_cycles: AtomicU64::new(0),
            start_tick: AtomicU32::new(0),
        })
    }

    /// Build a clock from the counter's advertised rate, calibrating over
    /// `span_ms` of the reference tick when it has none
    pub fn new(counter: C, ticks: T, span_ms: u32) -> PerfResult<Self> {
        match counter.nominal_frequency() {
            Some(frequency) => Self::with_frequency(counter, ticks, frequency),
            None => Self::calibrate(counter, ticks, span_ms),
        }
    }

    /// Measure the counter frequency over `span_ms` of the reference tick
    pub fn calibrate(counter: C, ticks: T, span_ms: u32) -> PerfResult<Self> {
        if span_ms == 0 {
            return Err(PerfError::new(
                ErrorKind::CalibrationFailed,
                "calibration span is zero",
            ));
        }

        // Align on a tick edge
        let t0 = ticks.millis();
        while ticks.millis() == t0 {
            core::hint::spin_loop();
        }
        let edge = ticks.millis();

        counter.reset();
        let c0 = counter.read();
        let mut elapsed = ticks.millis_since(edge);
        while elapsed < span_ms {
            core::hint::spin_loop();
            elapsed = ticks.millis_since(edge);
        }
        let cycles = counter.elapsed(c0, counter.read());

        let frequency = (cycles as u128 * 1_000 / elapsed as u128) as u64;
        log::debug!("Clock: {} cycles over {} ms", cycles, elapsed);
        Self::with_frequency(counter, ticks, frequency)
    }

    /// Enable or disable the tick cross-check
    ///
    /// Stays off when built without `fix-clk-overflow`.
    pub fn with_overflow_fix(mut self, enabled: bool) -> Self {
        self.fix_overflow = enabled && cfg!(feature = "fix-clk-overflow");
        self
    }

    /// Counter frequency in Hz
    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    /// Longest window representable without wrapping, in ms
    pub fn max_ms(&self) -> u64 {
        self.max_ms
    }

    /// Whether wraps are corrected from the reference tick
    pub fn overflow_fix_enabled(&self) -> bool {
        self.fix_overflow
    }

    /// Underlying counter
    pub fn counter(&self) -> &C {
        &self.counter
    }

    /// Reset the counter and mark the start of a window
    #[inline]
    pub fn start_window(&self) {
        self.start_tick.store(self.ticks.millis(), Ordering::Relaxed);
        self.counter.reset();
        self.start_cycles.store(self.counter.read(), Ordering::Relaxed);
    }

    /// Cycles elapsed since [`start_window`](Self::start_window)
    #[inline]
    pub fn end_window(&self) -> u64 {
        let end = self.counter.read();
        let raw = self
            .counter
            .elapsed(self.start_cycles.load(Ordering::Relaxed), end);

        if !self.fix_overflow || self.max_ms == 0 {
            return raw;
        }
        let Some(span) = self.counter.wrap_span() else {
            return raw;
        };

        let tick_elapsed = self
            .ticks
            .millis_since(self.start_tick.load(Ordering::Relaxed)) as u64;
        if tick_elapsed > self.max_ms {
            let wraps = tick_elapsed / self.max_ms;
            raw.saturating_add(wraps.saturating_mul(span))
        } else {
            raw
        }
    }

    /// Convert cycles at the calibrated frequency
    pub fn to_time(&self, cycles: u64) -> CycleTime {
        cycles_to_time(cycles, self.frequency)
    }
}
