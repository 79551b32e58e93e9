//! # Runtime Configuration
//!
//! Compile-time switches are Cargo features (`observer`, `stack-monitor`,
//! `heap-monitor`, `fix-clk-overflow`). A disabled feature cannot be turned
//! back on at runtime; an enabled one can be switched off per test through
//! [`PerfConfig`].

use crate::error::{ErrorKind, PerfError, PerfResult};

/// Iterations per test
pub const DEFAULT_ITERATIONS: u32 = 16;

/// Iteration multiplier in profiling mode
pub const DEFAULT_PROFILING_FACTOR: u32 = 5;

/// Single-run duration above which remaining iterations are dropped
pub const DEFAULT_CEILING_MS: u64 = 10_000;

/// Span of the millisecond tick used to calibrate the counter
pub const DEFAULT_CALIBRATION_MS: u32 = 100;

/// Input generator seed
pub const DEFAULT_SEED: u64 = 3;

/// Per-test configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerfConfig {
    /// Iterations in normal mode
    pub iterations: u32,
    /// Profiling mode: more iterations, no ceiling
    pub profiling: bool,
    /// Iteration multiplier in profiling mode
    pub profiling_factor: u32,
    /// Safety ceiling for a single run, in milliseconds
    pub ceiling_ms: u64,
    /// Calibration span in milliseconds
    pub calibration_ms: u32,
    /// Input generator seed
    pub seed: u64,
    /// Collect per-unit timings
    pub observer: bool,
    /// Measure the stack watermark
    pub stack_monitor: bool,
    /// Track allocations around each run
    pub heap_monitor: bool,
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            profiling: false,
            profiling_factor: DEFAULT_PROFILING_FACTOR,
            ceiling_ms: DEFAULT_CEILING_MS,
            calibration_ms: DEFAULT_CALIBRATION_MS,
            seed: DEFAULT_SEED,
            observer: cfg!(feature = "observer"),
            stack_monitor: cfg!(feature = "stack-monitor"),
            heap_monitor: cfg!(feature = "heap-monitor"),
        }
    }
}

impl PerfConfig {
    /// Set the iteration count
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    /// Enable or disable profiling mode
    pub fn with_profiling(mut self, profiling: bool) -> Self {
        self.profiling = profiling;
        self
    }

    /// Set the profiling multiplier
    pub fn with_profiling_factor(mut self, factor: u32) -> Self {
        self.profiling_factor = factor;
        self
    }

    /// Set the single-run ceiling
    pub fn with_ceiling_ms(mut self, ceiling_ms: u64) -> Self {
        self.ceiling_ms = ceiling_ms;
        self
    }

    /// Set the calibration span
    pub fn with_calibration_ms(mut self, span_ms: u32) -> Self {
        self.calibration_ms = span_ms;
        self
    }

    /// Set the input seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Enable or disable the node observer
    pub fn with_observer(mut self, enabled: bool) -> Self {
        self.observer = enabled;
        self
    }

    /// Enable or disable the stack monitor
    pub fn with_stack_monitor(mut self, enabled: bool) -> Self {
        self.stack_monitor = enabled;
        self
    }

    /// Enable or disable the heap monitor
    pub fn with_heap_monitor(mut self, enabled: bool) -> Self {
        self.heap_monitor = enabled;
        self
    }

    /// Number of runs the test will attempt
    pub fn iteration_count(&self) -> u32 {
        if self.profiling {
            self.iterations.saturating_mul(self.profiling_factor)
        } else {
            self.iterations
        }
    }

    /// Whether the ceiling applies
    pub fn ceiling_active(&self) -> bool {
        !self.profiling
    }

    /// Observer enabled in both build and runtime configuration
    pub fn observer_enabled(&self) -> bool {
        cfg!(feature = "observer") && self.observer
    }

    /// Stack monitor enabled in both build and runtime configuration
    pub fn stack_monitor_enabled(&self) -> bool {
        cfg!(feature = "stack-monitor") && self.stack_monitor
    }

    /// Heap monitor enabled in both build and runtime configuration
    pub fn heap_monitor_enabled(&self) -> bool {
        cfg!(feature = "heap-monitor") && self.heap_monitor
    }

    /// Reject configurations that cannot run
    pub fn validate(&self) -> PerfResult<()> {
        if self.iterations == 0 {
            return Err(PerfError::new(ErrorKind::InvalidConfig, "iteration count is zero"));
        }
        if self.profiling && self.profiling_factor == 0 {
            return Err(PerfError::new(ErrorKind::InvalidConfig, "profiling factor is zero"));
        }
        if self.calibration_ms == 0 {
            return Err(PerfError::new(ErrorKind::InvalidConfig, "calibration span is zero"));
        }
        Ok(())
    }
}
