//! # Measurement Records
//!
//! [`RunStatistics`] folds per-run durations as the loop progresses;
//! [`PerfReport`] is the finalized record of one test. Non-fatal problems
//! (degraded observer, stack or heap inconsistencies) ride along as
//! [`Warnings`]. Rendering beyond the
//! compact [`Display`](core::fmt::Display) summary is left to the console
//! layer.

use core::fmt;

use crate::clock::CycleTime;
use crate::error::{ErrorKind, PerfError};
use crate::heap::AllocationLedger;
use crate::observer::NodeTimingReport;
use crate::stack::StackUsage;
use crate::workload::MAX_NAME;

// =============================================================================
// Run Statistics
// =============================================================================

/// Running min/max/sum of per-run durations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStatistics {
    completed: u32,
    min: u64,
    max: u64,
    sum: u64,
}

impl Default for RunStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStatistics {
    /// Empty statistics
    pub const fn new() -> Self {
        Self {
            completed: 0,
            min: u64::MAX,
            max: 0,
            sum: 0,
        }
    }

    /// Fold one run
    pub fn record(&mut self, cycles: u64) {
        self.completed += 1;
        self.min = self.min.min(cycles);
        self.max = self.max.max(cycles);
        self.sum = self.sum.saturating_add(cycles);
    }

    /// Completed runs
    pub fn completed(&self) -> u32 {
        self.completed
    }

    /// Shortest run (0 when empty)
    pub fn min(&self) -> u64 {
        if self.completed == 0 {
            0
        } else {
            self.min
        }
    }

    /// Longest run
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Sum of all runs
    pub fn sum(&self) -> u64 {
        self.sum
    }

    /// Mean run (0 when empty)
    pub fn average(&self) -> u64 {
        if self.completed == 0 {
            0
        } else {
            self.sum / self.completed as u64
        }
    }
}

// =============================================================================
// Warnings
// =============================================================================

/// Non-fatal conditions a single test can raise
pub const MAX_WARNINGS: usize = 4;

/// Non-fatal errors collected during a test
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Warnings(heapless::Vec<PerfError, MAX_WARNINGS>);

impl Warnings {
    /// No warnings
    pub const fn new() -> Self {
        Self(heapless::Vec::new())
    }

    /// Record a warning; extra ones beyond capacity are dropped
    pub fn push(&mut self, warning: PerfError) {
        if self.0.push(warning).is_err() {
            log::debug!("Runner: warning dropped ({})", warning);
        }
    }

    /// Whether a warning of `kind` was raised
    pub fn contains(&self, kind: ErrorKind) -> bool {
        self.0.iter().any(|w| w.kind() == kind)
    }

    /// Number of warnings
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// No warnings raised
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in the order raised
    pub fn iter(&self) -> impl Iterator<Item = &PerfError> {
        self.0.iter()
    }
}

// =============================================================================
// Report
// =============================================================================

/// Result of one performance test
#[derive(Debug, Clone, PartialEq)]
pub struct PerfReport {
    /// Workload name
    pub name: heapless::String<MAX_NAME>,
    /// Runs the test attempted
    pub requested: u32,
    /// Runs completed
    pub iterations: u32,
    /// Profiling mode
    pub profiling: bool,
    /// Counter frequency in Hz
    pub frequency: u64,
    /// Shortest run, cycles
    pub min_cycles: u64,
    /// Longest run, cycles
    pub max_cycles: u64,
    /// Mean run, cycles
    pub avg_cycles: u64,
    /// Mean run, wall clock
    pub avg_time: CycleTime,
    /// Operations per run
    pub op_count: u64,
    /// Mean cycles per operation
    pub cycles_per_op: Option<f64>,
    /// Mean run as a share of one second of CPU time, in percent
    pub cpu_load: Option<f32>,
    /// Callback cycles removed from the runs
    pub overhead_cycles: u64,
    /// Stack result, `None` when not monitored
    pub stack: Option<StackUsage>,
    /// Allocation ledger, `None` when not monitored
    pub heap: Option<AllocationLedger>,
    /// Node table, `None` when not observed
    pub nodes: Option<NodeTimingReport>,
    /// Remaining iterations dropped by the safety ceiling
    pub truncated: bool,
    /// Execution failure that stopped the loop
    pub failure: Option<PerfError>,
    /// Non-fatal conditions raised by the monitors
    pub warnings: Warnings,
}

impl PerfReport {
    /// All requested runs completed without failure
    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && !self.truncated && self.iterations == self.requested
    }
}

impl fmt::Display for PerfReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Results for \"{}\", {} inferences @{}MHz",
            self.name,
            self.iterations,
            self.frequency / 1_000_000
        )?;
        writeln!(f, " duration     : {} (average)", self.avg_time)?;
        writeln!(
            f,
            " CPU cycles   : {} ({} min, {} max)",
            self.avg_cycles, self.min_cycles, self.max_cycles
        )?;
        if let Some(load) = self.cpu_load {
            writeln!(f, " CPU workload : {:.2}%", load)?;
        }
        if let Some(cpo) = self.cycles_per_op {
            writeln!(f, " cycles/MACC  : {:.2} ({} MACC)", cpo, self.op_count)?;
        }
        if let Some(stack) = self.stack {
            writeln!(f, " used stack   : {}", stack)?;
        }
        if let Some(heap) = self.heap {
            writeln!(f, " used heap    : {}", heap)?;
        }
        if self.truncated {
            writeln!(f, " truncated    : single run above the safety ceiling")?;
        }
        if let Some(err) = self.failure {
            writeln!(f, " failure      : {}", err)?;
        }
        for warning in self.warnings.iter() {
            writeln!(f, " warning      : {}", warning)?;
        }
        Ok(())
    }
}
