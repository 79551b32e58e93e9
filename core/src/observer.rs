//! # Node Timing Observer
//!
//! Listens to the workload's PRE/POST unit events and splits each run into
//! per-unit kernel time and the time spent in the callback itself:
//!
//! ```text
//!        begin_run        PRE(u0)            POST(u0)   PRE(u1) ...
//!            │           ┌──────┐           ┌──────┐   ┌──────┐
//!  cycles ───┼───────────┤ user ├───────────┤ user ├───┤ user ├───▶
//!            start_t     entry  exit=start_t entry exit
//!                               └── kernel ─┘
//! ```
//!
//! Kernel time of a unit is the span from the previous event's exit to the
//! POST entry. Callback ("user") time is accumulated separately so the
//! runner can subtract it from the measured window.
//!
//! ## State Machine
//!
//! ```text
//!  Unarmed ──arm()──▶ Armed ──finish()──▶ Unarmed
//!     │                                      ▲
//!     └─arm() fails──▶ Degraded ──finish()───┘
//! ```

use alloc::vec::Vec;

use aiperf_hal::CycleCounter;

use crate::error::{ErrorKind, PerfError, PerfResult};
use crate::workload::{EventFlags, UnitDescriptor, UnitListener, Workload};

// =============================================================================
// Types
// =============================================================================

/// Observer lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverState {
    /// Not observing
    Unarmed,
    /// Registered and collecting
    Armed,
    /// Arm failed; runs proceed without node timings
    Degraded,
}

/// Accumulated timing of one unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStat {
    /// Cumulative kernel cycles
    pub cycles: u64,
    /// Number of completed executions
    pub runs: u32,
}

/// One row of the node table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeRow {
    /// Execution order index
    pub index: u16,
    /// Engine unit type without the time-distributed bit
    pub type_tag: u16,
    /// Engine unit id
    pub id: u16,
    /// Time-distributed unit
    pub time_distributed: bool,
    /// Cumulative kernel cycles
    pub cycles: u64,
    /// Average cycles per execution
    pub average: u64,
    /// Executions
    pub runs: u32,
    /// Share of the total kernel time, in percent
    pub percent: f32,
}

/// Node timing table for one test
#[derive(Debug, Clone, PartialEq)]
pub struct NodeTimingReport {
    /// Iterations the averages are computed over
    pub iterations: u32,
    /// Total callbacks received
    pub callbacks: u32,
    /// Cumulative kernel cycles
    pub kernel_cycles: u64,
    /// Cumulative callback cycles
    pub user_cycles: u64,
    /// Kernel cycles per run
    pub kernel_per_run: u64,
    /// Callback cycles per run
    pub user_per_run: u64,
    /// One row per unit, in execution order
    pub rows: Vec<NodeRow>,
}

impl NodeTimingReport {
    /// Sum of the per-unit percentages
    pub fn total_percent(&self) -> f32 {
        self.rows.iter().map(|row| row.percent).sum()
    }
}

// =============================================================================
// Observer
// =============================================================================

/// Per-unit timing listener
#[derive(Debug)]
pub struct NodeTimingObserver<'c, C: CycleCounter> {
    counter: &'c C,
    state: ObserverState,
    callbacks: u32,
    start_t: u64,
    user_cycles: u64,
    kernel_cycles: u64,
    nodes: Vec<NodeStat>,
}

impl<'c, C: CycleCounter> NodeTimingObserver<'c, C> {
    /// Create an unarmed observer reading `counter`
    pub fn new(counter: &'c C) -> Self {
        Self {
            counter,
            state: ObserverState::Unarmed,
            callbacks: 0,
            start_t: 0,
            user_cycles: 0,
            kernel_cycles: 0,
            nodes: Vec::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> ObserverState {
        self.state
    }

    /// Allocate the node table and register for PRE/POST events
    ///
    /// On error the observer is left [`Degraded`](ObserverState::Degraded)
    /// and runs proceed without node timings.
    pub fn arm<W: Workload + ?Sized>(&mut self, workload: &mut W, unit_count: usize) -> PerfResult<()> {
        self.callbacks = 0;
        self.start_t = 0;
        self.user_cycles = 0;
        self.kernel_cycles = 0;
        self.nodes = Vec::new();

        if self.nodes.try_reserve_exact(unit_count).is_err() {
            log::warn!(
                "Observer: unable to allocate the table for {} units, node timings skipped",
                unit_count
            );
            self.state = ObserverState::Degraded;
            return Err(PerfError::new(
                ErrorKind::NodeTableAllocation,
                "node table allocation failed",
            ));
        }
        self.nodes.resize(unit_count, NodeStat::default());

        if !workload.register_observer(EventFlags::PRE | EventFlags::POST) {
            log::warn!("Observer: registration refused, node timings skipped");
            self.nodes = Vec::new();
            self.state = ObserverState::Degraded;
            return Err(PerfError::new(
                ErrorKind::ObserverRejected,
                "observer registration refused",
            ));
        }

        log::debug!("Observer: armed for {} units", unit_count);
        self.state = ObserverState::Armed;
        Ok(())
    }

    /// Mark the start of a run
    #[inline]
    pub fn begin_run(&mut self) {
        if self.state == ObserverState::Armed {
            self.start_t = self.counter.read();
        }
    }

    /// Cumulative callback cycles so far
    pub fn user_cycles(&self) -> u64 {
        self.user_cycles
    }

    /// Cumulative kernel cycles so far
    pub fn kernel_cycles(&self) -> u64 {
        self.kernel_cycles
    }

    /// Callbacks received so far
    pub fn callbacks(&self) -> u32 {
        self.callbacks
    }

    /// Unregister, build the table and release it
    ///
    /// Returns `None` unless the observer was armed.
    pub fn finish<W: Workload + ?Sized>(
        &mut self,
        workload: &mut W,
        completed_iterations: u32,
    ) -> Option<NodeTimingReport> {
        let state = self.state;
        self.state = ObserverState::Unarmed;
        let nodes = core::mem::take(&mut self.nodes);

        if state != ObserverState::Armed {
            return None;
        }
        workload.unregister_observer();

        let kernel = self.kernel_cycles;
        let mut rows = Vec::new();
        if rows.try_reserve_exact(nodes.len()).is_err() {
            log::warn!("Observer: unable to allocate the report, node timings dropped");
            return None;
        }

        for (i, stat) in nodes.iter().enumerate() {
            let index = i as u16;
            let unit = workload
                .unit(index)
                .unwrap_or_else(|| UnitDescriptor::new(index, 0, 0));
            rows.push(NodeRow {
                index,
                type_tag: unit.type_tag(),
                id: unit.id,
                time_distributed: unit.is_time_distributed(),
                cycles: stat.cycles,
                average: if stat.runs == 0 {
                    0
                } else {
                    stat.cycles / stat.runs as u64
                },
                runs: stat.runs,
                percent: if kernel == 0 {
                    0.0
                } else {
                    (stat.cycles as f64 * 100.0 / kernel as f64) as f32
                },
            });
        }

        let per_run = |total: u64| {
            if completed_iterations == 0 {
                0
            } else {
                total / completed_iterations as u64
            }
        };

        log::debug!(
            "Observer: {} callbacks, kernel {} cycles, callbacks {} cycles",
            self.callbacks,
            kernel,
            self.user_cycles
        );

        Some(NodeTimingReport {
            iterations: completed_iterations,
            callbacks: self.callbacks,
            kernel_cycles: kernel,
            user_cycles: self.user_cycles,
            kernel_per_run: per_run(kernel),
            user_per_run: per_run(self.user_cycles),
            rows,
        })
    }
}

impl<C: CycleCounter> UnitListener for NodeTimingObserver<'_, C> {
    fn on_event(&mut self, flags: EventFlags, unit: &UnitDescriptor) -> u32 {
        if self.state != ObserverState::Armed {
            return 0;
        }

        let entry = self.counter.read();
        if flags.contains(EventFlags::POST) {
            let duration = self.counter.elapsed(self.start_t, entry);
            self.kernel_cycles += duration;
            if let Some(stat) = self.nodes.get_mut(unit.index as usize) {
                stat.cycles += duration;
                stat.runs += 1;
            }
        }
        self.callbacks += 1;

        let exit = self.counter.read();
        self.user_cycles += self.counter.elapsed(entry, exit);
        self.start_t = exit;
        0
    }
}
