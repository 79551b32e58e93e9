//! # Run Aggregator
//!
//! Drives N runs of a workload and folds them into a [`PerfReport`]:
//!
//! ```text
//!  setup      validate config, check I/O, allocate buffers
//!             reset heap ledger, arm observer, arm stack monitor
//!             [mask IRQs when overflow correction is off]
//!  ┌─ loop ───────────────────────────────────────────────────────────┐
//!  │ synthesize inputs                                                │
//!  │ arm heap ─ start_window ─ run(listener) ─ end_window ─ disarm    │
//!  │ duration -= callback cycles of this run                          │
//!  │ fold min/max/sum                                                 │
//!  │ stop on failure; stop after a run above the ceiling              │
//!  └──────────────────────────────────────────────────────────────────┘
//!  teardown   [restore IRQs], measure stack, snapshot heap,
//!             finish observer, derive averages
//! ```
//!
//! Only the workload call sits inside the timed window; everything the
//! monitors do happens outside it.

use alloc::vec::Vec;
use core::fmt;

use aiperf_hal::{CycleCounter, InterruptControl, IrqGuard, TickSource};

use crate::clock::CycleClock;
use crate::config::PerfConfig;
use crate::error::{ErrorKind, PerfError, PerfResult};
use crate::heap::AllocationTracker;
use crate::input::InputRng;
use crate::observer::NodeTimingObserver;
use crate::report::{PerfReport, RunStatistics, Warnings};
use crate::session::Session;
use crate::stack::{StackMonitor, StackUsage};
use crate::workload::{IoSpec, UnitListener, Workload, MAX_IO};

/// Performance test driver
pub struct PerfRunner<'a, C: CycleCounter, T: TickSource> {
    clock: &'a CycleClock<C, T>,
    config: PerfConfig,
    stack: Option<StackMonitor<'a>>,
    heap: Option<&'a dyn AllocationTracker>,
    irq: Option<&'a dyn InterruptControl>,
}

impl<'a, C: CycleCounter, T: TickSource> PerfRunner<'a, C, T> {
    /// Create a runner timing with `clock`
    pub fn new(clock: &'a CycleClock<C, T>, config: PerfConfig) -> Self {
        Self {
            clock,
            config,
            stack: None,
            heap: None,
            irq: None,
        }
    }

    /// Measure the stack watermark
    pub fn with_stack_monitor(mut self, monitor: StackMonitor<'a>) -> Self {
        self.stack = Some(monitor);
        self
    }

    /// Record allocations made during each run
    pub fn with_heap_tracker(mut self, tracker: &'a dyn AllocationTracker) -> Self {
        self.heap = Some(tracker);
        self
    }

    /// Mask interrupts across the loop when overflow correction is off
    pub fn with_interrupt_control(mut self, control: &'a dyn InterruptControl) -> Self {
        self.irq = Some(control);
        self
    }

    /// Current configuration
    pub fn config(&self) -> &PerfConfig {
        &self.config
    }

    /// Run one test
    ///
    /// Setup problems are returned as errors. A run failing mid-loop still
    /// produces a report, with the failure attached.
    pub fn run<W: Workload>(&mut self, session: &mut Session<W>) -> PerfResult<PerfReport> {
        self.config.validate()?;
        let info = session.info().clone();
        check_io(&info.inputs, &info.outputs)?;

        let mut inputs = alloc_buffers(&info.inputs)?;
        let mut outputs = alloc_buffers(&info.outputs)?;

        let niter = self.config.iteration_count();
        let clock = self.clock;
        let workload = session.workload_mut();
        let mut rng = InputRng::new(self.config.seed);

        log::info!(
            "Runner: \"{}\", {} iteration(s){}",
            info.name,
            niter,
            if self.config.profiling { " (profiling)" } else { "" }
        );

        let mut warnings = Warnings::new();
        let heap = self.heap.filter(|_| self.config.heap_monitor_enabled());
        if let Some(tracker) = heap {
            tracker.reset();
        }

        let mut observer = self
            .config
            .observer_enabled()
            .then(|| NodeTimingObserver::new(clock.counter()));
        if let Some(obs) = observer.as_mut() {
            if let Err(err) = obs.arm(workload, info.unit_count as usize) {
                warnings.push(err);
                observer = None;
            }
        }

        let stack_enabled = self.config.stack_monitor_enabled();
        let mut stack = self.stack.as_mut().filter(|_| stack_enabled);
        if let Some(monitor) = stack.as_mut() {
            // SAFETY: the board hands in the region of the stack we run on
            unsafe { monitor.arm() };
        }

        let guard = if clock.overflow_fix_enabled() {
            None
        } else {
            self.irq.map(IrqGuard::new)
        };

        let mut stats = RunStatistics::new();
        let mut overhead_total = 0u64;
        let mut truncated = false;
        let mut failure = None;

        for iteration in 0..niter {
            for (buf, spec) in inputs.iter_mut().zip(info.inputs.iter()) {
                rng.fill(spec, buf);
            }
            let in_refs: heapless::Vec<&[u8], MAX_IO> =
                inputs.iter().map(|buf| buf.as_slice()).collect();
            let mut out_refs: heapless::Vec<&mut [u8], MAX_IO> =
                outputs.iter_mut().map(|buf| buf.as_mut_slice()).collect();

            let user_before = observer.as_ref().map_or(0, |obs| obs.user_cycles());
            if let Some(tracker) = heap {
                tracker.arm();
            }

            clock.start_window();
            if let Some(obs) = observer.as_mut() {
                obs.begin_run();
            }
            let result = workload.run(
                &in_refs,
                &mut out_refs,
                observer.as_mut().map(|obs| obs as &mut dyn UnitListener),
            );
            let cycles = clock.end_window();

            if let Some(tracker) = heap {
                tracker.disarm();
            }

            match result {
                Ok(1) => {}
                Ok(batches) => {
                    let err = workload.last_error();
                    log::error!(
                        "Runner: run #{} processed {} batches ({})",
                        iteration,
                        batches,
                        err
                    );
                    failure = Some(
                        PerfError::new(ErrorKind::RunFailed, "workload run failed").with_code(err),
                    );
                    break;
                }
                Err(err) => {
                    log::error!("Runner: run #{} failed ({})", iteration, err);
                    failure = Some(
                        PerfError::new(ErrorKind::RunFailed, "workload run failed").with_code(err),
                    );
                    break;
                }
            }

            let overhead = observer
                .as_ref()
                .map_or(0, |obs| obs.user_cycles().saturating_sub(user_before));
            overhead_total += overhead;
            let duration = cycles.saturating_sub(overhead);
            stats.record(duration);
            log::trace!("Runner: run #{} {} cycles ({} overhead)", iteration, duration, overhead);

            if self.config.ceiling_active()
                && clock.to_time(cycles).as_millis() > self.config.ceiling_ms
            {
                truncated = iteration + 1 < niter;
                if truncated {
                    log::warn!(
                        "Runner: run #{} above {} ms, {} remaining iteration(s) dropped",
                        iteration,
                        self.config.ceiling_ms,
                        niter - iteration - 1
                    );
                }
                break;
            }
        }

        drop(guard);

        let stack_usage = stack.as_mut().map(|monitor| {
            // SAFETY: same frame and region as `arm`
            unsafe { monitor.measure() }
        });

        match stack_usage {
            Some(StackUsage::Overflow) => warnings.push(PerfError::new(
                ErrorKind::StackOverflow,
                "stack sentinel exhausted",
            )),
            Some(StackUsage::NotCalculated) => warnings.push(PerfError::new(
                ErrorKind::StackPointerMismatch,
                "stack pointer moved during the test",
            )),
            _ => {}
        }

        let ledger = heap.map(|tracker| tracker.snapshot());
        if let Some(ledger) = ledger {
            if ledger.has_corruption() {
                log::warn!(
                    "Heap: {} corrupted free(s) during the test",
                    ledger.corrupted_frees
                );
                warnings.push(PerfError::new(
                    ErrorKind::HeapCorruption,
                    "allocator trailer corrupted on free",
                ));
            }
        }

        let completed = stats.completed();
        let nodes = observer
            .as_mut()
            .and_then(|obs| obs.finish(workload, completed));

        let frequency = clock.frequency();
        let avg_cycles = stats.average();
        let cycles_per_op = (info.op_count != 0 && completed != 0)
            .then(|| avg_cycles as f64 / info.op_count as f64);
        let cpu_load = (frequency != 0 && completed != 0)
            .then(|| (avg_cycles as f64 * 100.0 / frequency as f64) as f32);

        let report = PerfReport {
            name: info.name.clone(),
            requested: niter,
            iterations: completed,
            profiling: self.config.profiling,
            frequency,
            min_cycles: stats.min(),
            max_cycles: stats.max(),
            avg_cycles,
            avg_time: clock.to_time(avg_cycles),
            op_count: info.op_count,
            cycles_per_op,
            cpu_load,
            overhead_cycles: overhead_total,
            stack: stack_usage,
            heap: ledger,
            nodes,
            truncated,
            failure,
            warnings,
        };

        log::info!(
            "Runner: \"{}\" {} run(s), avg {} cycles ({})",
            report.name,
            completed,
            avg_cycles,
            report.avg_time
        );
        Ok(report)
    }
}

impl<C: CycleCounter, T: TickSource> fmt::Debug for PerfRunner<'_, C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerfRunner")
            .field("frequency", &self.clock.frequency())
            .field("config", &self.config)
            .field("stack", &self.stack)
            .field("heap", &self.heap.is_some())
            .field("irq", &self.irq.is_some())
            .finish()
    }
}

/// Reject descriptions the loop cannot drive
fn check_io(inputs: &[IoSpec], outputs: &[IoSpec]) -> PerfResult<()> {
    if inputs.is_empty() || outputs.is_empty() {
        log::error!(
            "Runner: incoherent I/O description ({} inputs, {} outputs)",
            inputs.len(),
            outputs.len()
        );
        return Err(PerfError::new(ErrorKind::IoMismatch, "workload has no input or output"));
    }
    if let Some(spec) = inputs.iter().find(|spec| !spec.format.is_synthesizable()) {
        log::error!("Runner: no input synthesis for {:?}", spec.format);
        return Err(PerfError::new(ErrorKind::IoMismatch, "input format cannot be synthesized"));
    }
    if let Some(spec) = inputs.iter().chain(outputs.iter()).find(|spec| spec.batches != 1) {
        log::error!("Runner: batch size {} not supported", spec.batches);
        return Err(PerfError::new(ErrorKind::BatchUnsupported, "only single-batch tensors are supported"));
    }
    Ok(())
}

fn alloc_buffers(specs: &[IoSpec]) -> PerfResult<heapless::Vec<Vec<u8>, MAX_IO>> {
    let mut buffers = heapless::Vec::new();
    for spec in specs {
        let mut buf = Vec::new();
        if buf.try_reserve_exact(spec.byte_size).is_err() {
            log::error!("Runner: unable to allocate a {} byte buffer", spec.byte_size);
            return Err(PerfError::new(ErrorKind::BufferAllocation, "I/O buffer allocation failed"));
        }
        buf.resize(spec.byte_size, 0);
        if buffers.push(buf).is_err() {
            return Err(PerfError::new(ErrorKind::IoMismatch, "too many I/O tensors"));
        }
    }
    Ok(buffers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{CountingIrq, FakeStack, MockProvider, MockStackProbe, MockTimer, MockWorkload};
    use crate::heap::TrackingAllocator;
    use crate::error::WorkloadErrorKind;
    use crate::workload::DataFormat;
    use std::alloc::System;

    const MHZ: u64 = 1_000_000;

    fn open<'t>(workload: MockWorkload<'t>) -> Session<MockWorkload<'t>> {
        let mut provider = MockProvider::new().with_network("network", workload);
        let mut activations = [0u8; 64];
        Session::open(&mut provider, "network", &mut activations).unwrap()
    }

    #[test]
    fn test_end_to_end() {
        let timer = MockTimer::new(32, MHZ);
        let clock = CycleClock::with_frequency(&timer, &timer, MHZ).unwrap();
        let mut session = open(MockWorkload::new(&timer, &[100, 200, 300, 400]).with_op_count(20_000));

        let mut runner = PerfRunner::new(&clock, PerfConfig::default());
        let report = runner.run(&mut session).unwrap();

        assert!(report.is_complete());
        assert_eq!(report.iterations, 16);
        assert_eq!(report.min_cycles, 1_000);
        assert_eq!(report.max_cycles, 1_000);
        assert_eq!(report.avg_cycles, 1_000);
        assert_eq!(report.avg_time.as_micros(), 1_000);
        assert_eq!(report.cycles_per_op, Some(0.05));
        assert!((report.cpu_load.unwrap() - 0.1).abs() < 1e-6);

        let nodes = report.nodes.unwrap();
        assert_eq!(nodes.rows.len(), 4);
        for row in &nodes.rows {
            assert_eq!(row.runs, 16);
        }
        assert_eq!(nodes.kernel_per_run, 1_000);
        assert!((nodes.total_percent() - 100.0).abs() < 0.01);
        assert!((nodes.rows[3].percent - 40.0).abs() < 0.01);
        assert_eq!(session.workload_mut().runs(), 16);
    }

    #[test]
    fn test_failure_keeps_completed_runs() {
        let timer = MockTimer::new(32, MHZ);
        let clock = CycleClock::with_frequency(&timer, &timer, MHZ).unwrap();
        let mut session = open(MockWorkload::new(&timer, &[100, 200]).fail_on_run(5));

        let report = PerfRunner::new(&clock, PerfConfig::default())
            .run(&mut session)
            .unwrap();

        assert_eq!(report.iterations, 4);
        assert_eq!(report.requested, 16);
        assert!(!report.is_complete());
        let failure = report.failure.unwrap();
        assert_eq!(failure.kind(), ErrorKind::RunFailed);
        assert_eq!(failure.code().map(|c| c.kind), Some(WorkloadErrorKind::InvalidState));
        assert_eq!(report.avg_cycles, 300);
        assert_eq!(report.nodes.unwrap().rows[0].runs, 4);
    }

    #[test]
    fn test_callback_overhead_removed() {
        let timer = MockTimer::new(32, MHZ).with_read_cost(10);
        let clock = CycleClock::with_frequency(&timer, &timer, MHZ).unwrap();
        let mut session = open(MockWorkload::new(&timer, &[1_000]));

        let config = PerfConfig::default().with_iterations(4);
        let report = PerfRunner::new(&clock, config).run(&mut session).unwrap();

        // Raw window: 6 reads + work; two of those reads are callback time
        assert_eq!(report.avg_cycles, 1_040);
        assert_eq!(report.overhead_cycles, 4 * 20);
    }

    #[test]
    fn test_ceiling_truncates() {
        let timer = MockTimer::new(32, MHZ);
        let clock = CycleClock::with_frequency(&timer, &timer, MHZ).unwrap();
        // 20 ms per run
        let mut session = open(MockWorkload::new(&timer, &[20_000]));

        let config = PerfConfig::default().with_ceiling_ms(10);
        let report = PerfRunner::new(&clock, config).run(&mut session).unwrap();

        assert!(report.truncated);
        assert_eq!(report.iterations, 1);
        assert!(report.failure.is_none());
    }

    #[test]
    fn test_profiling_ignores_ceiling() {
        let timer = MockTimer::new(32, MHZ);
        let clock = CycleClock::with_frequency(&timer, &timer, MHZ).unwrap();
        let mut session = open(MockWorkload::new(&timer, &[20_000]));

        let config = PerfConfig::default()
            .with_iterations(2)
            .with_profiling(true)
            .with_ceiling_ms(10);
        let report = PerfRunner::new(&clock, config).run(&mut session).unwrap();

        assert!(!report.truncated);
        assert_eq!(report.iterations, 10);
        assert!(report.profiling);
    }

    #[test]
    fn test_heap_ledger_per_test() {
        let timer = MockTimer::new(32, MHZ);
        let clock = CycleClock::with_frequency(&timer, &timer, MHZ).unwrap();
        let heap = TrackingAllocator::new(System);
        let mut session = open(MockWorkload::new(&timer, &[100]).with_scratch(&heap, 64));

        let config = PerfConfig::default().with_iterations(8);
        let report = PerfRunner::new(&clock, config)
            .with_heap_tracker(&heap)
            .run(&mut session)
            .unwrap();

        let ledger = report.heap.unwrap();
        assert_eq!(ledger.alloc_requests, 8);
        assert_eq!(ledger.free_requests, 8);
        assert_eq!(ledger.peak, 64);
        assert!(ledger.is_balanced());
        assert!(!heap.is_armed());
    }

    #[test]
    fn test_heap_corruption_reported() {
        let timer = MockTimer::new(32, MHZ);
        let clock = CycleClock::with_frequency(&timer, &timer, MHZ).unwrap();
        let heap = TrackingAllocator::new(System);
        let mut session = open(MockWorkload::new(&timer, &[100]).with_scratch(&heap, 64).with_scratch_overrun());

        let report = PerfRunner::new(&clock, PerfConfig::default().with_iterations(2))
            .with_heap_tracker(&heap)
            .run(&mut session)
            .unwrap();

        assert_eq!(report.heap.map(|ledger| ledger.corrupted_frees), Some(2));
        assert!(report.warnings.contains(ErrorKind::HeapCorruption));
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_stack_watermark_reported() {
        let timer = MockTimer::new(32, MHZ);
        let clock = CycleClock::with_frequency(&timer, &timer, MHZ).unwrap();
        let stack = FakeStack::new(256);
        let probe = MockStackProbe::new(stack.top() - 64);
        // Each run dirties 40 words below sp
        let mut session = open(MockWorkload::new(&timer, &[100]).with_stack_scribble(stack.word_addr(200), 40));

        let report = PerfRunner::new(&clock, PerfConfig::default())
            .with_stack_monitor(StackMonitor::new(&probe, stack.region()))
            .run(&mut session)
            .unwrap();

        assert_eq!(report.stack.and_then(|usage| usage.used()), Some(160));
    }

    #[test]
    fn test_observer_refusal_reported() {
        let timer = MockTimer::new(32, MHZ);
        let clock = CycleClock::with_frequency(&timer, &timer, MHZ).unwrap();

        let mut session = open(MockWorkload::new(&timer, &[100]).refuse_observer());
        let config = PerfConfig::default().with_iterations(2);
        let refused = PerfRunner::new(&clock, config).run(&mut session).unwrap();

        let mut session = open(MockWorkload::new(&timer, &[100]));
        let config = PerfConfig::default().with_iterations(2).with_observer(false);
        let disabled = PerfRunner::new(&clock, config).run(&mut session).unwrap();

        assert!(refused.nodes.is_none());
        assert!(refused.failure.is_none());
        assert_eq!(refused.iterations, 2);
        assert!(refused.warnings.contains(ErrorKind::ObserverRejected));
        assert!(disabled.warnings.is_empty());
        assert_ne!(refused.warnings, disabled.warnings);
    }

    #[test]
    fn test_stack_overflow_reported() {
        let timer = MockTimer::new(32, MHZ);
        let clock = CycleClock::with_frequency(&timer, &timer, MHZ).unwrap();
        let stack = FakeStack::new(256);
        let probe = MockStackProbe::new(stack.top() - 64);
        // Dirties everything below sp, guard words included
        let mut session = open(MockWorkload::new(&timer, &[100]).with_stack_scribble(stack.word_addr(0), 240));

        let report = PerfRunner::new(&clock, PerfConfig::default().with_iterations(1))
            .with_stack_monitor(StackMonitor::new(&probe, stack.region()))
            .run(&mut session)
            .unwrap();

        assert_eq!(report.stack, Some(StackUsage::Overflow));
        assert!(report.warnings.contains(ErrorKind::StackOverflow));
        assert!(report.failure.is_none());
    }

    #[test]
    fn test_irq_masked_without_overflow_fix() {
        let timer = MockTimer::new(32, MHZ);
        let irq = CountingIrq::default();
        let mut session = open(MockWorkload::new(&timer, &[100]));

        let clock = CycleClock::with_frequency(&timer, &timer, MHZ)
            .unwrap()
            .with_overflow_fix(false);
        PerfRunner::new(&clock, PerfConfig::default())
            .with_interrupt_control(&irq)
            .run(&mut session)
            .unwrap();
        assert_eq!(irq.disabled(), 1);
        assert_eq!(irq.restored(), 1);

        let clock = CycleClock::with_frequency(&timer, &timer, MHZ)
            .unwrap()
            .with_overflow_fix(true);
        PerfRunner::new(&clock, PerfConfig::default())
            .with_interrupt_control(&irq)
            .run(&mut session)
            .unwrap();
        let expected = if cfg!(feature = "fix-clk-overflow") { 1 } else { 2 };
        assert_eq!(irq.disabled(), expected);
    }

    #[test]
    fn test_batch_rejected() {
        let timer = MockTimer::new(32, MHZ);
        let clock = CycleClock::with_frequency(&timer, &timer, MHZ).unwrap();
        let mut session = open(MockWorkload::new(&timer, &[100]).with_input_batches(2));

        let err = PerfRunner::new(&clock, PerfConfig::default())
            .run(&mut session)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BatchUnsupported);
        assert_eq!(session.workload_mut().runs(), 0);
    }

    #[test]
    fn test_unsupported_input_format_rejected() {
        let timer = MockTimer::new(32, MHZ);
        let clock = CycleClock::with_frequency(&timer, &timer, MHZ).unwrap();
        let mut session = open(MockWorkload::new(&timer, &[100]).with_input_format(DataFormat::Float { bits: 8 }));

        let err = PerfRunner::new(&clock, PerfConfig::default())
            .run(&mut session)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoMismatch);
        assert_eq!(session.workload_mut().runs(), 0);
    }

    #[test]
    fn test_f16_inputs_synthesized() {
        let timer = MockTimer::new(32, MHZ);
        let clock = CycleClock::with_frequency(&timer, &timer, MHZ).unwrap();
        let mut session = open(MockWorkload::new(&timer, &[100]).with_input_format(DataFormat::Float { bits: 16 }));

        PerfRunner::new(&clock, PerfConfig::default().with_iterations(1))
            .run(&mut session)
            .unwrap();
        let seen = session.workload_mut().last_input();
        assert_eq!(seen.len(), 16);
        assert!(seen.iter().any(|&b| b != 0));
    }

    #[test]
    fn test_monitors_disabled() {
        let timer = MockTimer::new(32, MHZ);
        let clock = CycleClock::with_frequency(&timer, &timer, MHZ).unwrap();
        let mut session = open(MockWorkload::new(&timer, &[100]));

        let config = PerfConfig::default()
            .with_iterations(2)
            .with_observer(false)
            .with_stack_monitor(false)
            .with_heap_monitor(false);
        let report = PerfRunner::new(&clock, config).run(&mut session).unwrap();

        assert!(report.nodes.is_none());
        assert!(report.stack.is_none());
        assert!(report.heap.is_none());
        assert!(!session.workload_mut().observer_registered());
        assert_eq!(report.avg_cycles, 100);
    }

    #[test]
    fn test_inputs_are_synthesized() {
        let timer = MockTimer::new(32, MHZ);
        let clock = CycleClock::with_frequency(&timer, &timer, MHZ).unwrap();
        let mut session = open(MockWorkload::new(&timer, &[100]));

        PerfRunner::new(&clock, PerfConfig::default().with_iterations(1))
            .run(&mut session)
            .unwrap();
        let seen = session.workload_mut().last_input();
        assert!(seen.iter().any(|&b| b != 0));
    }
}
