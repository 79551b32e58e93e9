//! Host-side stand-ins for the hardware seams and the workload engine

use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::alloc::{GlobalAlloc, Layout};
use core::cell::Cell;
use core::ptr;
use std::alloc::System;

use aiperf_hal::{CycleCounter, InterruptControl, StackProbe, TickSource};

use crate::error::{WorkloadError, WorkloadErrorKind};
use crate::heap::TrackingAllocator;
use crate::stack::StackRegion;
use crate::workload::{
    DataFormat, EventFlags, IoSpec, Shape, UnitDescriptor, UnitListener, Version, Workload,
    WorkloadInfo, WorkloadProvider,
};

// =============================================================================
// Timer
// =============================================================================

/// Scripted time base: one cycle counter and a millisecond tick on the
/// same timeline
///
/// Time moves only through `advance`, counter reads (`read_cost`) and tick
/// polls (`poll_step`).
#[derive(Debug)]
pub struct MockTimer {
    now: Cell<u64>,
    base: Cell<u64>,
    width: u32,
    hz: u64,
    poll_step: u64,
    read_cost: u64,
    frozen: bool,
    nominal: Option<u64>,
}

impl MockTimer {
    pub fn new(width: u32, hz: u64) -> Self {
        Self {
            now: Cell::new(0),
            base: Cell::new(0),
            width,
            hz,
            poll_step: 0,
            read_cost: 0,
            frozen: false,
            nominal: None,
        }
    }

    pub fn with_poll_step(mut self, cycles: u64) -> Self {
        self.poll_step = cycles;
        self
    }

    pub fn with_read_cost(mut self, cycles: u64) -> Self {
        self.read_cost = cycles;
        self
    }

    /// Counter stuck at zero
    pub fn frozen_counter(mut self) -> Self {
        self.frozen = true;
        self
    }

    /// Advertise a rate through `nominal_frequency`
    pub fn with_nominal(mut self, hz: u64) -> Self {
        self.nominal = Some(hz);
        self
    }

    pub fn advance(&self, cycles: u64) {
        self.now.set(self.now.get() + cycles);
    }
}

impl CycleCounter for MockTimer {
    fn width(&self) -> u32 {
        self.width
    }

    fn read(&self) -> u64 {
        if self.frozen {
            return 0;
        }
        let value = self.now.get().wrapping_sub(self.base.get()) & self.mask();
        self.advance(self.read_cost);
        value
    }

    fn reset(&self) {
        self.base.set(self.now.get());
    }

    fn nominal_frequency(&self) -> Option<u64> {
        self.nominal
    }
}

impl TickSource for MockTimer {
    fn millis(&self) -> u32 {
        let now = self.now.get();
        self.advance(self.poll_step);
        (now as u128 * 1_000 / self.hz as u128) as u32
    }
}

// =============================================================================
// Stack
// =============================================================================

#[derive(Debug)]
pub struct MockStackProbe {
    sp: Cell<usize>,
    main: bool,
}

impl MockStackProbe {
    pub fn new(sp: usize) -> Self {
        Self {
            sp: Cell::new(sp),
            main: true,
        }
    }

    pub fn off_main_stack(mut self) -> Self {
        self.main = false;
        self
    }

    pub fn set_sp(&self, sp: usize) {
        self.sp.set(sp);
    }
}

impl StackProbe for MockStackProbe {
    fn stack_pointer(&self) -> usize {
        self.sp.get()
    }

    fn on_monitored_stack(&self) -> bool {
        self.main
    }
}

/// Heap buffer standing in for a stack region
#[derive(Debug)]
pub struct FakeStack {
    _buf: Vec<u32>,
    base: usize,
    words: usize,
}

impl FakeStack {
    pub fn new(words: usize) -> Self {
        let mut buf = vec![0u32; words];
        let base = buf.as_mut_ptr() as usize;
        Self {
            _buf: buf,
            base,
            words,
        }
    }

    pub fn region(&self) -> StackRegion {
        StackRegion::new(self.base, self.top())
    }

    pub fn top(&self) -> usize {
        self.base + self.words * 4
    }

    pub fn word_addr(&self, index: usize) -> usize {
        self.base + index * 4
    }

    pub fn word(&self, index: usize) -> u32 {
        assert!(index < self.words);
        unsafe { ptr::read_volatile(self.word_addr(index) as *const u32) }
    }

    /// Dirty `count` words starting at `from`
    pub fn scribble(&mut self, from: usize, count: usize) {
        assert!(from + count <= self.words);
        unsafe { scribble(self.word_addr(from), count) };
    }
}

std::thread_local! {
    static LOG_SCRIBBLE: Cell<Option<(usize, usize)>> = const { Cell::new(None) };
}

/// Logger whose every call dirties the words set by [`scribble_on_log`],
/// standing in for the stack frames a real logger pushes
struct ScribblingLogger;

impl log::Log for ScribblingLogger {
    fn enabled(&self, _metadata: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, _record: &log::Record<'_>) {
        if let Some((addr, words)) = LOG_SCRIBBLE.with(Cell::get) {
            unsafe { scribble(addr, words) };
        }
    }

    fn flush(&self) {}
}

static LOGGER: ScribblingLogger = ScribblingLogger;
static LOGGER_INIT: std::sync::Once = std::sync::Once::new();

/// Make log calls on this thread dirty `count` words of `stack` from `from`
///
/// `None` stops it.
pub fn scribble_on_log(target: Option<(&FakeStack, usize, usize)>) {
    LOGGER_INIT.call_once(|| {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(log::LevelFilter::Trace);
        }
    });
    let words = target.map(|(stack, from, count)| {
        assert!(from + count <= stack.words);
        (stack.word_addr(from), count)
    });
    LOG_SCRIBBLE.with(|cell| cell.set(words));
}

unsafe fn scribble(addr: usize, words: usize) {
    for i in 0..words {
        unsafe { ptr::write_volatile((addr + i * 4) as *mut u32, 0xA5A5_A5A5) };
    }
}

// =============================================================================
// Allocator / IRQ
// =============================================================================

/// Allocator that always fails
#[derive(Debug)]
pub struct NullAlloc;

unsafe impl GlobalAlloc for NullAlloc {
    unsafe fn alloc(&self, _layout: Layout) -> *mut u8 {
        ptr::null_mut()
    }

    unsafe fn dealloc(&self, _ptr: *mut u8, _layout: Layout) {}
}

#[derive(Debug, Default)]
pub struct CountingIrq {
    disables: Cell<u32>,
    restores: Cell<u32>,
}

impl CountingIrq {
    pub fn disabled(&self) -> u32 {
        self.disables.get()
    }

    pub fn restored(&self) -> u32 {
        self.restores.get()
    }
}

impl InterruptControl for CountingIrq {
    fn disable(&self) -> usize {
        self.disables.set(self.disables.get() + 1);
        0
    }

    fn restore(&self, _state: usize) {
        self.restores.set(self.restores.get() + 1);
    }
}

// =============================================================================
// Workload
// =============================================================================

/// Scripted engine: unit `i` costs `costs[i]` cycles of the mock timer
#[derive(Debug, Clone)]
pub struct MockWorkload<'t> {
    timer: &'t MockTimer,
    costs: Vec<u64>,
    kinds: Vec<u16>,
    op_count: u64,
    input_format: DataFormat,
    input_batches: u32,
    fail_on_run: Option<u32>,
    fail_init: bool,
    fail_destroy: bool,
    no_info: bool,
    refuse_observer: bool,
    registered: Option<EventFlags>,
    scratch: Option<(&'t TrackingAllocator<System>, usize)>,
    scratch_overrun: bool,
    stack_scribble: Option<(usize, usize)>,
    runs: u32,
    last_error: WorkloadError,
    last_input: Vec<u8>,
    destroyed: Rc<Cell<u32>>,
}

impl<'t> MockWorkload<'t> {
    pub fn new(timer: &'t MockTimer, costs: &[u64]) -> Self {
        Self {
            timer,
            costs: costs.to_vec(),
            kinds: Vec::new(),
            op_count: 0,
            input_format: DataFormat::F32,
            input_batches: 1,
            fail_on_run: None,
            fail_init: false,
            fail_destroy: false,
            no_info: false,
            refuse_observer: false,
            registered: None,
            scratch: None,
            scratch_overrun: false,
            stack_scribble: None,
            runs: 0,
            last_error: WorkloadError::NONE,
            last_input: Vec::new(),
            destroyed: Rc::new(Cell::new(0)),
        }
    }

    pub fn with_op_count(mut self, op_count: u64) -> Self {
        self.op_count = op_count;
        self
    }

    pub fn with_unit_kinds(mut self, kinds: &[u16]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    pub fn with_input_format(mut self, format: DataFormat) -> Self {
        self.input_format = format;
        self
    }

    pub fn with_input_batches(mut self, batches: u32) -> Self {
        self.input_batches = batches;
        self
    }

    /// The `run`-th call (1-based) fails
    pub fn fail_on_run(mut self, run: u32) -> Self {
        self.fail_on_run = Some(run);
        self
    }

    pub fn fail_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// `destroy` reports failure (after counting the call)
    pub fn fail_destroy(mut self) -> Self {
        self.fail_destroy = true;
        self
    }

    pub fn without_info(mut self) -> Self {
        self.no_info = true;
        self
    }

    pub fn refuse_observer(mut self) -> Self {
        self.refuse_observer = true;
        self
    }

    /// Allocate and free `size` bytes through `heap` on every run
    pub fn with_scratch(mut self, heap: &'t TrackingAllocator<System>, size: usize) -> Self {
        self.scratch = Some((heap, size));
        self
    }

    /// Write one byte past the scratch block before freeing it
    pub fn with_scratch_overrun(mut self) -> Self {
        self.scratch_overrun = true;
        self
    }

    /// Dirty `words` words from `addr` on every run
    pub fn with_stack_scribble(mut self, addr: usize, words: usize) -> Self {
        self.stack_scribble = Some((addr, words));
        self
    }

    pub fn runs(&self) -> u32 {
        self.runs
    }

    pub fn observer_registered(&self) -> bool {
        self.registered.is_some()
    }

    pub fn destroy_counter(&self) -> Rc<Cell<u32>> {
        Rc::clone(&self.destroyed)
    }

    pub fn last_input(&self) -> &[u8] {
        &self.last_input
    }

    /// Run without I/O buffers
    pub fn execute(&mut self, listener: Option<&mut dyn UnitListener>) -> Result<u32, WorkloadError> {
        self.run(&[], &mut [], listener)
    }

    fn descriptor(&self, index: usize) -> UnitDescriptor {
        let kind = self.kinds.get(index).copied().unwrap_or(0x0010);
        UnitDescriptor::new(index as u16, kind, 100 + index as u16)
    }
}

impl Workload for MockWorkload<'_> {
    fn init(&mut self, _activations: &mut [u8]) -> bool {
        if self.fail_init {
            self.last_error = WorkloadError::new(WorkloadErrorKind::InitFailed, 0x11);
            return false;
        }
        true
    }

    fn info(&self) -> Option<WorkloadInfo> {
        if self.no_info {
            return None;
        }
        let mut inputs = heapless::Vec::new();
        let input = IoSpec::new(self.input_format, Shape::new(1, 1, 8)).with_batches(self.input_batches);
        inputs.push(input).ok()?;
        let mut outputs = heapless::Vec::new();
        outputs
            .push(IoSpec::new(DataFormat::F32, Shape::new(1, 1, 4)))
            .ok()?;
        Some(WorkloadInfo {
            name: heapless::String::try_from("network").ok()?,
            unit_count: self.costs.len() as u16,
            op_count: self.op_count,
            inputs,
            outputs,
            activations_size: 64,
            weights_size: 1024,
            runtime_version: Version::new(1, 2, 0),
            tool_version: Version::new(1, 2, 0),
        })
    }

    fn last_error(&self) -> WorkloadError {
        self.last_error
    }

    fn run(
        &mut self,
        inputs: &[&[u8]],
        outputs: &mut [&mut [u8]],
        listener: Option<&mut dyn UnitListener>,
    ) -> Result<u32, WorkloadError> {
        self.runs += 1;
        if self.fail_on_run == Some(self.runs) {
            self.last_error = WorkloadError::new(WorkloadErrorKind::InvalidState, 0x10);
            return Err(self.last_error);
        }

        if let Some(first) = inputs.first() {
            self.last_input.clear();
            self.last_input.extend_from_slice(first);
        }
        if let Some((heap, size)) = self.scratch {
            let layout = Layout::from_size_align(size, 8).unwrap();
            unsafe {
                let p = heap.alloc(layout);
                if !p.is_null() {
                    if self.scratch_overrun {
                        // Lands on the trailer, still inside the inner block
                        p.add(size).write(0);
                    }
                    heap.dealloc(p, layout);
                }
            }
        }
        if let Some((addr, words)) = self.stack_scribble {
            unsafe { scribble(addr, words) };
        }

        let mut listener = if self.registered.is_some() { listener } else { None };
        for index in 0..self.costs.len() {
            let unit = self.descriptor(index);
            if let Some(l) = listener.as_mut() {
                l.on_event(EventFlags::PRE, &unit);
            }
            self.timer.advance(self.costs[index]);
            if let Some(l) = listener.as_mut() {
                l.on_event(EventFlags::POST, &unit);
            }
        }

        for out in outputs.iter_mut() {
            out.fill(0);
        }
        Ok(1)
    }

    fn register_observer(&mut self, mask: EventFlags) -> bool {
        if self.refuse_observer {
            return false;
        }
        self.registered = Some(mask);
        true
    }

    fn unregister_observer(&mut self) {
        self.registered = None;
    }

    fn unit(&self, index: u16) -> Option<UnitDescriptor> {
        ((index as usize) < self.costs.len()).then(|| self.descriptor(index as usize))
    }

    fn destroy(&mut self) -> bool {
        self.destroyed.set(self.destroyed.get() + 1);
        if self.fail_destroy {
            self.last_error = WorkloadError::new(WorkloadErrorKind::DeallocationFailed, 0x12);
            return false;
        }
        true
    }
}

/// Provider over a list of named prototypes
#[derive(Debug, Default)]
pub struct MockProvider<'t> {
    networks: Vec<(&'static str, MockWorkload<'t>)>,
}

impl<'t> MockProvider<'t> {
    pub fn new() -> Self {
        Self {
            networks: Vec::new(),
        }
    }

    pub fn with_network(mut self, name: &'static str, workload: MockWorkload<'t>) -> Self {
        self.networks.push((name, workload));
        self
    }
}

impl<'t> WorkloadProvider for MockProvider<'t> {
    type Workload = MockWorkload<'t>;

    fn find(&self, index: usize) -> Option<&str> {
        self.networks.get(index).map(|(name, _)| *name)
    }

    fn create(&mut self, name: &str) -> Result<MockWorkload<'t>, WorkloadError> {
        self.networks
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, workload)| workload.clone())
            .ok_or(WorkloadError::new(WorkloadErrorKind::CreateFailed, 0x30))
    }
}
