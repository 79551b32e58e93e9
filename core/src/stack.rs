//! # Stack Watermark Monitor
//!
//! Peak stack usage over a bounded window, by fill-and-inspect:
//!
//! ```text
//!   top ┌──────────────────────┐
//!       │  in use before arm   │  before = top - sp
//!    sp ├──────────────────────┤ ◀── captured at arm
//!       │  guard (untouched)   │
//!       ├──────────────────────┤
//!       │ DEDEDEDE DEDEDEDE .. │  overwritten by the test ─┐
//!       │ DEDEDEDE DEDEDEDE .. │                           │ used
//!       │ DEDEDEDE ...         │  still intact = untouched ┘
//!  base └──────────────────────┘  first 8 words dirty => overflow
//! ```
//!
//! Arm and measure must run in the same stack frame: both read the stack
//! pointer and refuse to report a number when it moved.

use core::fmt;
use core::ptr;

use aiperf_hal::StackProbe;
use static_assertions::const_assert_eq;

/// Fill pattern
pub const STACK_SENTINEL: u32 = 0xDEDE_DEDE;

/// Words at the bottom of the region that must stay intact
pub const OVERFLOW_GUARD_WORDS: usize = 8;

const WORD: usize = core::mem::size_of::<u32>();

const_assert_eq!(WORD, 4);

// =============================================================================
// Region
// =============================================================================

/// Bounds of the monitored stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    base: usize,
    top: usize,
    guard_bytes: usize,
}

impl StackRegion {
    /// Region `[base, top)`
    pub const fn new(base: usize, top: usize) -> Self {
        Self {
            base,
            top,
            guard_bytes: 0,
        }
    }

    /// Keep `bytes` below the stack pointer out of the fill
    pub const fn with_guard(mut self, bytes: usize) -> Self {
        self.guard_bytes = bytes;
        self
    }

    /// Lowest address
    pub const fn base(&self) -> usize {
        self.base
    }

    /// One past the highest address
    pub const fn top(&self) -> usize {
        self.top
    }

    /// Declared size in bytes
    pub const fn capacity(&self) -> usize {
        self.top.saturating_sub(self.base)
    }

    /// Whether `addr` lies inside the region
    pub const fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr <= self.top
    }

    fn fill_start(&self) -> usize {
        (self.base + WORD - 1) & !(WORD - 1)
    }
}

// =============================================================================
// Result
// =============================================================================

/// Outcome of a stack measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackUsage {
    /// Peak usage during the window
    Measured {
        /// Bytes used by the test
        used: usize,
        /// Bytes already in use at arm
        before: usize,
        /// Region size
        capacity: usize,
    },
    /// Sentinel exhausted down to the bottom guard words
    Overflow,
    /// Stack pointer moved between arm and measure
    NotCalculated,
    /// Monitoring could not be set up
    Unavailable,
}

impl StackUsage {
    /// Bytes used by the test, if measured
    pub fn used(&self) -> Option<usize> {
        match *self {
            Self::Measured { used, .. } => Some(used),
            _ => None,
        }
    }
}

impl fmt::Display for StackUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Measured {
                used,
                before,
                capacity,
            } => write!(f, "{} bytes (before: {}, size: {})", used, before, capacity),
            Self::Overflow => f.write_str("overflow"),
            Self::NotCalculated => f.write_str("not calculated"),
            Self::Unavailable => f.write_str("n.a."),
        }
    }
}

// =============================================================================
// Monitor
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MonitorState {
    Idle,
    Armed { sp: usize, before: usize, words: usize },
    Unavailable,
}

/// Fill-and-inspect stack monitor
pub struct StackMonitor<'p> {
    probe: &'p dyn StackProbe,
    region: StackRegion,
    state: MonitorState,
}

impl<'p> StackMonitor<'p> {
    /// Create a monitor for `region`
    pub fn new(probe: &'p dyn StackProbe, region: StackRegion) -> Self {
        Self {
            probe,
            region,
            state: MonitorState::Idle,
        }
    }

    /// Monitored region
    pub fn region(&self) -> StackRegion {
        self.region
    }

    /// Whether the last `arm` succeeded
    pub fn is_armed(&self) -> bool {
        matches!(self.state, MonitorState::Armed { .. })
    }

    /// Capture the stack pointer and fill the free part of the region
    ///
    /// Returns `false` when monitoring is unavailable for this window.
    ///
    /// # Safety
    ///
    /// `region` must describe the stack the caller runs on, and nothing else
    /// (interrupt frames included) may live below the stack pointer minus the
    /// guard while the fill runs.
    #[inline(always)]
    pub unsafe fn arm(&mut self) -> bool {
        if !self.probe.on_monitored_stack() {
            log::warn!("Stack: not running on the monitored stack, monitor disabled");
            self.state = MonitorState::Unavailable;
            return false;
        }

        let sp = self.probe.stack_pointer();
        if !self.region.contains(sp) {
            log::warn!(
                "Stack: sp {:#x} outside [{:#x}, {:#x}), monitor disabled",
                sp,
                self.region.base,
                self.region.top
            );
            self.state = MonitorState::Unavailable;
            return false;
        }

        let before = self.region.top - sp;
        let start = self.region.fill_start();
        let end = sp.saturating_sub(self.region.guard_bytes);
        let words = end.saturating_sub(start) / WORD;
        if words < OVERFLOW_GUARD_WORDS {
            log::warn!("Stack: no headroom below sp ({} bytes in use)", before);
            self.state = MonitorState::Unavailable;
            return false;
        }

        // Logging below sp after the fill would show up as usage
        log::debug!(
            "Stack: arming, sp={:#x} before={} filling {} bytes",
            sp,
            before,
            words * WORD
        );
        for i in 0..words {
            // SAFETY: word-aligned, inside the region and below sp - guard
            unsafe { ptr::write_volatile((start + i * WORD) as *mut u32, STACK_SENTINEL) };
        }

        self.state = MonitorState::Armed { sp, before, words };
        true
    }

    /// Inspect the region and report usage since `arm`
    ///
    /// # Safety
    ///
    /// Same region contract as [`arm`](Self::arm).
    #[inline(always)]
    pub unsafe fn measure(&mut self) -> StackUsage {
        let (sp, before, words) = match self.state {
            MonitorState::Armed { sp, before, words } => (sp, before, words),
            MonitorState::Idle | MonitorState::Unavailable => return StackUsage::Unavailable,
        };
        self.state = MonitorState::Idle;

        let now = self.probe.stack_pointer();
        if now != sp {
            log::error!("Stack: sp moved during the test ({:#x} != {:#x})", now, sp);
            return StackUsage::NotCalculated;
        }

        let start = self.region.fill_start();
        let mut untouched = 0;
        while untouched < words {
            // SAFETY: filled in `arm`, same bounds
            let value = unsafe { ptr::read_volatile((start + untouched * WORD) as *const u32) };
            if value != STACK_SENTINEL {
                break;
            }
            untouched += 1;
        }

        if untouched < OVERFLOW_GUARD_WORDS {
            log::error!("Stack: overflow, sentinel exhausted");
            return StackUsage::Overflow;
        }

        let capacity = self.region.capacity();
        let used = capacity.saturating_sub(untouched * WORD + before);
        StackUsage::Measured {
            used,
            before,
            capacity,
        }
    }
}

impl fmt::Debug for StackMonitor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackMonitor")
            .field("region", &self.region)
            .field("state", &self.state)
            .finish()
    }
}
