//! # Allocator Accounting Interceptor
//!
//! [`TrackingAllocator`] wraps any [`GlobalAlloc`] and keeps a ledger of the
//! traffic that goes through it while armed. Each block carries a hidden
//! size header and a trailing sentinel:
//!
//! ```text
//!   inner block
//!  ┌────────────────────┬──────────────────────────┬──────────┐
//!  │ pad ...  │  size   │ user data (size, rounded)│ EFDCBA98 │
//!  └────────────────────┴──────────────────────────┴──────────┘
//!                       ▲ pointer handed out
//! ```
//!
//! The trailer must still be intact on free. Overwritten or already cleared
//! trailers are counted as corrupted frees; the block is released anyway.
//!
//! The allocator never logs: logging may allocate. Corruption is reported
//! through the ledger and logged by the runner.

use core::alloc::{GlobalAlloc, Layout};
use core::fmt;
use core::ptr;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use bitflags::bitflags;
use static_assertions::const_assert;

/// Trailer written after every block
pub const HEAP_TRAILER: u32 = 0xEFDC_BA98;

const SIZE_FIELD: usize = core::mem::size_of::<usize>();
const TRAILER: usize = core::mem::size_of::<u32>();
const WORD_ALIGN: usize = core::mem::align_of::<usize>();

const_assert!(SIZE_FIELD >= TRAILER);
const_assert!(WORD_ALIGN.is_power_of_two());
const_assert!(SIZE_FIELD % TRAILER == 0);

bitflags! {
    /// Ledger state bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LedgerFlags: u32 {
        /// Counting is active
        const ARMED      = 1 << 0;
        /// Allocator entered while armed
        const ALLOC_SEEN = 1 << 1;
        /// Deallocator entered while armed
        const FREE_SEEN  = 1 << 2;
        /// At least one corrupted free
        const CORRUPTION = 1 << 3;
    }
}

// =============================================================================
// Ledger
// =============================================================================

/// Snapshot of the allocation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationLedger {
    /// Allocation requests
    pub alloc_requests: u64,
    /// Deallocation requests
    pub free_requests: u64,
    /// Cumulative bytes allocated
    pub allocated_bytes: u64,
    /// Cumulative bytes freed
    pub freed_bytes: u64,
    /// Bytes currently outstanding
    pub outstanding: usize,
    /// Peak outstanding bytes
    pub peak: usize,
    /// Frees whose trailer was not intact
    pub corrupted_frees: u64,
    /// State bits
    pub flags: LedgerFlags,
}

impl AllocationLedger {
    /// Every allocation matched by a free
    pub fn is_balanced(&self) -> bool {
        self.alloc_requests == self.free_requests && self.outstanding == 0
    }

    /// Whether a corrupted free was seen
    pub fn has_corruption(&self) -> bool {
        self.corrupted_frees > 0 || self.flags.contains(LedgerFlags::CORRUPTION)
    }
}

impl fmt::Display for AllocationLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "used: {} bytes (peak: {}), alloc: {} req / {} bytes, free: {} req / {} bytes",
            self.outstanding,
            self.peak,
            self.alloc_requests,
            self.allocated_bytes,
            self.free_requests,
            self.freed_bytes
        )?;
        if self.corrupted_frees > 0 {
            write!(f, ", corrupted: {}", self.corrupted_frees)?;
        }
        Ok(())
    }
}

/// Control surface of an allocation interceptor
pub trait AllocationTracker {
    /// Start counting
    fn arm(&self);

    /// Stop counting
    fn disarm(&self);

    /// Zero every counter (flags included)
    fn reset(&self);

    /// Current counters
    fn snapshot(&self) -> AllocationLedger;

    /// Whether counting is active
    fn is_armed(&self) -> bool {
        self.snapshot().flags.contains(LedgerFlags::ARMED)
    }
}

// =============================================================================
// Tracking Allocator
// =============================================================================

/// Accounting wrapper around an inner allocator
///
/// ```ignore
/// #[global_allocator]
/// static HEAP: TrackingAllocator<Board> = TrackingAllocator::new(Board::new());
/// ```
#[derive(Debug)]
pub struct TrackingAllocator<A> {
    inner: A,
    flags: AtomicU32,
    alloc_requests: AtomicU64,
    free_requests: AtomicU64,
    allocated_bytes: AtomicU64,
    freed_bytes: AtomicU64,
    outstanding: AtomicUsize,
    peak: AtomicUsize,
    corrupted_frees: AtomicU64,
}

/// Layout of the inner block for a user layout
struct Frame {
    outer: Layout,
    header: usize,
    size: usize,
}

impl Frame {
    fn of(layout: Layout) -> Option<Self> {
        let align = layout.align().max(WORD_ALIGN);
        let header = align.max(SIZE_FIELD);
        let size = layout.size().checked_add(WORD_ALIGN - 1)? & !(WORD_ALIGN - 1);
        let total = header.checked_add(size)?.checked_add(TRAILER)?;
        let outer = Layout::from_size_align(total, align).ok()?;
        Some(Self {
            outer,
            header,
            size,
        })
    }
}

impl<A> TrackingAllocator<A> {
    /// Wrap `inner`; counting starts disarmed
    pub const fn new(inner: A) -> Self {
        Self {
            inner,
            flags: AtomicU32::new(0),
            alloc_requests: AtomicU64::new(0),
            free_requests: AtomicU64::new(0),
            allocated_bytes: AtomicU64::new(0),
            freed_bytes: AtomicU64::new(0),
            outstanding: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            corrupted_frees: AtomicU64::new(0),
        }
    }

    /// Inner allocator
    pub fn inner(&self) -> &A {
        &self.inner
    }

    fn armed(&self) -> bool {
        self.flags.load(Ordering::Relaxed) & LedgerFlags::ARMED.bits() != 0
    }

    fn record_alloc(&self, size: usize) {
        if !self.armed() {
            return;
        }
        self.flags
            .fetch_or(LedgerFlags::ALLOC_SEEN.bits(), Ordering::Relaxed);
        self.alloc_requests.fetch_add(1, Ordering::Relaxed);
        self.allocated_bytes
            .fetch_add(size as u64, Ordering::Relaxed);
        let used = self
            .outstanding
            .fetch_add(size, Ordering::Relaxed)
            .saturating_add(size);
        self.peak.fetch_max(used, Ordering::Relaxed);
    }

    fn record_free(&self, size: usize) {
        if !self.armed() {
            return;
        }
        self.flags
            .fetch_or(LedgerFlags::FREE_SEEN.bits(), Ordering::Relaxed);
        self.free_requests.fetch_add(1, Ordering::Relaxed);
        self.freed_bytes.fetch_add(size as u64, Ordering::Relaxed);
        // Blocks allocated before arming may be freed while armed
        let _ = self
            .outstanding
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                Some(used.saturating_sub(size))
            });
    }

    fn record_corruption(&self) {
        self.flags
            .fetch_or(LedgerFlags::CORRUPTION.bits(), Ordering::Relaxed);
        self.corrupted_frees.fetch_add(1, Ordering::Relaxed);
    }
}

unsafe impl<A: GlobalAlloc> GlobalAlloc for TrackingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let Some(frame) = Frame::of(layout) else {
            return ptr::null_mut();
        };

        // SAFETY: `frame.outer` has non-zero size
        let base = unsafe { self.inner.alloc(frame.outer) };
        if base.is_null() {
            return base;
        }

        // SAFETY: header + size + trailer fit in the inner block, and the
        // user pointer is aligned to at least `usize`
        unsafe {
            let user = base.add(frame.header);
            user.sub(SIZE_FIELD).cast::<usize>().write(frame.size);
            user.add(frame.size)
                .cast::<u32>()
                .write_unaligned(HEAP_TRAILER);
            self.record_alloc(frame.size);
            user
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let Some(frame) = Frame::of(layout) else {
            return;
        };

        // SAFETY: `ptr` came from `alloc` with the same layout
        unsafe {
            let recorded = ptr.sub(SIZE_FIELD).cast::<usize>().read();
            if recorded == frame.size {
                let trailer = ptr.add(frame.size).cast::<u32>();
                if trailer.read_unaligned() == HEAP_TRAILER {
                    trailer.write_unaligned(0);
                } else {
                    self.record_corruption();
                }
            } else {
                // Header overwritten; do not follow it
                self.record_corruption();
            }
            self.record_free(frame.size);
            self.inner.dealloc(ptr.sub(frame.header), frame.outer);
        }
    }
}

impl<A> AllocationTracker for TrackingAllocator<A> {
    fn arm(&self) {
        self.flags
            .fetch_or(LedgerFlags::ARMED.bits(), Ordering::Relaxed);
    }

    fn disarm(&self) {
        self.flags
            .fetch_and(!LedgerFlags::ARMED.bits(), Ordering::Relaxed);
    }

    fn reset(&self) {
        self.flags.store(0, Ordering::Relaxed);
        self.alloc_requests.store(0, Ordering::Relaxed);
        self.free_requests.store(0, Ordering::Relaxed);
        self.allocated_bytes.store(0, Ordering::Relaxed);
        self.freed_bytes.store(0, Ordering::Relaxed);
        self.outstanding.store(0, Ordering::Relaxed);
        self.peak.store(0, Ordering::Relaxed);
        self.corrupted_frees.store(0, Ordering::Relaxed);
    }

    fn snapshot(&self) -> AllocationLedger {
        AllocationLedger {
            alloc_requests: self.alloc_requests.load(Ordering::Relaxed),
            free_requests: self.free_requests.load(Ordering::Relaxed),
            allocated_bytes: self.allocated_bytes.load(Ordering::Relaxed),
            freed_bytes: self.freed_bytes.load(Ordering::Relaxed),
            outstanding: self.outstanding.load(Ordering::Relaxed),
            peak: self.peak.load(Ordering::Relaxed),
            corrupted_frees: self.corrupted_frees.load(Ordering::Relaxed),
            flags: LedgerFlags::from_bits_truncate(self.flags.load(Ordering::Relaxed)),
        }
    }

    fn is_armed(&self) -> bool {
        self.armed()
    }
}
