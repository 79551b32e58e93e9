//! # Time Stamp Counter (TSC)
//!
//! 64-bit counter of reference cycles. On CPUs with invariant TSC it ticks
//! at a constant rate across P/C states, which makes it usable as the
//! cycle source for latency windows. It cannot be reset from here, so the
//! clock records the value at window start instead.
//!
//! When CPUID advertises the rate (leaf 0x15, else leaf 0x16) the clock is
//! built without a calibration spin.

use core::arch::asm;
use core::arch::x86_64::__cpuid;

use crate::CycleCounter;

/// Crystal ratio leaf
const LEAF_TSC_RATIO: u32 = 0x15;

/// Base frequency leaf
const LEAF_BASE_MHZ: u32 = 0x16;

/// Highest extended leaf query
const LEAF_EXT_MAX: u32 = 0x8000_0000;

/// Advanced power management leaf
const LEAF_EXT_APM: u32 = 0x8000_0007;

// =============================================================================
// Raw Access
// =============================================================================

/// Read the counter
#[inline]
pub fn read() -> u64 {
    let lo: u32;
    let hi: u32;
    // SAFETY: rdtsc is unprivileged unless CR4.TSD is set
    unsafe {
        asm!("rdtsc", out("eax") lo, out("edx") hi, options(nostack, nomem, preserves_flags));
    }
    (u64::from(hi) << 32) | u64::from(lo)
}

/// Read the counter fenced on both sides
///
/// Keeps the read from being reordered into the measured code.
#[inline]
pub fn read_fenced() -> u64 {
    // SAFETY: lfence has no architectural side effects
    unsafe { asm!("lfence", options(nostack, preserves_flags)) };
    let value = read();
    // SAFETY: as above
    unsafe { asm!("lfence", options(nostack, preserves_flags)) };
    value
}

/// Whether CPUID reports an invariant TSC
pub fn is_invariant() -> bool {
    // SAFETY: cpuid is always available in 64-bit mode
    let ext_max = unsafe { __cpuid(LEAF_EXT_MAX) }.eax;
    ext_max >= LEAF_EXT_APM && unsafe { __cpuid(LEAF_EXT_APM) }.edx & (1 << 8) != 0
}

/// TSC rate advertised by CPUID, in Hz
pub fn cpuid_frequency() -> Option<u64> {
    // SAFETY: cpuid is always available in 64-bit mode
    let max_leaf = unsafe { __cpuid(0) }.eax;

    if max_leaf >= LEAF_TSC_RATIO {
        // eax/ebx is the TSC/crystal ratio, ecx the crystal rate
        let ratio = unsafe { __cpuid(LEAF_TSC_RATIO) };
        if ratio.eax != 0 && ratio.ebx != 0 && ratio.ecx != 0 {
            return Some(u64::from(ratio.ecx) * u64::from(ratio.ebx) / u64::from(ratio.eax));
        }
    }

    if max_leaf >= LEAF_BASE_MHZ {
        let mhz = unsafe { __cpuid(LEAF_BASE_MHZ) }.eax & 0xFFFF;
        if mhz != 0 {
            return Some(u64::from(mhz) * 1_000_000);
        }
    }

    None
}

// =============================================================================
// Counter
// =============================================================================

/// TSC as a cycle counter
#[derive(Debug, Clone, Copy)]
pub struct Tsc {
    frequency: Option<u64>,
}

impl Tsc {
    /// Probe the TSC
    ///
    /// A rate is only trusted from CPUID when the TSC is invariant.
    pub fn new() -> Self {
        let frequency = if is_invariant() {
            cpuid_frequency()
        } else {
            log::warn!("TSC: not invariant, cycle counts follow frequency scaling");
            None
        };
        if let Some(hz) = frequency {
            log::debug!("TSC: {} MHz from CPUID", hz / 1_000_000);
        }
        Self { frequency }
    }
}

impl Default for Tsc {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleCounter for Tsc {
    #[inline]
    fn width(&self) -> u32 {
        64
    }

    #[inline]
    fn read(&self) -> u64 {
        read_fenced()
    }

    #[inline]
    fn reset(&self) {}

    fn nominal_frequency(&self) -> Option<u64> {
        self.frequency
    }
}
