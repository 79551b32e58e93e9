//! # AArch64
//!
//! The generic timer's virtual count (`CNTVCT_EL0`) is the cycle source:
//! 64 bits wide, readable from EL0, never reset. `CNTFRQ_EL0` turns it into
//! the coarse millisecond tick as well.
//!
//! The stack probe checks `SPSel`: at EL1 the monitored stack is `SP_EL1`
//! (`SPSel == 1`).

use core::arch::asm;

use crate::{CycleCounter, InterruptControl, StackProbe, TickSource};

/// DAIF.I (IRQ mask)
const DAIF_I: u64 = 1 << 7;

// =============================================================================
// Register Access
// =============================================================================

/// Read the virtual counter
#[inline]
pub fn read_cntvct() -> u64 {
    let value: u64;
    unsafe {
        asm!("isb", "mrs {}, CNTVCT_EL0", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

/// Read the counter frequency
#[inline]
pub fn read_cntfrq() -> u64 {
    let value: u64;
    unsafe {
        asm!("mrs {}, CNTFRQ_EL0", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

/// Read the stack pointer
#[inline(always)]
pub fn read_sp() -> usize {
    let value: u64;
    unsafe {
        asm!("mov {}, sp", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value as usize
}

/// Read SPSel (stack pointer selection)
#[inline]
pub fn read_spsel() -> u64 {
    let value: u64;
    unsafe {
        asm!("mrs {}, SPSel", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

// =============================================================================
// Generic Counter
// =============================================================================

/// `CNTVCT_EL0` as a cycle counter
#[derive(Debug, Default)]
pub struct GenericCounter;

impl CycleCounter for GenericCounter {
    #[inline]
    fn width(&self) -> u32 {
        64
    }

    #[inline]
    fn read(&self) -> u64 {
        read_cntvct()
    }

    #[inline]
    fn reset(&self) {}

    fn nominal_frequency(&self) -> Option<u64> {
        Some(read_cntfrq()).filter(|&hz| hz != 0)
    }
}

/// Millisecond tick derived from the generic timer
#[derive(Debug)]
pub struct GenericTicks {
    frequency: u64,
}

impl GenericTicks {
    /// Capture `CNTFRQ_EL0` once
    pub fn new() -> Self {
        Self {
            frequency: read_cntfrq(),
        }
    }

    /// Counter frequency in Hz
    pub fn frequency(&self) -> u64 {
        self.frequency
    }
}

impl TickSource for GenericTicks {
    fn millis(&self) -> u32 {
        if self.frequency == 0 {
            return 0;
        }
        ((read_cntvct() as u128 * 1_000) / self.frequency as u128) as u32
    }
}

// =============================================================================
// Stack Probe
// =============================================================================

/// Stack probe for code running at EL1
#[derive(Debug)]
pub struct El1Stack {
    _private: (),
}

impl El1Stack {
    /// Create the probe
    ///
    /// # Safety
    ///
    /// Reading `SPSel` traps below EL1; the caller must run at EL1 or above.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl StackProbe for El1Stack {
    #[inline(always)]
    fn stack_pointer(&self) -> usize {
        read_sp()
    }

    fn on_monitored_stack(&self) -> bool {
        read_spsel() & 1 == 1
    }
}

// =============================================================================
// DAIF
// =============================================================================

/// IRQ masking through DAIF
#[derive(Debug)]
pub struct Daif {
    _private: (),
}

impl Daif {
    /// Create the controller
    ///
    /// # Safety
    ///
    /// DAIF writes from EL0 are only legal when `SCTLR_EL1.UMA` is set.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl InterruptControl for Daif {
    #[inline]
    fn disable(&self) -> usize {
        let state: u64;
        unsafe {
            asm!("mrs {}, DAIF", out(reg) state, options(nomem, nostack, preserves_flags));
            asm!("msr DAIFSet, #2", options(nomem, nostack, preserves_flags));
        }
        (state & DAIF_I) as usize
    }

    #[inline]
    fn restore(&self, state: usize) {
        if state as u64 & DAIF_I == 0 {
            unsafe {
                asm!("msr DAIFClr, #2", options(nomem, nostack, preserves_flags));
            }
        }
    }
}
