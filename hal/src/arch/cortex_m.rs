//! # Cortex-M (ARMv7-M / ARMv8-M Mainline)
//!
//! The Data Watchpoint and Trace unit carries a 32-bit cycle counter
//! (`DWT_CYCCNT`) clocked by the core clock. It wraps silently.
//!
//! ```text
//!  DEMCR  0xE000_EDFC   TRCENA (bit 24) powers the DWT/ITM blocks
//!  CTRL   0xE000_1000   CYCCNTENA (bit 0), CPIEVTENA (bit 17)
//!  CYCCNT 0xE000_1004   free-running cycle counter
//!  LAR    0xE000_1FB0   lock access register (Cortex-M7)
//! ```
//!
//! The stack probe reads `MSP` and checks `CONTROL.SPSEL`: when a thread
//! runs on `PSP` the main stack cannot be watermarked from here.

use core::arch::asm;
use core::ptr::{read_volatile, write_volatile};

use spin::Once;

use crate::{CycleCounter, InterruptControl, StackProbe};

// =============================================================================
// Registers
// =============================================================================

const DEMCR: *mut u32 = 0xE000_EDFC as *mut u32;
const DWT_CTRL: *mut u32 = 0xE000_1000 as *mut u32;
const DWT_CYCCNT: *mut u32 = 0xE000_1004 as *mut u32;
#[cfg(feature = "dwt-lar")]
const DWT_LAR: *mut u32 = 0xE000_1FB0 as *mut u32;

const DEMCR_TRCENA: u32 = 1 << 24;
const DWT_CTRL_CYCCNTENA: u32 = 1 << 0;
const DWT_CTRL_CPIEVTENA: u32 = 1 << 17;
#[cfg(feature = "dwt-lar")]
const DWT_LAR_KEY: u32 = 0xC5AC_CE55;

/// CONTROL.SPSEL: 1 = thread mode uses PSP
const CONTROL_SPSEL: u32 = 1 << 1;

static DWT_ENABLED: Once<()> = Once::new();

// =============================================================================
// DWT Cycle Counter
// =============================================================================

/// DWT cycle counter
#[derive(Debug)]
pub struct Dwt {
    _private: (),
}

impl Dwt {
    /// Enable the trace block and start the cycle counter
    ///
    /// Enabling happens once; later calls hand out another accessor.
    ///
    /// # Safety
    ///
    /// The core must implement the DWT (not present on Cortex-M0/M0+).
    pub unsafe fn take() -> Self {
        DWT_ENABLED.call_once(|| {
            // SAFETY: fixed System Control Space addresses, caller guarantees DWT presence
            unsafe {
                write_volatile(DEMCR, read_volatile(DEMCR) | DEMCR_TRCENA);
                #[cfg(feature = "dwt-lar")]
                write_volatile(DWT_LAR, DWT_LAR_KEY);
                write_volatile(DWT_CYCCNT, 0);
                write_volatile(
                    DWT_CTRL,
                    read_volatile(DWT_CTRL) | DWT_CTRL_CYCCNTENA | DWT_CTRL_CPIEVTENA,
                );
            }
            log::debug!("DWT: cycle counter enabled");
        });
        Self { _private: () }
    }
}

impl CycleCounter for Dwt {
    #[inline]
    fn width(&self) -> u32 {
        32
    }

    #[inline]
    fn read(&self) -> u64 {
        // SAFETY: DWT enabled in `take`
        unsafe { read_volatile(DWT_CYCCNT) as u64 }
    }

    #[inline]
    fn reset(&self) {
        // SAFETY: DWT enabled in `take`
        unsafe { write_volatile(DWT_CYCCNT, 0) }
    }
}

// =============================================================================
// Main Stack Probe
// =============================================================================

/// Reads MSP and CONTROL
#[derive(Debug, Default)]
pub struct MainStack;

/// Read the main stack pointer
#[inline(always)]
pub fn read_msp() -> usize {
    let value: u32;
    unsafe {
        asm!("mrs {}, MSP", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value as usize
}

/// Read the CONTROL register
#[inline(always)]
pub fn read_control() -> u32 {
    let value: u32;
    unsafe {
        asm!("mrs {}, CONTROL", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

impl StackProbe for MainStack {
    #[inline(always)]
    fn stack_pointer(&self) -> usize {
        read_msp()
    }

    fn on_monitored_stack(&self) -> bool {
        read_control() & CONTROL_SPSEL == 0
    }
}

// =============================================================================
// PRIMASK
// =============================================================================

/// Interrupt masking through PRIMASK
#[derive(Debug, Default)]
pub struct Primask;

impl InterruptControl for Primask {
    #[inline]
    fn disable(&self) -> usize {
        let state: u32;
        unsafe {
            asm!("mrs {}, PRIMASK", out(reg) state, options(nomem, nostack, preserves_flags));
            asm!("cpsid i", options(nomem, nostack, preserves_flags));
        }
        state as usize
    }

    #[inline]
    fn restore(&self, state: usize) {
        unsafe {
            asm!("msr PRIMASK, {}", in(reg) state as u32, options(nomem, nostack, preserves_flags));
        }
    }
}
