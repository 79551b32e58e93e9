//! # RISC-V 64
//!
//! `rdcycle` reads the user-visible `cycle` CSR (64-bit, read-only). The
//! `mtime`-backed tick is board specific and supplied by the caller.

use core::arch::asm;

use crate::{CycleCounter, InterruptControl, StackProbe};

/// sstatus.SIE
const SSTATUS_SIE: usize = 1 << 1;

/// Read the cycle CSR
#[inline]
pub fn read_cycle() -> u64 {
    let value: u64;
    unsafe {
        asm!("rdcycle {}", out(reg) value, options(nomem, nostack));
    }
    value
}

/// Read the stack pointer
#[inline(always)]
pub fn read_sp() -> usize {
    let value: usize;
    unsafe {
        asm!("mv {}, sp", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

/// `cycle` CSR as a cycle counter
#[derive(Debug, Default)]
pub struct CycleCsr;

impl CycleCounter for CycleCsr {
    #[inline]
    fn width(&self) -> u32 {
        64
    }

    #[inline]
    fn read(&self) -> u64 {
        read_cycle()
    }

    #[inline]
    fn reset(&self) {}
}

/// Stack probe reading `sp`
#[derive(Debug, Default)]
pub struct SpProbe;

impl StackProbe for SpProbe {
    #[inline(always)]
    fn stack_pointer(&self) -> usize {
        read_sp()
    }
}

/// Supervisor interrupt masking through sstatus.SIE
#[derive(Debug)]
pub struct Sstatus {
    _private: (),
}

impl Sstatus {
    /// Create the controller
    ///
    /// # Safety
    ///
    /// `sstatus` is only accessible in S-mode or above.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl InterruptControl for Sstatus {
    #[inline]
    fn disable(&self) -> usize {
        let prev: usize;
        unsafe {
            asm!("csrrci {}, sstatus, 2", out(reg) prev, options(nomem, nostack));
        }
        prev & SSTATUS_SIE
    }

    #[inline]
    fn restore(&self, state: usize) {
        if state & SSTATUS_SIE != 0 {
            unsafe {
                asm!("csrsi sstatus, 2", options(nomem, nostack));
            }
        }
    }
}
