//! # x86_64
//!
//! The TSC is the cycle source (see [`tsc`]). The stack probe reads `RSP`
//! and interrupt masking goes through `RFLAGS.IF`.
//!
//! There is no architectural millisecond tick: boards hand one in (PIT,
//! HPET or the APIC timer interrupt count).

pub mod tsc;

use core::arch::asm;

use crate::{InterruptControl, StackProbe};

pub use tsc::Tsc;

/// RFLAGS.IF
const RFLAGS_IF: u64 = 1 << 9;

/// Read the stack pointer
#[inline(always)]
pub fn read_rsp() -> usize {
    let value: u64;
    unsafe {
        asm!("mov {}, rsp", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value as usize
}

/// Read RFLAGS
#[inline]
pub fn read_rflags() -> u64 {
    let value: u64;
    unsafe {
        asm!("pushfq", "pop {}", out(reg) value, options(nomem, preserves_flags));
    }
    value
}

/// Stack probe reading RSP
///
/// The System V ABI reserves 128 bytes below RSP for leaf functions, so the
/// stack region handed to the monitor should keep a guard of at least that.
#[derive(Debug, Default)]
pub struct RspProbe;

impl StackProbe for RspProbe {
    #[inline(always)]
    fn stack_pointer(&self) -> usize {
        read_rsp()
    }
}

/// IRQ masking through RFLAGS.IF
#[derive(Debug)]
pub struct Rflags {
    _private: (),
}

impl Rflags {
    /// Create the controller
    ///
    /// # Safety
    ///
    /// `cli`/`sti` fault outside ring 0 (unless IOPL allows them).
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl InterruptControl for Rflags {
    #[inline]
    fn disable(&self) -> usize {
        let state = read_rflags() & RFLAGS_IF;
        unsafe {
            asm!("cli", options(nomem, nostack));
        }
        state as usize
    }

    #[inline]
    fn restore(&self, state: usize) {
        if state as u64 & RFLAGS_IF != 0 {
            unsafe {
                asm!("sti", options(nomem, nostack));
            }
        }
    }
}
