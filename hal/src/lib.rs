//! # aiperf Hardware Abstraction Layer
//!
//! The measurement core never touches a register directly. Everything it
//! needs from the silicon goes through four small seams:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        aiperf-core                                │
//! │   CycleClock     StackMonitor     NodeTimingObserver   Runner     │
//! └──────┬───────────────┬──────────────────┬────────────────┬───────┘
//!        │               │                  │                │
//! ┌──────▼──────┐ ┌──────▼──────┐   ┌───────▼──────┐ ┌───────▼────────┐
//! │CycleCounter │ │ StackProbe  │   │ CycleCounter │ │InterruptControl│
//! │ TickSource  │ │             │   │              │ │   (IrqGuard)   │
//! └──────┬──────┘ └──────┬──────┘   └───────┬──────┘ └───────┬────────┘
//!        └───────────────┴─────────┬────────┴────────────────┘
//!                                  ▼
//!        arch::{cortex_m, aarch64, x86_64, riscv64}
//! ```
//!
//! ## Counters
//!
//! | Target    | Counter        | Width  | Reset | Coarse tick          |
//! |-----------|----------------|--------|-------|----------------------|
//! | Cortex-M  | DWT `CYCCNT`   | 32-bit | yes   | board SysTick        |
//! | AArch64   | `CNTVCT_EL0`   | 64-bit | no    | `CNTVCT / CNTFRQ`    |
//! | x86_64    | TSC            | 64-bit | no    | board (PIT/HPET)     |
//! | RISC-V 64 | `cycle` CSR    | 64-bit | no    | board (`mtime`)      |
//!
//! A 32-bit `CYCCNT` at 480 MHz wraps after ~8.9 s, which is why the core
//! cross-checks every window against a millisecond tick.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod arch;
pub mod irq;

pub use irq::IrqGuard;

// =============================================================================
// Cycle Counter
// =============================================================================

/// A free-running hardware cycle counter
///
/// Reads take `&self`: counters are memory-mapped or system registers, so
/// there is no Rust-visible state to mutate.
pub trait CycleCounter {
    /// Counter width in bits
    fn width(&self) -> u32 {
        32
    }

    /// Read the raw counter value
    fn read(&self) -> u64;

    /// Reset the counter to zero (no-op on counters that cannot be written)
    fn reset(&self);

    /// Mask covering the counter width
    #[inline]
    fn mask(&self) -> u64 {
        let width = self.width();
        if width >= 64 {
            u64::MAX
        } else {
            (1u64 << width) - 1
        }
    }

    /// Number of cycles in one full wrap of the counter
    ///
    /// `None` for 64-bit counters, whose wrap span does not fit in a `u64`.
    #[inline]
    fn wrap_span(&self) -> Option<u64> {
        let width = self.width();
        if width >= 64 {
            None
        } else {
            Some(1u64 << width)
        }
    }

    /// Cycles elapsed from `start` to `end`, modulo the counter width
    #[inline]
    fn elapsed(&self, start: u64, end: u64) -> u64 {
        end.wrapping_sub(start) & self.mask()
    }

    /// Rate advertised by the hardware, in Hz
    ///
    /// `None` when the counter has to be calibrated against a tick.
    fn nominal_frequency(&self) -> Option<u64> {
        None
    }
}

impl<T: CycleCounter + ?Sized> CycleCounter for &T {
    #[inline]
    fn width(&self) -> u32 {
        (**self).width()
    }

    #[inline]
    fn read(&self) -> u64 {
        (**self).read()
    }

    #[inline]
    fn reset(&self) {
        (**self).reset()
    }

    fn nominal_frequency(&self) -> Option<u64> {
        (**self).nominal_frequency()
    }
}

// =============================================================================
// Coarse Tick
// =============================================================================

/// A coarse millisecond reference tick
///
/// Usually driven by the SysTick interrupt. The value wraps at `u32::MAX`.
pub trait TickSource {
    /// Milliseconds since an arbitrary origin
    fn millis(&self) -> u32;

    /// Milliseconds elapsed since `start`
    #[inline]
    fn millis_since(&self, start: u32) -> u32 {
        self.millis().wrapping_sub(start)
    }
}

impl<T: TickSource + ?Sized> TickSource for &T {
    #[inline]
    fn millis(&self) -> u32 {
        (**self).millis()
    }
}

// =============================================================================
// Stack Probe
// =============================================================================

/// Access to the live stack pointer
pub trait StackProbe {
    /// Current stack pointer
    fn stack_pointer(&self) -> usize;

    /// Whether the stack being executed on is the monitored one
    ///
    /// On Cortex-M this is `CONTROL.SPSEL == 0` (running on MSP).
    fn on_monitored_stack(&self) -> bool {
        true
    }
}

// =============================================================================
// Interrupt Control
// =============================================================================

/// Global interrupt masking
pub trait InterruptControl {
    /// Mask interrupts and return the previous mask state
    fn disable(&self) -> usize;

    /// Restore a mask state returned by [`disable`](Self::disable)
    fn restore(&self, state: usize);
}
