//! # aiperf Measurement Core
//!
//! Characterizes a compute workload (typically a generated neural network)
//! on a small processor: per-run latency at cycle precision, peak stack,
//! allocator pressure and a per-unit time breakdown.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           PerfRunner                                  │
//! │  inputs ─▶ [ start_window ─ workload.run ─ end_window ] ─▶ stats      │
//! └───┬──────────────┬────────────────┬────────────────┬─────────────────┘
//!     │              │                │                │
//! ┌───▼──────┐ ┌─────▼────────┐ ┌─────▼────────┐ ┌─────▼──────────────┐
//! │CycleClock│ │ StackMonitor │ │TrackingAlloc │ │ NodeTimingObserver │
//! │ overflow │ │ fill/inspect │ │ header/trail │ │ PRE/POST listener  │
//! └───┬──────┘ └─────┬────────┘ └──────────────┘ └────────────────────┘
//!     │              │
//!     └──────┬───────┘
//!            ▼
//!        aiperf-hal
//! ```
//!
//! ## Components
//!
//! - **Cycle Timer** ([`clock`]): calibrated counter with wrap correction
//! - **Stack Watermark Monitor** ([`stack`]): peak stack usage of a window
//! - **Allocator Accounting Interceptor** ([`heap`]): `GlobalAlloc` wrapper
//! - **Node Timing Observer** ([`observer`]): per-unit kernel time
//! - **Run Aggregator** ([`runner`]): drives the test, builds the report
//!
//! Everything is an owned object with an explicit arm/disarm lifecycle;
//! nothing is process-global except the allocator the board installs.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod clock;
pub mod config;
pub mod error;
pub mod heap;
pub mod input;
pub mod observer;
pub mod report;
pub mod runner;
pub mod session;
pub mod stack;
pub mod workload;

#[cfg(test)]
mod mock;

pub use clock::{CycleClock, CycleTime};
pub use config::PerfConfig;
pub use error::{ErrorKind, PerfError, PerfResult, WorkloadError, WorkloadErrorKind};
pub use heap::{AllocationLedger, AllocationTracker, TrackingAllocator};
pub use observer::{NodeTimingObserver, NodeTimingReport};
pub use report::{PerfReport, Warnings};
pub use runner::PerfRunner;
pub use session::Session;
pub use stack::{StackMonitor, StackRegion, StackUsage};
pub use workload::{Workload, WorkloadInfo, WorkloadProvider};

use workload::Version;

/// Version reported in the banner
pub const VERSION: Version = Version::new(5, 0, 0);
