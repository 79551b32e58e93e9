//! # Error Handling
//!
//! Every failure the measurement core can surface is a [`PerfError`]: a
//! [`ErrorKind`] classification, a static message, and optionally the
//! `{type, code}` pair the workload engine reported.
//!
//! ## Error Categories
//!
//! | Category      | Range   | Fatal | Effect                                       |
//! |---------------|---------|-------|----------------------------------------------|
//! | Setup         | 0-99    | yes   | Test aborted, workload destroyed             |
//! | Execution     | 100-199 | yes   | Loop aborted, completed runs still reported  |
//! | Resource      | 200-299 | no    | Observation skipped, warning                 |
//! | Inconsistency | 300-399 | no    | Result marked `NotCalculated` / ledger flag  |
//! | Overflow      | 400-499 | no    | Stack reported as `Overflow`                 |
//! | Clock         | 500-599 | yes   | No usable time base                          |

use core::fmt;

// =============================================================================
// WORKLOAD ERROR
// =============================================================================

/// Error type reported by the workload engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WorkloadErrorKind {
    /// No error
    None                = 0x00,
    /// Runtime and generated code disagree on the API
    ToolPlatformMismatch = 0x01,
    /// Type mismatch in the generated tensors
    TypesMismatch       = 0x02,
    /// Invalid handle
    InvalidHandle       = 0x10,
    /// Invalid state
    InvalidState        = 0x11,
    /// Invalid input buffer
    InvalidInput        = 0x12,
    /// Invalid output buffer
    InvalidOutput       = 0x13,
    /// Invalid parameter
    InvalidParam        = 0x14,
    /// Invalid signature
    InvalidSignature    = 0x15,
    /// Invalid size
    InvalidSize         = 0x16,
    /// Invalid value
    InvalidValue        = 0x17,
    /// Initialization failed
    InitFailed          = 0x30,
    /// Allocation failed
    AllocationFailed    = 0x31,
    /// Deallocation failed
    DeallocationFailed  = 0x32,
    /// Creation failed
    CreateFailed        = 0x33,
}

/// Engine error: `{type, code}` as reported by `last_error()`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkloadError {
    /// Error type
    pub kind: WorkloadErrorKind,
    /// Engine specific code
    pub code: u32,
}

impl WorkloadError {
    /// The "no error" value
    pub const NONE: Self = Self {
        kind: WorkloadErrorKind::None,
        code: 0,
    };

    /// Create an engine error
    pub const fn new(kind: WorkloadErrorKind, code: u32) -> Self {
        Self { kind, code }
    }

    /// Whether this carries an actual error
    pub const fn is_error(&self) -> bool {
        !matches!(self.kind, WorkloadErrorKind::None)
    }
}

impl fmt::Display for WorkloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type=0x{:02x} code=0x{:02x}", self.kind as u8, self.code)
    }
}

// =============================================================================
// ERROR KIND
// =============================================================================

/// Classification of measurement errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorKind {
    // -------------------------------------------------------------------------
    // Setup Errors (0-99)
    // -------------------------------------------------------------------------
    /// No network with that name or index
    NetworkNotFound     = 0,
    /// Workload creation failed
    CreateFailed        = 1,
    /// Workload initialization failed
    InitFailed          = 2,
    /// Workload did not report its description
    InfoUnavailable     = 3,
    /// Input/output description is incoherent
    IoMismatch          = 4,
    /// Batch sizes other than one
    BatchUnsupported    = 5,
    /// Invalid runtime configuration
    InvalidConfig       = 6,
    /// I/O buffers could not be allocated
    BufferAllocation    = 7,
    /// Workload refused to be destroyed
    DestroyFailed       = 8,

    // -------------------------------------------------------------------------
    // Execution Errors (100-199)
    // -------------------------------------------------------------------------
    /// Workload run failed mid-loop
    RunFailed           = 100,

    // -------------------------------------------------------------------------
    // Resource Errors (200-299)
    // -------------------------------------------------------------------------
    /// Node table allocation failed
    NodeTableAllocation = 200,
    /// Workload refused observer registration
    ObserverRejected    = 201,

    // -------------------------------------------------------------------------
    // Inconsistency Errors (300-399)
    // -------------------------------------------------------------------------
    /// Stack pointer differs between arm and measure
    StackPointerMismatch = 300,
    /// Allocator trailer found corrupted on free
    HeapCorruption      = 301,

    // -------------------------------------------------------------------------
    // Overflow Errors (400-499)
    // -------------------------------------------------------------------------
    /// Stack sentinel exhausted
    StackOverflow       = 400,

    // -------------------------------------------------------------------------
    // Clock Errors (500-599)
    // -------------------------------------------------------------------------
    /// Counter calibration produced no usable frequency
    CalibrationFailed   = 500,
}

impl ErrorKind {
    /// Get the error category name
    pub const fn category(&self) -> &'static str {
        match *self as u32 {
            0..=99 => "Setup",
            100..=199 => "Execution",
            200..=299 => "Resource",
            300..=399 => "Inconsistency",
            400..=499 => "Overflow",
            500..=599 => "Clock",
            _ => "Unknown",
        }
    }

    /// Whether the error stops the test
    pub const fn is_fatal(&self) -> bool {
        matches!(*self as u32, 0..=199 | 500..=599)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// =============================================================================
// PERF ERROR
// =============================================================================

/// Measurement error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerfError {
    kind: ErrorKind,
    message: &'static str,
    code: Option<WorkloadError>,
}

impl PerfError {
    /// Create a new error
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self {
            kind,
            message,
            code: None,
        }
    }

    /// Attach the engine's error pair
    pub const fn with_code(mut self, code: WorkloadError) -> Self {
        self.code = Some(code);
        self
    }

    /// Error classification
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable message
    pub const fn message(&self) -> &'static str {
        self.message
    }

    /// Engine error pair, if any
    pub const fn code(&self) -> Option<WorkloadError> {
        self.code
    }

    /// Whether the error stops the test
    pub const fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}

impl fmt::Display for PerfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.category(), self.message)?;
        if let Some(code) = self.code {
            write!(f, " ({})", code)?;
        }
        Ok(())
    }
}

impl From<ErrorKind> for PerfError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind, "measurement error")
    }
}

/// Result type for measurement operations
pub type PerfResult<T> = Result<T, PerfError>;
