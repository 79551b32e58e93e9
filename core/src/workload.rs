//! # Workload Contract
//!
//! The measured workload is a black box (typically a generated neural
//! network and its runtime). The core only needs this surface:
//!
//! ```text
//! ┌───────────────────┐  find / create   ┌────────────────────────────┐
//! │ WorkloadProvider  │ ───────────────▶ │ Workload                   │
//! └───────────────────┘                  │  init / info / destroy     │
//!                                        │  run(inputs, outputs, ──┐  │
//!                                        │      listener)          │  │
//!                                        │  register_observer      │  │
//!                                        │  unit(index)            │  │
//!                                        └─────────────────────────┼──┘
//!                                                                  │
//!                         PRE / POST per unit, synchronous         ▼
//!                                                    ┌──────────────────────┐
//!                                                    │ UnitListener         │
//!                                                    └──────────────────────┘
//! ```

use core::fmt;

use bitflags::bitflags;

use crate::error::WorkloadError;

/// Maximum number of inputs or outputs per workload
pub const MAX_IO: usize = 8;

/// Maximum workload name length
pub const MAX_NAME: usize = 32;

/// Unit kind bit marking a time-distributed unit
pub const UNIT_TIME_DISTRIBUTED: u16 = 0x8000;

// =============================================================================
// Events
// =============================================================================

bitflags! {
    /// Observer event tags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventFlags: u32 {
        /// Observer initialized
        const INIT  = 0x01;
        /// Before a unit executes
        const PRE   = 0x02;
        /// After a unit executes
        const POST  = 0x04;
        /// First unit of a run
        const FIRST = 0x08;
        /// Last unit of a run
        const LAST  = 0x10;
    }
}

/// Execution unit descriptor as reported by the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitDescriptor {
    /// Position in the execution order
    pub index: u16,
    /// Engine unit type; bit 15 marks time-distributed units
    pub kind: u16,
    /// Engine unit identifier
    pub id: u16,
}

impl UnitDescriptor {
    /// Create a descriptor
    pub const fn new(index: u16, kind: u16, id: u16) -> Self {
        Self { index, kind, id }
    }

    /// Type tag without the time-distributed bit
    pub const fn type_tag(&self) -> u16 {
        self.kind & !UNIT_TIME_DISTRIBUTED
    }

    /// Whether the unit is time-distributed
    pub const fn is_time_distributed(&self) -> bool {
        self.kind & UNIT_TIME_DISTRIBUTED != 0
    }
}

/// Receives unit events during a run
pub trait UnitListener {
    /// Called before and after each unit
    fn on_event(&mut self, flags: EventFlags, unit: &UnitDescriptor) -> u32;
}

// =============================================================================
// Tensor Description
// =============================================================================

/// Element encoding
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DataFormat {
    /// IEEE float
    Float {
        /// Width in bits
        bits: u8,
    },
    /// Qm.n fixed point
    Fixed {
        /// Width in bits
        bits: u8,
        /// Two's complement
        signed: bool,
        /// Fractional bits
        frac_bits: u8,
    },
    /// Affine integer quantization: `real = scale * (q - zero_point)`
    Quantized {
        /// Width in bits
        bits: u8,
        /// Two's complement
        signed: bool,
        /// Scale
        scale: f32,
        /// Zero point
        zero_point: i32,
    },
}

impl DataFormat {
    /// 32-bit float
    pub const F32: Self = Self::Float { bits: 32 };

    /// Bit width of one element
    pub const fn bits(&self) -> u8 {
        match *self {
            Self::Float { bits } | Self::Fixed { bits, .. } | Self::Quantized { bits, .. } => bits,
        }
    }

    /// Bytes per element
    pub const fn element_size(&self) -> usize {
        (self.bits() as usize).div_ceil(8)
    }

    /// Whether inputs of this format can be synthesized
    ///
    /// Floats are limited to binary16/32/64.
    pub const fn is_synthesizable(&self) -> bool {
        match *self {
            Self::Float { bits } => matches!(bits, 16 | 32 | 64),
            Self::Fixed { bits, .. } | Self::Quantized { bits, .. } => bits >= 1 && bits <= 64,
        }
    }
}

/// Tensor shape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Shape {
    /// Height
    pub height: u32,
    /// Width
    pub width: u32,
    /// Channels
    pub channels: u32,
}

impl Shape {
    /// Create a shape
    pub const fn new(height: u32, width: u32, channels: u32) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Number of elements
    pub const fn elements(&self) -> usize {
        self.height as usize * self.width as usize * self.channels as usize
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.height, self.width, self.channels)
    }
}

/// Input or output tensor description
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IoSpec {
    /// Element encoding
    pub format: DataFormat,
    /// Shape
    pub shape: Shape,
    /// Element count
    pub elements: usize,
    /// Buffer size in bytes
    pub byte_size: usize,
    /// Batch count
    pub batches: u32,
}

impl IoSpec {
    /// Describe a single-batch tensor
    pub const fn new(format: DataFormat, shape: Shape) -> Self {
        let elements = shape.elements();
        Self {
            format,
            shape,
            elements,
            byte_size: elements * format.element_size(),
            batches: 1,
        }
    }

    /// Set the batch count
    pub const fn with_batches(mut self, batches: u32) -> Self {
        self.batches = batches;
        self
    }
}

// =============================================================================
// Workload Description
// =============================================================================

/// Three-part version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    /// Major
    pub major: u8,
    /// Minor
    pub minor: u8,
    /// Micro
    pub micro: u8,
}

impl Version {
    /// Create a version
    pub const fn new(major: u8, minor: u8, micro: u8) -> Self {
        Self {
            major,
            minor,
            micro,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
    }
}

/// Static description of a workload
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadInfo {
    /// Network name
    pub name: heapless::String<MAX_NAME>,
    /// Number of execution units
    pub unit_count: u16,
    /// Operations per run (MACC)
    pub op_count: u64,
    /// Input tensors
    pub inputs: heapless::Vec<IoSpec, MAX_IO>,
    /// Output tensors
    pub outputs: heapless::Vec<IoSpec, MAX_IO>,
    /// Activation buffer size in bytes
    pub activations_size: usize,
    /// Weight size in bytes
    pub weights_size: usize,
    /// Runtime library version
    pub runtime_version: Version,
    /// Code generator version
    pub tool_version: Version,
}

// =============================================================================
// Workload Traits
// =============================================================================

/// A created workload instance
pub trait Workload {
    /// Bind the activation region; `false` on failure (see `last_error`)
    fn init(&mut self, activations: &mut [u8]) -> bool;

    /// Static description, `None` if the engine cannot report it
    fn info(&self) -> Option<WorkloadInfo>;

    /// Last error raised by the engine
    fn last_error(&self) -> WorkloadError;

    /// Execute once; returns the number of processed batches
    fn run(
        &mut self,
        inputs: &[&[u8]],
        outputs: &mut [&mut [u8]],
        listener: Option<&mut dyn UnitListener>,
    ) -> Result<u32, WorkloadError>;

    /// Ask the engine to emit the events in `mask` on subsequent runs
    fn register_observer(&mut self, mask: EventFlags) -> bool;

    /// Stop emitting events
    fn unregister_observer(&mut self);

    /// Descriptor of unit `index`
    fn unit(&self, index: u16) -> Option<UnitDescriptor>;

    /// Release engine resources
    fn destroy(&mut self) -> bool;
}

/// Source of named workloads (networks embedded in the image)
pub trait WorkloadProvider {
    /// Workload type created by this provider
    type Workload: Workload;

    /// Name of the `index`-th workload
    fn find(&self, index: usize) -> Option<&str>;

    /// Create the named workload
    fn create(&mut self, name: &str) -> Result<Self::Workload, WorkloadError>;
}
