//! Keys shared by the dispatch table, the capability matrix and the kernels.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Element data type of an operand.
///
/// `None` marks a kernel-mode slot the operation does not use (for example the
/// weight slot of a copy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DataType {
    None,
    Int8,
    Int16,
    Int32,
    UInt8,
    UInt16,
    UInt32,
    /// Int32 bias paired with a per-row weight multiplier.
    CompoundBias,
    /// Piecewise-linear activation segment.
    PwlSegment,
}

impl DataType {
    /// Size in bytes of one element.
    pub const fn size(self) -> usize {
        match self {
            DataType::None => 0,
            DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Int32 | DataType::UInt32 => 4,
            DataType::CompoundBias | DataType::PwlSegment => 8,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            DataType::None => "none",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::UInt8 => "uint8",
            DataType::UInt16 => "uint16",
            DataType::UInt32 => "uint32",
            DataType::CompoundBias => "compound_bias",
            DataType::PwlSegment => "pwl_segment",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Data-type tuple selecting one typed variant of a kernel.
///
/// Ordering is lexicographic over the fields in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KernelMode {
    pub input: DataType,
    pub weight: DataType,
    pub bias: DataType,
    pub output: DataType,
    pub activation_disabled: bool,
}

impl KernelMode {
    pub const fn new(
        input: DataType,
        weight: DataType,
        bias: DataType,
        output: DataType,
        activation_disabled: bool,
    ) -> Self {
        Self {
            input,
            weight,
            bias,
            output,
            activation_disabled,
        }
    }

    /// Mode of operations that only move data (copy, transposition).
    pub const fn data_movement(element: DataType) -> Self {
        Self::new(element, DataType::None, DataType::None, element, true)
    }
}

impl fmt::Display for KernelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {}{})",
            self.input,
            self.weight,
            self.bias,
            self.output,
            if self.activation_disabled { ", no activation" } else { "" }
        )
    }
}

/// Kind of a model operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    FullyConnectedAffine,
    /// Diagonal affine: one weight per output row.
    ElementWiseAffine,
    Copy,
    Transposition,
    /// One-dimensional convolution with optional fused pooling.
    Convolution,
    /// Gaussian-mixture scoring.
    Gmm,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        OperationKind::FullyConnectedAffine,
        OperationKind::ElementWiseAffine,
        OperationKind::Copy,
        OperationKind::Transposition,
        OperationKind::Convolution,
        OperationKind::Gmm,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            OperationKind::FullyConnectedAffine => "fully_connected_affine",
            OperationKind::ElementWiseAffine => "element_wise_affine",
            OperationKind::Copy => "copy",
            OperationKind::Transposition => "transposition",
            OperationKind::Convolution => "convolution",
            OperationKind::Gmm => "gmm",
        }
    }

    /// Whether a request may restrict the computed outputs with an active list.
    pub const fn supports_active_list(self) -> bool {
        matches!(
            self,
            OperationKind::FullyConnectedAffine | OperationKind::Gmm
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Selectable compute strategy for a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccelerationMode {
    /// Best mode available on this CPU.
    Auto,
    /// Best software mode; identical to `Auto` on a software-only device.
    Software,
    Generic,
    Sse4,
    Avx1,
    Avx2,
}

impl AccelerationMode {
    /// Concrete modes in the order `Auto` prefers them.
    pub const PREFERENCE: [AccelerationMode; 4] = [
        AccelerationMode::Avx2,
        AccelerationMode::Avx1,
        AccelerationMode::Sse4,
        AccelerationMode::Generic,
    ];

    /// True for modes that name a kernel variant rather than a selection policy.
    pub const fn is_concrete(self) -> bool {
        !matches!(self, AccelerationMode::Auto | AccelerationMode::Software)
    }

    pub const fn name(self) -> &'static str {
        match self {
            AccelerationMode::Auto => "auto",
            AccelerationMode::Software => "software",
            AccelerationMode::Generic => "generic",
            AccelerationMode::Sse4 => "sse4",
            AccelerationMode::Avx1 => "avx1",
            AccelerationMode::Avx2 => "avx2",
        }
    }
}

impl fmt::Display for AccelerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AccelerationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(AccelerationMode::Auto),
            "software" | "sw" => Ok(AccelerationMode::Software),
            "generic" => Ok(AccelerationMode::Generic),
            "sse4" | "sse4_2" | "sse4.2" => Ok(AccelerationMode::Sse4),
            "avx1" | "avx" => Ok(AccelerationMode::Avx1),
            "avx2" => Ok(AccelerationMode::Avx2),
            other => Err(format!("unknown acceleration mode '{other}'")),
        }
    }
}

/// Int32 bias with a per-row multiplier applied to int8 weights.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CompoundBias {
    pub bias: i32,
    pub multiplier: u8,
    pub reserved: [u8; 3],
}

impl CompoundBias {
    pub const fn new(bias: i32, multiplier: u8) -> Self {
        Self {
            bias,
            multiplier,
            reserved: [0; 3],
        }
    }
}

/// One segment of a piecewise-linear activation.
///
/// The two least significant bits of `x_base` select the slope scale: the
/// product `(x - base) * slope` is shifted right by `8 * (x_base & 3)` bits.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PwlSegment {
    pub x_base: i32,
    pub y_base: i16,
    pub slope: i16,
}

impl PwlSegment {
    pub const fn new(x_base: i32, y_base: i16, slope: i16) -> Self {
        Self { x_base, y_base, slope }
    }

    /// Segment start with the scale bits cleared.
    pub const fn base(&self) -> i32 {
        self.x_base & !3
    }

    pub const fn shift(&self) -> u32 {
        8 * (self.x_base & 3) as u32
    }
}
