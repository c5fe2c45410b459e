//! # gna-kernels
//!
//! Compute side of the GNA runtime: the data types shared with the kernels,
//! the kernel calling contract, per-worker scratch memory, CPU capability
//! detection and the static operation-to-kernel dispatch table.
//!
//! ```rust
//! use gna_kernels::{
//!     AccelerationMode, CapabilityDetector, DataType, KernelDispatchTable, KernelMode,
//!     OperationKind,
//! };
//!
//! let detector = CapabilityDetector::detect(false);
//! let mode = KernelMode::new(DataType::Int16, DataType::Int16, DataType::Int32, DataType::Int32, true);
//! let kernels = KernelDispatchTable::global().kernels(OperationKind::FullyConnectedAffine, &mode);
//! let (selected, _kernel) =
//!     KernelDispatchTable::resolve(AccelerationMode::Auto, detector.modes(), kernels).unwrap();
//! assert!(detector.is_supported(selected));
//! ```

pub mod buffers;
pub mod config;
pub mod detect;
pub mod dispatch;
pub mod error;
pub mod kernels;
pub mod types;

pub use buffers::{KernelBuffers, MAX_FILTERS, MAX_GROUPS, MAX_INPUT_ELEMENTS, POOL_WINDOW_MAX};
pub use config::{
    AffineConfig, ConvolutionConfig, CopyConfig, ExecutionContext, GmmConfig, Kernel, Pooling,
    PoolingMode, TransposeConfig,
};
pub use detect::{CapabilityDetector, CpuFeatures};
pub use dispatch::{KernelDispatchTable, KernelMap, Registration, REGISTRY};
pub use error::{KernelError, Result};
pub use types::{AccelerationMode, CompoundBias, DataType, KernelMode, OperationKind, PwlSegment};
