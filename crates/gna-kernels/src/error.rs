//! Error types for kernel-side resources and dispatch

use crate::types::AccelerationMode;

/// Result type for kernel crate operations
pub type Result<T> = std::result::Result<T, KernelError>;

/// Errors raised while preparing kernel execution.
///
/// Kernels themselves never fail; saturation is counted, not reported.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// A scratch region could not be allocated
    #[error("failed to allocate {bytes} bytes for the {region} scratch region")]
    ScratchAllocation { region: &'static str, bytes: usize },

    /// The requested mode is unavailable on this CPU or for this kernel
    #[error("acceleration mode {0} is not supported")]
    AccelerationModeNotSupported(AccelerationMode),
}
