//! Error types for runtime operations

use crate::model_error::ModelError;
use gna_kernels::{AccelerationMode, KernelError};
use std::fmt;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Kind of object an identifier refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierKind {
    Device,
    Model,
    RequestConfig,
    Request,
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IdentifierKind::Device => "device",
            IdentifierKind::Model => "model",
            IdentifierKind::RequestConfig => "request configuration",
            IdentifierKind::Request => "request",
        })
    }
}

/// How a caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Fix the call and retry.
    Configuration,
    /// Fix the model and register it again.
    Validation,
    /// Transient; retrying may succeed.
    Resource,
    /// Defect in the runtime.
    Internal,
}

/// Errors returned by the runtime API
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Unknown or released identifier
    #[error("{kind} {id} not found")]
    IdentifierInvalid { kind: IdentifierKind, id: u32 },

    /// Device index outside the available devices
    #[error("device index {index} is invalid ({available} device(s) available)")]
    DeviceIndexInvalid { index: u32, available: u32 },

    /// Device was never opened or already fully closed
    #[error("device {0} is not opened")]
    DeviceNotOpened(u32),

    /// Object still in use by dependent objects
    #[error("{kind} {id} is still in use: {reason}")]
    DeviceBusy {
        kind: IdentifierKind,
        id: u32,
        reason: String,
    },

    /// Device configuration could not be parsed
    #[error("invalid device configuration: {0}")]
    InvalidConfig(String),

    /// Worker thread count outside 1..=127
    #[error("thread count {0} is invalid (must be between 1 and 127)")]
    ThreadCountInvalid(u32),

    /// Requested acceleration mode cannot run on this device
    #[error("acceleration mode {0} is not supported on this device")]
    AccelerationModeNotSupported(AccelerationMode),

    /// Model rejected by validation
    #[error("model configuration rejected: {0}")]
    ModelConfiguration(ModelError),

    /// Mandatory operand buffers still unbound at submission
    #[error("request configuration {config_id} is missing {} buffer(s): {missing:?}", .missing.len())]
    RequestConfigIncomplete {
        config_id: u32,
        /// `(operation index, operand index)` pairs
        missing: Vec<(u32, u32)>,
    },

    /// Active list not applicable or out of range
    #[error("active list for operation {operation} is invalid: {reason}")]
    ActiveListInvalid { operation: u32, reason: String },

    /// Operand buffer rejected at bind time
    #[error("buffer for operation {operation} operand {operand} is invalid: {reason}")]
    BufferInvalid {
        operation: u32,
        operand: u32,
        reason: String,
    },

    /// Data larger than the destination buffer
    #[error("{required} bytes do not fit a buffer of {available} bytes")]
    BufferTooSmall { required: usize, available: usize },

    /// Previous model error not popped yet
    #[error("a model error is already pending; pop it before storing another")]
    ModelErrorPending,

    /// No model error pending
    #[error("no model error available")]
    ErrorUnavailable,

    /// Work submitted after the worker pool was stopped
    #[error("worker pool is stopped")]
    PoolStopped,

    /// Memory or thread allocation failed
    #[error("resource allocation failed: {0}")]
    ResourceAllocation(String),

    /// Kernel-side preparation failed
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),

    /// Runtime invariant violated
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(kind: IdentifierKind, id: u32) -> Self {
        Self::IdentifierInvalid { kind, id }
    }

    pub fn busy(kind: IdentifierKind, id: u32, reason: impl Into<String>) -> Self {
        Self::DeviceBusy {
            kind,
            id,
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::ModelConfiguration(_) => ErrorCategory::Validation,
            Error::ResourceAllocation(_) => ErrorCategory::Resource,
            Error::Kernel(KernelError::ScratchAllocation { .. }) => ErrorCategory::Resource,
            Error::Kernel(KernelError::AccelerationModeNotSupported(_)) => {
                ErrorCategory::Configuration
            }
            Error::Internal(_) => ErrorCategory::Internal,
            _ => ErrorCategory::Configuration,
        }
    }
}

impl From<ModelError> for Error {
    fn from(error: ModelError) -> Self {
        Self::ModelConfiguration(error)
    }
}
