//! # gna-runtime
//!
//! Software runtime for GNA-style inference accelerators: models are
//! validated against the capability rules of a device generation, compiled
//! to kernel dispatch entries, and executed as requests on a pool of worker
//! threads.
//!
//! ## Lifecycle
//!
//! 1. Open a [`Device`] (usually through [`DeviceManager`]).
//! 2. Register a [`Model`]; a rejected model yields a [`ModelError`] with
//!    the offending operation, operand, parameter or dimension.
//! 3. Create a request configuration and bind the input and output memory.
//! 4. Enqueue requests and wait for them.
//!
//! Arithmetic saturation never fails a request: it is counted and reported
//! through [`RequestStatus::Saturated`].
//!
//! ## Example
//!
//! ```rust
//! use gna_kernels::DataType;
//! use gna_runtime::{
//!     operand, Device, DeviceConfig, Model, Operation, RequestStatus, Tensor, TensorBuffer,
//! };
//! use std::time::Duration;
//!
//! let device = Device::open(0, DeviceConfig::default())?;
//! let model = device.register_model(Model::new(vec![Operation::transposition(
//!     Tensor::new(DataType::Int16, [2, 3]),
//!     Tensor::new(DataType::Int16, [3, 2]),
//! )]))?;
//! let config = device.create_request_config(model)?;
//!
//! let output = TensorBuffer::zeroed(12)?;
//! let input = TensorBuffer::from_slice(&[1i16, 2, 3, 4, 5, 6])?;
//! device.bind_buffer(config, 0, operand::INPUT, input)?;
//! device.bind_buffer(config, 0, operand::OUTPUT, output.clone())?;
//!
//! let request = device.enqueue(config)?;
//! assert_eq!(device.wait(request, Duration::from_secs(5))?, RequestStatus::Completed);
//! assert_eq!(output.to_vec::<i16>(), vec![1, 4, 2, 5, 3, 6]);
//! # Ok::<(), gna_runtime::Error>(())
//! ```

pub mod capability_matrix;
pub mod config;
pub mod device;
pub mod device_manager;
pub mod error;
pub mod memory;
pub mod model;
pub mod model_error;
pub mod profiler;
pub mod registry;
pub mod request;
pub mod worker_pool;

pub use capability_matrix::{CapabilityMatrix, DeviceGeneration};
pub use config::{
    DeviceConfig, DeviceLimits, HardwareCapabilities, MAX_THREAD_COUNT, MIN_THREAD_COUNT,
};
pub use device::Device;
pub use device_manager::{DeviceManager, DEVICE_COUNT};
pub use error::{Error, ErrorCategory, IdentifierKind, Result};
pub use memory::TensorBuffer;
pub use model::{
    operand, parameter, validate_model, CompiledModel, CompiledOperation, Model, Operation,
    Parameters, Tensor,
};
pub use model_error::{
    ErrorContext, ErrorReason, ErrorSource, ItemType, ModelError, ModelErrorReporter,
};
pub use profiler::RequestProfile;
pub use registry::ModelRegistry;
pub use request::{
    BufferConfigValidator, Request, RequestConfiguration, RequestScheduler, RequestState,
    RequestStatus,
};
pub use worker_pool::{Job, WorkerPool};
