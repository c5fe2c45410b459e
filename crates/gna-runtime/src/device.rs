//! A software-emulated accelerator device
//!
//! The device owns its capability description, the acceleration modes the
//! host CPU supports, the registry of compiled models and request
//! configurations, and the scheduler with its worker pool.

use crate::config::{DeviceConfig, HardwareCapabilities};
use crate::error::{Error, IdentifierKind, Result};
use crate::memory::TensorBuffer;
use crate::model::{CompiledModel, Model};
use crate::model_error::ModelErrorReporter;
use crate::profiler::RequestProfile;
use crate::registry::ModelRegistry;
use crate::request::{RequestScheduler, RequestState, RequestStatus};
use gna_kernels::{AccelerationMode, CapabilityDetector, KernelDispatchTable};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub struct Device {
    index: u32,
    config: DeviceConfig,
    capabilities: HardwareCapabilities,
    detector: CapabilityDetector,
    registry: Mutex<ModelRegistry>,
    scheduler: RequestScheduler,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("index", &self.index)
            .field("config", &self.config)
            .field("capabilities", &self.capabilities)
            .field("detector", &self.detector)
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Bring up a device: detect modes, then start the worker pool.
    #[tracing::instrument(
        skip(config),
        fields(generation = %config.generation, threads = config.thread_count)
    )]
    pub fn open(index: u32, config: DeviceConfig) -> Result<Self> {
        config.validate()?;
        let capabilities = HardwareCapabilities::for_generation(config.generation);
        let detector = CapabilityDetector::detect(capabilities.hardware_available);
        if !detector.is_supported(config.acceleration_mode) {
            return Err(Error::AccelerationModeNotSupported(config.acceleration_mode));
        }
        let scheduler = RequestScheduler::new(config.thread_count)?;

        tracing::info!(
            device = index,
            version = %capabilities.device_version,
            modes = ?detector.supported_modes(),
            "device_opened"
        );
        Ok(Self {
            index,
            config,
            capabilities,
            detector,
            registry: Mutex::new(ModelRegistry::new()),
            scheduler,
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &HardwareCapabilities {
        &self.capabilities
    }

    pub fn detector(&self) -> &CapabilityDetector {
        &self.detector
    }

    pub fn supported_modes(&self) -> Vec<AccelerationMode> {
        self.detector.supported_modes()
    }

    /// Validate and compile `model`.
    ///
    /// A rejected model is also offered to the last-error slot; when that slot
    /// still holds an unpopped error the new one is only returned.
    #[tracing::instrument(
        skip(self, model),
        fields(device = self.index, operations = model.operations.len())
    )]
    pub fn register_model(&self, model: Model) -> Result<u32> {
        let compiled = match CompiledModel::compile(model, &self.capabilities) {
            Ok(compiled) => compiled,
            Err(error) => {
                tracing::info!(%error, "model_rejected");
                if let Err(pending) = ModelErrorReporter::store(error.clone()) {
                    tracing::warn!(%pending, "model_error_not_stored");
                }
                return Err(Error::ModelConfiguration(error));
            }
        };
        let operations = compiled.operation_count();
        let id = self.registry.lock().insert_model(compiled);
        tracing::info!(model_id = id, operations, "model_registered");
        Ok(id)
    }

    /// Release a model no request configuration refers to.
    #[tracing::instrument(skip(self), fields(device = self.index))]
    pub fn release_model(&self, model_id: u32) -> Result<()> {
        self.registry.lock().remove_model(model_id)?;
        tracing::debug!(model_id, "model_released");
        Ok(())
    }

    pub fn model(&self, model_id: u32) -> Result<Arc<CompiledModel>> {
        self.registry.lock().model(model_id).cloned()
    }

    /// New configuration bound to `model_id`.
    pub fn create_request_config(&self, model_id: u32) -> Result<u32> {
        let id = self.registry.lock().create_config(model_id)?;
        tracing::debug!(config_id = id, model_id, "request_config_created");
        Ok(id)
    }

    /// Release a configuration no unfinished request derives from.
    pub fn release_request_config(&self, config_id: u32) -> Result<()> {
        let mut registry = self.registry.lock();
        registry.config(config_id)?;
        let outstanding = self.scheduler.outstanding_for_config(config_id);
        if outstanding > 0 {
            return Err(Error::busy(
                IdentifierKind::RequestConfig,
                config_id,
                format!("{outstanding} request(s) still outstanding"),
            ));
        }
        registry.remove_config(config_id)?;
        Ok(())
    }

    pub fn bind_buffer(
        &self,
        config_id: u32,
        operation: usize,
        operand: usize,
        buffer: TensorBuffer,
    ) -> Result<()> {
        self.registry
            .lock()
            .config_mut(config_id)?
            .bind_buffer(operation, operand, buffer)
    }

    pub fn set_active_list(
        &self,
        config_id: u32,
        operation: usize,
        indices: Vec<u32>,
    ) -> Result<()> {
        self.registry
            .lock()
            .config_mut(config_id)?
            .set_active_list(operation, indices)
    }

    pub fn clear_active_list(&self, config_id: u32, operation: usize) -> Result<()> {
        self.registry.lock().config_mut(config_id)?.clear_active_list(operation);
        Ok(())
    }

    /// Override the acceleration mode for requests derived from `config_id`.
    ///
    /// Fails at once unless every operation of the model can run in `mode`
    /// on this host.
    pub fn set_acceleration_mode(&self, config_id: u32, mode: AccelerationMode) -> Result<()> {
        let mut registry = self.registry.lock();
        let config = registry.config_mut(config_id)?;
        for operation in config.model().operations() {
            KernelDispatchTable::resolve(mode, self.detector.modes(), operation.kernels)
                .map_err(|_| Error::AccelerationModeNotSupported(mode))?;
        }
        config.set_acceleration_mode(mode);
        Ok(())
    }

    pub fn enable_profiling(&self, config_id: u32, enabled: bool) -> Result<()> {
        self.registry.lock().config_mut(config_id)?.enable_profiling(enabled);
        Ok(())
    }

    /// Operand slots of `config_id` still waiting for memory.
    pub fn missing_buffers(&self, config_id: u32) -> Result<Vec<(u32, u32)>> {
        let registry = self.registry.lock();
        let missing = registry.config(config_id)?.validator().missing();
        Ok(missing.iter().copied().collect())
    }

    /// Submit one request derived from `config_id`.
    pub fn enqueue(&self, config_id: u32) -> Result<u32> {
        let registry = self.registry.lock();
        let config = registry.config(config_id)?;
        let mode = config.acceleration_mode().unwrap_or(self.config.acceleration_mode);
        self.scheduler.enqueue(config, &self.detector, mode)
    }

    pub fn wait(&self, request_id: u32, timeout: Duration) -> Result<RequestStatus> {
        self.scheduler.wait_for(request_id, timeout)
    }

    pub fn request_state(&self, request_id: u32) -> Result<RequestState> {
        self.scheduler.state(request_id)
    }

    pub fn request_profile(&self, request_id: u32) -> Result<Option<RequestProfile>> {
        self.scheduler.profile(request_id)
    }

    pub fn release_request(&self, request_id: u32) -> Result<()> {
        self.scheduler.release(request_id)
    }

    /// Restart the worker pool; requests still queued are abandoned.
    #[tracing::instrument(skip(self), fields(device = self.index))]
    pub fn set_thread_count(&self, thread_count: u32) -> Result<()> {
        let outstanding = self.scheduler.outstanding();
        if outstanding > 0 {
            tracing::warn!(outstanding, "resizing_with_outstanding_requests");
        }
        self.scheduler.set_thread_count(thread_count)
    }

    pub fn thread_count(&self) -> usize {
        self.scheduler.thread_count()
    }

    /// Scratch-memory instances held by the workers.
    pub fn live_buffers(&self) -> usize {
        self.scheduler.live_buffers()
    }

    /// Fail unless no model, configuration or unfinished request remains.
    pub fn ensure_idle(&self) -> Result<()> {
        let registry = self.registry.lock();
        let outstanding = self.scheduler.outstanding();
        if registry.model_count() > 0 || registry.config_count() > 0 || outstanding > 0 {
            return Err(Error::busy(
                IdentifierKind::Device,
                self.index,
                format!(
                    "{} model(s), {} configuration(s), {outstanding} request(s) remain",
                    registry.model_count(),
                    registry.config_count()
                ),
            ));
        }
        Ok(())
    }

    /// Stop the worker pool for shutdown; queued requests are abandoned.
    pub fn stop(&self) {
        self.scheduler.stop_all();
        tracing::info!(device = self.index, "device_stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{operand, Operation, Tensor};
    use gna_kernels::DataType;

    fn copy_model() -> Model {
        Model::new(vec![Operation::copy(
            Tensor::new(DataType::Int16, [2, 8]),
            Tensor::new(DataType::Int16, [2, 4]),
            4,
        )])
    }

    #[test]
    fn test_open_rejects_bad_thread_count() {
        let config = DeviceConfig {
            thread_count: 0,
            ..DeviceConfig::default()
        };
        assert!(matches!(Device::open(0, config), Err(Error::ThreadCountInvalid(0))));
    }

    #[test]
    fn test_copy_request_round_trip() {
        let device = Device::open(0, DeviceConfig::default()).unwrap();
        let model = device.register_model(copy_model()).unwrap();
        let config = device.create_request_config(model).unwrap();
        assert_eq!(device.missing_buffers(config).unwrap(), vec![(0, 0), (0, 1)]);

        let input: Vec<i16> = (0..16).collect();
        let output = TensorBuffer::zeroed(16).unwrap();
        device
            .bind_buffer(config, 0, operand::INPUT, TensorBuffer::from_slice(&input).unwrap())
            .unwrap();
        device.bind_buffer(config, 0, operand::OUTPUT, output.clone()).unwrap();

        let request = device.enqueue(config).unwrap();
        assert_eq!(
            device.wait(request, Duration::from_secs(10)).unwrap(),
            RequestStatus::Completed
        );
        assert_eq!(output.to_vec::<i16>(), vec![0, 1, 2, 3, 8, 9, 10, 11]);

        assert!(device.ensure_idle().is_err());
        device.release_request(request).unwrap();
        device.release_request_config(config).unwrap();
        device.release_model(model).unwrap();
        device.ensure_idle().unwrap();
    }

    #[test]
    fn test_generic_override_is_always_accepted() {
        let device = Device::open(0, DeviceConfig::default()).unwrap();
        let model = device.register_model(copy_model()).unwrap();
        let config = device.create_request_config(model).unwrap();
        device.set_acceleration_mode(config, AccelerationMode::Generic).unwrap();
        device.set_acceleration_mode(config, AccelerationMode::Software).unwrap();
        assert!(matches!(
            device.set_acceleration_mode(config + 1, AccelerationMode::Generic),
            Err(Error::IdentifierInvalid { kind: IdentifierKind::RequestConfig, .. })
        ));
    }
}
