//! Request configurations: operand memory and per-request settings

use super::validator::BufferConfigValidator;
use crate::error::{Error, Result};
use crate::memory::TensorBuffer;
use crate::model::compiled::OperandBuffers;
use crate::model::{operand, CompiledModel, CompiledOperation};
use gna_kernels::AccelerationMode;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Mutable settings from which requests are derived.
///
/// Starts with the memory registered in the model and an empty override set.
/// Every request takes a snapshot, so changes made after an enqueue do not
/// affect requests already submitted.
#[derive(Debug)]
pub struct RequestConfiguration {
    id: u32,
    model_id: u32,
    model: Arc<CompiledModel>,
    buffers: Vec<OperandBuffers>,
    active_lists: BTreeMap<usize, Arc<[u32]>>,
    acceleration_mode: Option<AccelerationMode>,
    profiling: bool,
    validator: BufferConfigValidator,
}

impl RequestConfiguration {
    pub(crate) fn new(id: u32, model_id: u32, model: Arc<CompiledModel>) -> Self {
        let buffers = model
            .operations()
            .iter()
            .map(|operation| {
                operation
                    .operands
                    .iter()
                    .map(|slot| slot.as_ref().and_then(|tensor| tensor.buffer.clone()))
                    .collect()
            })
            .collect();
        let validator = BufferConfigValidator::new(&model);
        Self {
            id,
            model_id,
            model,
            buffers,
            active_lists: BTreeMap::new(),
            acceleration_mode: None,
            profiling: false,
            validator,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn model_id(&self) -> u32 {
        self.model_id
    }

    pub fn model(&self) -> &Arc<CompiledModel> {
        &self.model
    }

    fn operation(&self, index: usize) -> Result<&CompiledOperation> {
        self.model
            .operations()
            .get(index)
            .ok_or_else(|| Error::BufferInvalid {
                operation: index as u32,
                operand: 0,
                reason: format!("model has {} operation(s)", self.model.operation_count()),
            })
    }

    /// Bind memory to one operand slot, replacing any earlier binding.
    pub fn bind_buffer(
        &mut self,
        operation: usize,
        operand: usize,
        buffer: TensorBuffer,
    ) -> Result<()> {
        let invalid = |reason: String| Error::BufferInvalid {
            operation: operation as u32,
            operand: operand as u32,
            reason,
        };
        let compiled = self.operation(operation)?;
        let tensor = compiled
            .operand(operand)
            .ok_or_else(|| invalid(format!("{} has no operand {operand}", compiled.kind)))?;
        if buffer.len() < tensor.size_bytes() {
            return Err(invalid(format!(
                "{} bytes bound, {} required",
                buffer.len(),
                tensor.size_bytes()
            )));
        }

        let slots = &self.buffers[operation];
        let aliases_output = |index: usize| {
            slots
                .get(index)
                .and_then(Option::as_ref)
                .is_some_and(|bound| bound.ptr_eq(&buffer))
        };
        let aliased = if operand == operand::OUTPUT {
            (0..slots.len()).any(|index| index != operand::OUTPUT && aliases_output(index))
        } else {
            aliases_output(operand::OUTPUT)
        };
        if aliased {
            return Err(invalid("output memory may not also be read by the operation".into()));
        }

        self.buffers[operation][operand] = Some(buffer);
        self.validator.bind(operation, operand);
        tracing::trace!(config_id = self.id, operation, operand, "buffer_bound");
        Ok(())
    }

    /// Restrict an affine or GMM operation to the listed output rows.
    ///
    /// Indices must be distinct and below the operation's output rows, so a
    /// list never holds more entries than the output has rows.
    pub fn set_active_list(&mut self, operation: usize, indices: Vec<u32>) -> Result<()> {
        let invalid = |reason: String| Error::ActiveListInvalid {
            operation: operation as u32,
            reason,
        };
        let compiled = self.operation(operation).map_err(|_| invalid("no such operation".into()))?;
        if !compiled.kind.supports_active_list() {
            return Err(invalid(format!("{} does not support active lists", compiled.kind)));
        }
        if indices.is_empty() {
            return Err(invalid("active list is empty".into()));
        }
        let rows = compiled.output_rows();
        if let Some(index) = indices.iter().find(|&&index| index as usize >= rows) {
            return Err(invalid(format!("index {index} is not below {rows} output rows")));
        }
        let mut seen = BTreeSet::new();
        if let Some(index) = indices.iter().find(|&&index| !seen.insert(index)) {
            return Err(invalid(format!("index {index} is listed twice")));
        }
        self.active_lists.insert(operation, indices.into());
        Ok(())
    }

    pub fn clear_active_list(&mut self, operation: usize) {
        self.active_lists.remove(&operation);
    }

    pub fn active_list(&self, operation: usize) -> Option<&[u32]> {
        self.active_lists.get(&operation).map(|list| &**list)
    }

    /// Store a mode override; the device checks it is executable first.
    pub(crate) fn set_acceleration_mode(&mut self, mode: AccelerationMode) {
        self.acceleration_mode = Some(mode);
    }

    pub fn acceleration_mode(&self) -> Option<AccelerationMode> {
        self.acceleration_mode
    }

    pub fn enable_profiling(&mut self, enabled: bool) {
        self.profiling = enabled;
    }

    pub fn profiling(&self) -> bool {
        self.profiling
    }

    pub fn validator(&self) -> &BufferConfigValidator {
        &self.validator
    }

    pub(crate) fn buffers(&self, operation: usize) -> &OperandBuffers {
        &self.buffers[operation]
    }

    pub(crate) fn shared_active_list(&self, operation: usize) -> Option<Arc<[u32]>> {
        self.active_lists.get(&operation).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability_matrix::DeviceGeneration;
    use crate::config::HardwareCapabilities;
    use crate::model::{Model, Operation, Tensor};
    use gna_kernels::DataType;

    fn configuration() -> RequestConfiguration {
        let weights = Tensor::new(DataType::Int16, [4, 8]).with_buffer(TensorBuffer::zeroed(64).unwrap());
        let biases = Tensor::new(DataType::Int32, [4]).with_buffer(TensorBuffer::zeroed(16).unwrap());
        let model = Model::new(vec![
            Operation::fully_connected(
                Tensor::new(DataType::Int16, [8, 1]),
                Tensor::new(DataType::Int32, [4, 1]),
                weights,
                biases,
                None,
            ),
            Operation::copy(Tensor::new(DataType::Int16, [1, 8]), Tensor::new(DataType::Int16, [1, 8]), 8),
        ]);
        let compiled =
            CompiledModel::compile(model, &HardwareCapabilities::for_generation(DeviceGeneration::Gen3_0)).unwrap();
        RequestConfiguration::new(1, 1, Arc::new(compiled))
    }

    #[test]
    fn test_binding_checks_size_and_slot() {
        let mut config = configuration();
        assert!(matches!(
            config.bind_buffer(0, operand::INPUT, TensorBuffer::zeroed(8).unwrap()),
            Err(Error::BufferInvalid { operation: 0, operand: 0, .. })
        ));
        assert!(matches!(
            config.bind_buffer(1, operand::WEIGHTS, TensorBuffer::zeroed(64).unwrap()),
            Err(Error::BufferInvalid { operation: 1, operand: 2, .. })
        ));
        assert!(matches!(
            config.bind_buffer(5, operand::INPUT, TensorBuffer::zeroed(64).unwrap()),
            Err(Error::BufferInvalid { operation: 5, .. })
        ));
        config.bind_buffer(0, operand::INPUT, TensorBuffer::zeroed(16).unwrap()).unwrap();
        assert!(!config.validator().missing().contains(&(0, 0)));
    }

    #[test]
    fn test_output_may_not_alias_bound_input() {
        let mut config = configuration();
        let shared = TensorBuffer::zeroed(16).unwrap();
        config.bind_buffer(1, operand::INPUT, shared.clone()).unwrap();
        assert!(config.bind_buffer(1, operand::OUTPUT, shared).is_err());
    }

    #[test]
    fn test_active_list_rules() {
        let mut config = configuration();
        config.set_active_list(0, vec![3, 1]).unwrap();
        assert_eq!(config.active_list(0), Some(&[3, 1][..]));

        assert!(matches!(
            config.set_active_list(0, vec![4]),
            Err(Error::ActiveListInvalid { operation: 0, .. })
        ));
        assert!(config.set_active_list(0, vec![]).is_err());
        assert!(matches!(
            config.set_active_list(0, vec![0; 5]),
            Err(Error::ActiveListInvalid { operation: 0, .. })
        ));
        assert!(config.set_active_list(0, vec![2, 0, 2]).is_err());
        assert_eq!(config.active_list(0), Some(&[3, 1][..]));
        assert!(config.set_active_list(1, vec![0]).is_err());

        config.clear_active_list(0);
        assert_eq!(config.active_list(0), None);
    }
}
