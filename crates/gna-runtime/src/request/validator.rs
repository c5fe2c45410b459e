//! Tracking of operand slots that still need memory

use crate::error::{Error, Result};
use crate::model::CompiledModel;
use std::collections::BTreeSet;

/// Set of `(operation, operand)` slots present in the model but still unbound.
///
/// Built from the model when a configuration is created; every binding
/// removes its slot. Submission is refused while the set is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferConfigValidator {
    missing: BTreeSet<(u32, u32)>,
}

impl BufferConfigValidator {
    pub fn new(model: &CompiledModel) -> Self {
        let missing = model
            .operations()
            .iter()
            .enumerate()
            .flat_map(|(operation, compiled)| {
                compiled
                    .operands
                    .iter()
                    .enumerate()
                    .filter(|(_, slot)| matches!(slot, Some(tensor) if tensor.buffer.is_none()))
                    .map(move |(operand, _)| (operation as u32, operand as u32))
            })
            .collect();
        Self { missing }
    }

    pub fn bind(&mut self, operation: usize, operand: usize) {
        self.missing.remove(&(operation as u32, operand as u32));
    }

    pub fn missing(&self) -> &BTreeSet<(u32, u32)> {
        &self.missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Fail with the full missing set unless every slot is bound.
    pub fn validate(&self, config_id: u32) -> Result<()> {
        if self.is_complete() {
            return Ok(());
        }
        Err(Error::RequestConfigIncomplete {
            config_id,
            missing: self.missing.iter().copied().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability_matrix::DeviceGeneration;
    use crate::config::HardwareCapabilities;
    use crate::memory::TensorBuffer;
    use crate::model::{Model, Operation, Tensor};
    use gna_kernels::DataType;

    fn model(bound_input: bool) -> CompiledModel {
        let mut input = Tensor::new(DataType::Int16, [2, 8]);
        if bound_input {
            input = input.with_buffer(TensorBuffer::zeroed(32).unwrap());
        }
        let model = Model::new(vec![
            Operation::copy(input, Tensor::new(DataType::Int16, [2, 8]), 8),
            Operation::transposition(Tensor::new(DataType::Int16, [2, 8]), Tensor::new(DataType::Int16, [8, 2])),
        ]);
        CompiledModel::compile(model, &HardwareCapabilities::for_generation(DeviceGeneration::Gen3_0)).unwrap()
    }

    #[test]
    fn test_collects_unbound_slots() {
        let validator = BufferConfigValidator::new(&model(true));
        assert_eq!(
            validator.missing().iter().copied().collect::<Vec<_>>(),
            vec![(0, 1), (1, 0), (1, 1)]
        );
    }

    #[test]
    fn test_partial_then_complete() {
        let mut validator = BufferConfigValidator::new(&model(false));
        validator.bind(0, 0);
        validator.bind(0, 1);
        validator.bind(1, 0);

        assert_eq!(
            validator.validate(4),
            Err(Error::RequestConfigIncomplete {
                config_id: 4,
                missing: vec![(1, 1)]
            })
        );

        validator.bind(1, 1);
        assert!(validator.validate(4).is_ok());
    }
}
