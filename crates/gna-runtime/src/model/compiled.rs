//! Validated models bound to their kernels

use super::operation::{operand, Model, Parameters, Tensor};
use super::validation::validate_model;
use crate::config::HardwareCapabilities;
use crate::error::{Error, Result};
use crate::memory::TensorBuffer;
use crate::model_error::{ErrorContext, ErrorReason, ItemType, ModelError};
use gna_kernels::{
    AffineConfig, ConvolutionConfig, CopyConfig, ExecutionContext, GmmConfig, Kernel,
    KernelDispatchTable, KernelMap, KernelMode, OperationKind, PwlSegment, TransposeConfig,
};
use parking_lot::MappedRwLockReadGuard;

/// One validated operation and the kernels registered for its mode.
#[derive(Debug)]
pub struct CompiledOperation {
    pub kind: OperationKind,
    pub mode: KernelMode,
    pub kernels: &'static KernelMap,
    /// Operand descriptors as registered, memory included.
    pub operands: Vec<Option<Tensor>>,
    pub parameters: Parameters,
}

/// Immutable model ready for execution.
#[derive(Debug)]
pub struct CompiledModel {
    operations: Vec<CompiledOperation>,
}

impl CompiledModel {
    /// Validate `model` and bind every operation to its dispatch entry.
    ///
    /// A validated mode without registered kernels is reported as an
    /// internal error of that operation.
    pub fn compile(
        model: Model,
        capabilities: &HardwareCapabilities,
    ) -> std::result::Result<Self, ModelError> {
        let modes = validate_model(&model, capabilities)?;
        let table = KernelDispatchTable::global();
        let operations = model
            .operations
            .into_iter()
            .zip(modes)
            .enumerate()
            .map(|(index, (operation, mode))| {
                let kernels = table.try_kernels(operation.kind, &mode).ok_or_else(|| {
                    tracing::error!(operation = %operation.kind, %mode, "dispatch_entry_missing");
                    ErrorContext::model().operation(index).error(
                        ItemType::Internal,
                        ErrorReason::Runtime,
                        operation.kind as i64,
                    )
                })?;
                Ok(CompiledOperation {
                    kind: operation.kind,
                    mode,
                    kernels,
                    operands: operation.operands,
                    parameters: operation.parameters,
                })
            })
            .collect::<std::result::Result<Vec<_>, ModelError>>()?;
        Ok(Self { operations })
    }

    pub fn operations(&self) -> &[CompiledOperation] {
        &self.operations
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }
}

/// Memory of one operation's operands for a single execution.
pub(crate) type OperandBuffers = Vec<Option<TensorBuffer>>;

type ReadGuard<'a> = MappedRwLockReadGuard<'a, [u8]>;

impl CompiledOperation {
    pub fn operand(&self, index: usize) -> Option<&Tensor> {
        self.operands.get(index).and_then(Option::as_ref)
    }

    /// Rows of output the operation produces without an active list.
    pub fn output_rows(&self) -> usize {
        self.operand(operand::OUTPUT).map_or(0, |tensor| tensor.dimension(0))
    }

    /// Run `kernel` over `buffers`, which hold one entry per operand slot.
    pub(crate) fn execute(
        &self,
        kernel: Kernel,
        buffers: &OperandBuffers,
        active_list: Option<&[u32]>,
        context: &mut ExecutionContext<'_>,
    ) -> Result<()> {
        let input_tensor = self.tensor(operand::INPUT)?;
        let output_tensor = self.tensor(operand::OUTPUT)?;
        let input = self.read(buffers, operand::INPUT)?;
        let output_buffer = buffer(buffers, operand::OUTPUT)?;
        let mut output = output_buffer.write();
        let output = &mut output[..output_tensor.size_bytes()];

        match (kernel, &self.parameters) {
            (Kernel::Affine(affine), _) => {
                let weights = self.read(buffers, operand::WEIGHTS)?;
                let biases = self.read(buffers, operand::BIASES)?;
                let activation = self.read_optional(buffers, operand::ACTIVATION)?;
                let mut config = AffineConfig {
                    input_elements: input_tensor.dimension(0),
                    output_elements: output_tensor.dimension(0),
                    groups: input_tensor.dimension(1),
                    input: &input,
                    weights: &weights,
                    biases: &biases,
                    activation: segments(activation.as_deref())?,
                    active_list,
                    output_type: output_tensor.data_type,
                    output,
                };
                affine(&mut config, context);
            }
            (Kernel::Convolution(convolve), &Parameters::Convolution { stride, pooling }) => {
                let filters_tensor = self.tensor(operand::WEIGHTS)?;
                let filters = self.read(buffers, operand::WEIGHTS)?;
                let biases = self.read(buffers, operand::BIASES)?;
                let activation = self.read_optional(buffers, operand::ACTIVATION)?;
                let mut config = ConvolutionConfig {
                    input_elements: input_tensor.dimension(0),
                    filter_count: filters_tensor.dimension(0),
                    filter_size: filters_tensor.dimension(1),
                    stride,
                    input: &input,
                    filters: &filters,
                    biases: &biases,
                    activation: segments(activation.as_deref())?,
                    pooling,
                    output_type: output_tensor.data_type,
                    output,
                };
                context.buffers.reserve_convolution(config.scratch_len())?;
                convolve(&mut config, context);
            }
            (Kernel::Copy(copy), &Parameters::Copy { copy_columns }) => {
                let mut config = CopyConfig {
                    rows: input_tensor.dimension(0),
                    input_columns: input_tensor.dimension(1),
                    output_columns: output_tensor.dimension(1),
                    copy_columns,
                    input: &input,
                    output,
                };
                copy(&mut config, context);
            }
            (Kernel::Transpose(transpose), _) => {
                let mut config = TransposeConfig {
                    rows: input_tensor.dimension(0),
                    columns: input_tensor.dimension(1),
                    input: &input,
                    output,
                };
                transpose(&mut config, context);
            }
            (Kernel::Gmm(score), &Parameters::Gmm { maximum_score }) => {
                let means_tensor = self.tensor(operand::MEANS)?;
                let means = self.read(buffers, operand::MEANS)?;
                let variances = self.read(buffers, operand::INVERSE_COVARIANCES)?;
                let constants = self.read(buffers, operand::CONSTANTS)?;
                let mut config = GmmConfig {
                    feature_count: input_tensor.dimension(1),
                    groups: input_tensor.dimension(0),
                    states: means_tensor.dimension(0),
                    mixtures: means_tensor.dimension(1),
                    input: &input,
                    means: &means,
                    inverse_covariances: &variances,
                    constants: &constants,
                    maximum_score,
                    active_list,
                    output,
                };
                score(&mut config, context);
            }
            (kernel, parameters) => {
                return Err(Error::Internal(format!(
                    "{} kernel cannot run {} with {parameters:?}",
                    kernel.name(),
                    self.kind
                )))
            }
        }
        Ok(())
    }

    fn tensor(&self, index: usize) -> Result<&Tensor> {
        self.operand(index)
            .ok_or_else(|| Error::Internal(format!("{} operand {index} is missing", self.kind)))
    }

    /// Read guard over exactly the bytes the tensor in `index` occupies.
    fn read<'a>(&self, buffers: &'a OperandBuffers, index: usize) -> Result<ReadGuard<'a>> {
        let len = self.tensor(index)?.size_bytes();
        let guard = buffer(buffers, index)?.read();
        Ok(MappedRwLockReadGuard::map(guard, |bytes| &bytes[..len]))
    }

    fn read_optional<'a>(
        &self,
        buffers: &'a OperandBuffers,
        index: usize,
    ) -> Result<Option<ReadGuard<'a>>> {
        match self.operand(index) {
            Some(_) => self.read(buffers, index).map(Some),
            None => Ok(None),
        }
    }
}

fn buffer(buffers: &OperandBuffers, index: usize) -> Result<&TensorBuffer> {
    buffers
        .get(index)
        .and_then(Option::as_ref)
        .ok_or_else(|| Error::Internal(format!("operand {index} has no memory at execution")))
}

fn segments(bytes: Option<&[u8]>) -> Result<Option<&[PwlSegment]>> {
    bytes
        .map(|bytes| {
            bytemuck::try_cast_slice(bytes)
                .map_err(|error| Error::Internal(format!("activation segments: {error}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability_matrix::DeviceGeneration;
    use crate::model::operation::{Operation, Tensor};
    use gna_kernels::{AccelerationMode, DataType, KernelBuffers};

    fn constant<T: bytemuck::Pod>(data_type: DataType, shape: &[usize], values: &[T]) -> Tensor {
        Tensor::new(data_type, shape).with_buffer(TensorBuffer::from_slice(values).unwrap())
    }

    #[test]
    fn test_compile_binds_dispatch_entry() {
        let model = Model::new(vec![Operation::transposition(
            Tensor::new(DataType::Int16, [2, 8]),
            Tensor::new(DataType::Int16, [8, 2]),
        )]);
        let compiled =
            CompiledModel::compile(model, &HardwareCapabilities::for_generation(DeviceGeneration::Gen3_0)).unwrap();
        let operation = &compiled.operations()[0];
        assert_eq!(operation.mode, KernelMode::data_movement(DataType::Int16));
        assert!(operation.kernels.contains_key(&AccelerationMode::Generic));
        assert_eq!(operation.output_rows(), 8);
    }

    #[test]
    fn test_execute_affine_with_bound_memory() {
        let model = Model::new(vec![Operation::fully_connected(
            Tensor::new(DataType::Int16, [8, 1]),
            Tensor::new(DataType::Int32, [2, 1]),
            constant(DataType::Int16, &[2, 8], &[1i16; 16]),
            constant(DataType::Int32, &[2], &[10i32, -10]),
            None,
        )]);
        let compiled =
            CompiledModel::compile(model, &HardwareCapabilities::for_generation(DeviceGeneration::Gen3_0)).unwrap();
        let operation = &compiled.operations()[0];

        let input = TensorBuffer::from_slice(&[1i16, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let output = TensorBuffer::zeroed(8).unwrap();
        let mut buffers: OperandBuffers = operation
            .operands
            .iter()
            .map(|slot| slot.as_ref().and_then(|tensor| tensor.buffer.clone()))
            .collect();
        buffers[operand::INPUT] = Some(input);
        buffers[operand::OUTPUT] = Some(output.clone());

        let mut scratch = KernelBuffers::new().unwrap();
        let mut context = ExecutionContext::new(&mut scratch);
        let kernel = operation.kernels[&AccelerationMode::Generic];
        operation.execute(kernel, &buffers, None, &mut context).unwrap();

        assert_eq!(output.to_vec::<i32>(), vec![46, 26]);
        assert_eq!(context.saturations, 0);
    }
}
