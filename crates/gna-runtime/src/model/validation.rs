//! Structural and capability checks run when a model is registered
//!
//! Every failure is a [`ModelError`] whose locator names the operation,
//! operand, parameter or shape dimension at fault.

use super::operation::{
    is_optional, operand, operand_count, parameter, Model, Operation, Parameters, Tensor,
};
use crate::capability_matrix::{CapabilityMatrix, DeviceGeneration, RULES};
use crate::config::{DeviceLimits, HardwareCapabilities};
use crate::model_error::{Check, ErrorContext, ErrorReason, ItemType, ModelError};
use gna_kernels::config::{convolution_outputs, pooled_outputs};
use gna_kernels::{DataType, KernelMode, OperationKind, Pooling};
use std::collections::BTreeSet;

/// Validate `model` against `capabilities` and return the kernel mode of each operation.
pub fn validate_model(
    model: &Model,
    capabilities: &HardwareCapabilities,
) -> Result<Vec<KernelMode>, ModelError> {
    let limits = &capabilities.limits;
    ErrorContext::model().expect_in_range(
        model.operations.len(),
        1,
        limits.max_operations,
        ItemType::ModelNumberOfOperations,
    )?;

    model
        .operations
        .iter()
        .enumerate()
        .map(|(index, operation)| {
            validate_operation(ErrorContext::model().operation(index), operation, capabilities)
        })
        .collect()
}

fn validate_operation(
    context: ErrorContext,
    operation: &Operation,
    capabilities: &HardwareCapabilities,
) -> Result<KernelMode, ModelError> {
    let kind = operation.kind;
    let generation = capabilities.generation;
    context.expect(
        CapabilityMatrix::supports_operation(kind, generation),
        ItemType::OperationType,
        ErrorReason::NotInSet,
        kind as i64,
    )?;
    context.expect_equal(
        operation.operands.len(),
        operand_count(kind),
        ItemType::OperationNumberOfOperands,
    )?;

    for (index, slot) in operation.operands.iter().enumerate() {
        let context = context.operand(index);
        match slot {
            None if is_optional(kind, index) => {}
            None => {
                return Err(context.error(
                    ItemType::OperationOperands,
                    ErrorReason::NullNotAllowed,
                    0,
                ))
            }
            Some(tensor) => validate_operand(context, kind, index, tensor)?,
        }
    }

    let limits = &capabilities.limits;
    match kind {
        OperationKind::FullyConnectedAffine | OperationKind::ElementWiseAffine => {
            validate_affine(context, operation, limits)?
        }
        OperationKind::Convolution => validate_convolution(context, operation, limits)?,
        OperationKind::Copy => validate_copy(context, operation, limits)?,
        OperationKind::Transposition => validate_transposition(context, operation, limits)?,
        OperationKind::Gmm => validate_gmm(context, operation, limits)?,
    }

    validate_aliasing(context, operation)?;

    let mode = kernel_mode(operation);
    check_capability(context, kind, &mode, generation)?;
    Ok(mode)
}

fn validate_operand(
    context: ErrorContext,
    kind: OperationKind,
    index: usize,
    tensor: &Tensor,
) -> Check {
    let allowed = slot_types(kind, index);
    context.expect_in_set(
        &tensor.data_type,
        &allowed,
        ItemType::OperandType,
        tensor.data_type as i64,
    )?;

    let io = index == operand::INPUT || index == operand::OUTPUT;
    if !io {
        context.expect_present(tensor.buffer.as_ref(), ItemType::OperandData)?;
    }
    if let Some(buffer) = &tensor.buffer {
        context.expect(
            buffer.len() >= tensor.size_bytes(),
            ItemType::OperandData,
            ErrorReason::BelowRange,
            buffer.len() as i64,
        )?;
    }
    Ok(())
}

/// Data types any generation accepts in one operand slot of `kind`.
fn slot_types(kind: OperationKind, index: usize) -> Vec<DataType> {
    let gmm = kind == OperationKind::Gmm;
    let mut types = BTreeSet::new();
    for rule in RULES.iter().filter(|rule| rule.operations.contains(&kind)) {
        match index {
            operand::INPUT => types.extend(rule.inputs),
            operand::OUTPUT => types.extend(rule.outputs.iter().map(|(output, _)| *output)),
            operand::MEANS if gmm => {
                types.insert(DataType::UInt8);
            }
            operand::INVERSE_COVARIANCES if gmm => types.extend(rule.weights),
            operand::CONSTANTS if gmm => types.extend(rule.biases),
            operand::WEIGHTS => types.extend(rule.weights),
            operand::BIASES => types.extend(rule.biases),
            operand::ACTIVATION => {
                types.insert(DataType::PwlSegment);
            }
            _ => {}
        }
    }
    types.into_iter().collect()
}

/// Shape of the tensor in `slot`, checked for rank and per-dimension bounds.
///
/// Absent optional operands yield `None`; mandatory ones were checked before.
fn shape<'a>(
    context: ErrorContext,
    operation: &'a Operation,
    slot: usize,
    bounds: &[usize],
) -> Result<Option<&'a [usize]>, ModelError> {
    let Some(tensor) = operation.operand(slot) else {
        return Ok(None);
    };
    let context = context.operand(slot);
    context.expect_equal(tensor.shape.len(), bounds.len(), ItemType::ShapeNumberOfDimensions)?;
    for (index, (&dimension, &max)) in tensor.shape.iter().zip(bounds).enumerate() {
        let context = context.dimension(index);
        context.expect_greater_than_zero(dimension, ItemType::ShapeDimensions)?;
        context.expect_in_range(dimension, 1, max, ItemType::ShapeDimensions)?;
    }
    Ok(Some(&tensor.shape))
}

fn mandatory_shape<'a>(
    context: ErrorContext,
    operation: &'a Operation,
    slot: usize,
    bounds: &[usize],
) -> Result<&'a [usize], ModelError> {
    let shape = shape(context, operation, slot, bounds)?;
    context
        .operand(slot)
        .expect_present(shape, ItemType::OperationOperands)
}

fn expect_dimension(
    context: ErrorContext,
    slot: usize,
    dimension: usize,
    actual: usize,
    expected: usize,
) -> Check {
    context
        .operand(slot)
        .dimension(dimension)
        .expect_equal(actual, expected, ItemType::ShapeDimensions)
}

fn validate_affine(context: ErrorContext, operation: &Operation, limits: &DeviceLimits) -> Check {
    let input = mandatory_shape(
        context,
        operation,
        operand::INPUT,
        &[limits.max_input_elements, limits.max_groups],
    )?;
    let (elements, groups) = (input[0], input[1]);
    context
        .operand(operand::INPUT)
        .dimension(0)
        .expect_multiple_of(elements, 8, ItemType::ShapeDimensions)?;

    let output = mandatory_shape(
        context,
        operation,
        operand::OUTPUT,
        &[limits.max_output_elements, limits.max_groups],
    )?;
    let rows = output[0];
    expect_dimension(context, operand::OUTPUT, 1, output[1], groups)?;

    if operation.kind == OperationKind::FullyConnectedAffine {
        let weights = mandatory_shape(
            context,
            operation,
            operand::WEIGHTS,
            &[limits.max_output_elements, limits.max_input_elements],
        )?;
        expect_dimension(context, operand::WEIGHTS, 0, weights[0], rows)?;
        expect_dimension(context, operand::WEIGHTS, 1, weights[1], elements)?;
    } else {
        expect_dimension(context, operand::OUTPUT, 0, rows, elements)?;
        let weights = mandatory_shape(
            context,
            operation,
            operand::WEIGHTS,
            &[limits.max_output_elements],
        )?;
        expect_dimension(context, operand::WEIGHTS, 0, weights[0], rows)?;
    }

    let biases = mandatory_shape(
        context,
        operation,
        operand::BIASES,
        &[limits.max_output_elements],
    )?;
    expect_dimension(context, operand::BIASES, 0, biases[0], rows)?;

    shape(context, operation, operand::ACTIVATION, &[limits.max_pwl_segments])?;
    Ok(())
}

fn validate_convolution(
    context: ErrorContext,
    operation: &Operation,
    limits: &DeviceLimits,
) -> Check {
    let Parameters::Convolution { stride, pooling } = operation.parameters else {
        return Err(context.error(ItemType::OperationParameters, ErrorReason::ArgumentMissing, 0));
    };

    let input = mandatory_shape(context, operation, operand::INPUT, &[limits.max_input_elements])?;
    let elements = input[0];

    let filters = mandatory_shape(
        context,
        operation,
        operand::WEIGHTS,
        &[limits.max_filters, limits.max_filter_size],
    )?;
    let (filter_count, filter_size) = (filters[0], filters[1]);
    context
        .operand(operand::WEIGHTS)
        .dimension(1)
        .expect_in_range(filter_size, 1, elements, ItemType::ShapeDimensions)?;

    context
        .parameter(parameter::CONVOLUTION_STRIDE)
        .expect_in_range(stride, 1, filter_size, ItemType::Parameter)?;

    let mut outputs = convolution_outputs(elements, filter_size, stride);
    if let Some(Pooling { window, stride: pool_stride, .. }) = pooling {
        context
            .parameter(parameter::POOLING_WINDOW)
            .expect_in_range(window, 1, limits.max_pool_window.min(outputs), ItemType::Parameter)?;
        context
            .parameter(parameter::POOLING_STRIDE)
            .expect_in_range(pool_stride, 1, window, ItemType::Parameter)?;
        outputs = pooled_outputs(outputs, window, pool_stride);
    }

    let output = mandatory_shape(
        context,
        operation,
        operand::OUTPUT,
        &[limits.max_output_elements, limits.max_filters],
    )?;
    expect_dimension(context, operand::OUTPUT, 0, output[0], outputs)?;
    expect_dimension(context, operand::OUTPUT, 1, output[1], filter_count)?;

    let biases = mandatory_shape(context, operation, operand::BIASES, &[limits.max_filters])?;
    expect_dimension(context, operand::BIASES, 0, biases[0], filter_count)?;

    shape(context, operation, operand::ACTIVATION, &[limits.max_pwl_segments])?;
    Ok(())
}

fn validate_copy(context: ErrorContext, operation: &Operation, limits: &DeviceLimits) -> Check {
    let Parameters::Copy { copy_columns } = operation.parameters else {
        return Err(context.error(ItemType::OperationParameters, ErrorReason::ArgumentMissing, 0));
    };
    let bounds = [limits.max_groups, limits.max_input_elements];
    let input = mandatory_shape(context, operation, operand::INPUT, &bounds)?;
    let output = mandatory_shape(context, operation, operand::OUTPUT, &bounds)?;
    expect_dimension(context, operand::OUTPUT, 0, output[0], input[0])?;

    context.parameter(parameter::COPY_COLUMNS).expect_in_range(
        copy_columns,
        1,
        input[1].min(output[1]),
        ItemType::Parameter,
    )
}

fn validate_transposition(
    context: ErrorContext,
    operation: &Operation,
    limits: &DeviceLimits,
) -> Check {
    let bounds = [limits.max_input_elements, limits.max_input_elements];
    let input = mandatory_shape(context, operation, operand::INPUT, &bounds)?;
    let output = mandatory_shape(context, operation, operand::OUTPUT, &bounds)?;
    expect_dimension(context, operand::OUTPUT, 0, output[0], input[1])?;
    expect_dimension(context, operand::OUTPUT, 1, output[1], input[0])?;
    let narrow = input[0].min(input[1]);
    context.operand(operand::INPUT).expect(
        narrow <= limits.max_groups,
        ItemType::ShapeDimensions,
        ErrorReason::AboveRange,
        narrow as i64,
    )
}

fn validate_gmm(context: ErrorContext, operation: &Operation, limits: &DeviceLimits) -> Check {
    if !matches!(operation.parameters, Parameters::Gmm { .. }) {
        return Err(context.error(ItemType::OperationParameters, ErrorReason::ArgumentMissing, 0));
    }

    let input = mandatory_shape(
        context,
        operation,
        operand::INPUT,
        &[limits.max_groups, limits.max_gmm_features],
    )?;
    let (groups, features) = (input[0], input[1]);

    let mixture_bounds = [limits.max_gmm_states, limits.max_gmm_mixtures, limits.max_gmm_features];
    let means = mandatory_shape(context, operation, operand::MEANS, &mixture_bounds)?;
    let (states, mixtures) = (means[0], means[1]);
    expect_dimension(context, operand::MEANS, 2, means[2], features)?;

    let variances =
        mandatory_shape(context, operation, operand::INVERSE_COVARIANCES, &mixture_bounds)?;
    for (dimension, expected) in [states, mixtures, features].into_iter().enumerate() {
        let actual = variances[dimension];
        expect_dimension(context, operand::INVERSE_COVARIANCES, dimension, actual, expected)?;
    }

    let constants = mandatory_shape(
        context,
        operation,
        operand::CONSTANTS,
        &[limits.max_gmm_states, limits.max_gmm_mixtures],
    )?;
    expect_dimension(context, operand::CONSTANTS, 0, constants[0], states)?;
    expect_dimension(context, operand::CONSTANTS, 1, constants[1], mixtures)?;

    let output = mandatory_shape(
        context,
        operation,
        operand::OUTPUT,
        &[limits.max_gmm_states, limits.max_groups],
    )?;
    expect_dimension(context, operand::OUTPUT, 0, output[0], states)?;
    expect_dimension(context, operand::OUTPUT, 1, output[1], groups)
}

/// The output buffer may not also be read by the same operation.
fn validate_aliasing(context: ErrorContext, operation: &Operation) -> Check {
    let Some(output) = operation
        .operand(operand::OUTPUT)
        .and_then(|tensor| tensor.buffer.as_ref())
    else {
        return Ok(());
    };
    for (index, slot) in operation.operands.iter().enumerate() {
        if index == operand::OUTPUT {
            continue;
        }
        if let Some(buffer) = slot.as_ref().and_then(|tensor| tensor.buffer.as_ref()) {
            context.operand(index).expect(
                !buffer.ptr_eq(output),
                ItemType::OperandData,
                ErrorReason::ArgumentInvalid,
                operand::OUTPUT as i64,
            )?;
        }
    }
    Ok(())
}

fn data_type(operation: &Operation, slot: usize) -> DataType {
    operation
        .operand(slot)
        .map_or(DataType::None, |tensor| tensor.data_type)
}

/// Dispatch key of a structurally valid operation.
pub fn kernel_mode(operation: &Operation) -> KernelMode {
    match operation.kind {
        OperationKind::Copy | OperationKind::Transposition => {
            KernelMode::data_movement(data_type(operation, operand::INPUT))
        }
        OperationKind::Gmm => KernelMode::new(
            data_type(operation, operand::INPUT),
            data_type(operation, operand::INVERSE_COVARIANCES),
            data_type(operation, operand::CONSTANTS),
            data_type(operation, operand::OUTPUT),
            true,
        ),
        _ => KernelMode::new(
            data_type(operation, operand::INPUT),
            data_type(operation, operand::WEIGHTS),
            data_type(operation, operand::BIASES),
            data_type(operation, operand::OUTPUT),
            operation.operand(operand::ACTIVATION).is_none(),
        ),
    }
}

fn check_capability(
    context: ErrorContext,
    kind: OperationKind,
    mode: &KernelMode,
    generation: DeviceGeneration,
) -> Check {
    if CapabilityMatrix::is_supported(kind, mode, generation) {
        return Ok(());
    }
    tracing::debug!(operation = %kind, %mode, %generation, "kernel_mode_not_supported");
    Err(context.error(ItemType::OperandMode, ErrorReason::NotInSet, kind as i64))
}
