//! Model description handed to device registration

use crate::memory::TensorBuffer;
use gna_kernels::{DataType, OperationKind, Pooling};

/// Operand slots shared by all operation kinds.
pub mod operand {
    pub const INPUT: usize = 0;
    pub const OUTPUT: usize = 1;
    /// Weights of affine operations, filters of convolutions.
    pub const WEIGHTS: usize = 2;
    pub const BIASES: usize = 3;
    pub const ACTIVATION: usize = 4;

    pub const MEANS: usize = 2;
    pub const INVERSE_COVARIANCES: usize = 3;
    pub const CONSTANTS: usize = 4;
}

/// Parameter slots per operation kind.
pub mod parameter {
    pub const CONVOLUTION_STRIDE: usize = 0;
    pub const POOLING_WINDOW: usize = 1;
    pub const POOLING_STRIDE: usize = 2;

    pub const COPY_COLUMNS: usize = 0;

    pub const MAXIMUM_SCORE: usize = 0;
}

/// Typed, shaped operand.
///
/// Input and output tensors may be registered without memory and bound later
/// through a request configuration. Every other operand carries its buffer.
#[derive(Debug, Clone)]
pub struct Tensor {
    pub data_type: DataType,
    pub shape: Vec<usize>,
    pub buffer: Option<TensorBuffer>,
}

impl Tensor {
    pub fn new(data_type: DataType, shape: impl Into<Vec<usize>>) -> Self {
        Self {
            data_type,
            shape: shape.into(),
            buffer: None,
        }
    }

    pub fn with_buffer(mut self, buffer: TensorBuffer) -> Self {
        self.buffer = Some(buffer);
        self
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Bytes needed to hold every element.
    pub fn size_bytes(&self) -> usize {
        self.element_count() * self.data_type.size()
    }

    pub fn dimension(&self, index: usize) -> usize {
        self.shape.get(index).copied().unwrap_or(0)
    }
}

/// Scalar settings of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parameters {
    None,
    Convolution { stride: usize, pooling: Option<Pooling> },
    Copy { copy_columns: usize },
    Gmm { maximum_score: u32 },
}

/// One stage of a model.
///
/// Operand shapes:
///
/// | Kind | input | output | slot 2 | slot 3 | slot 4 |
/// |---|---|---|---|---|---|
/// | affine | `[elements, groups]` | `[rows, groups]` | weights `[rows, elements]` | biases `[rows]` | activation `[segments]` |
/// | element-wise | `[elements, groups]` | `[elements, groups]` | weights `[elements]` | biases `[elements]` | activation |
/// | convolution | `[elements]` | `[outputs, filters]` | filters `[filters, size]` | biases `[filters]` | activation |
/// | copy | `[rows, columns]` | `[rows, columns]` | | | |
/// | transposition | `[rows, columns]` | `[columns, rows]` | | | |
/// | gmm | `[groups, features]` | `[states, groups]` | means `[states, mixtures, features]` | inverse covariances, same shape | constants `[states, mixtures]` |
#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OperationKind,
    pub operands: Vec<Option<Tensor>>,
    pub parameters: Parameters,
}

impl Operation {
    pub fn fully_connected(
        input: Tensor,
        output: Tensor,
        weights: Tensor,
        biases: Tensor,
        activation: Option<Tensor>,
    ) -> Self {
        Self::weighted(
            OperationKind::FullyConnectedAffine,
            input,
            output,
            weights,
            biases,
            activation,
        )
    }

    pub fn element_wise(
        input: Tensor,
        output: Tensor,
        weights: Tensor,
        biases: Tensor,
        activation: Option<Tensor>,
    ) -> Self {
        Self::weighted(OperationKind::ElementWiseAffine, input, output, weights, biases, activation)
    }

    fn weighted(
        kind: OperationKind,
        input: Tensor,
        output: Tensor,
        weights: Tensor,
        biases: Tensor,
        activation: Option<Tensor>,
    ) -> Self {
        Self {
            kind,
            operands: vec![Some(input), Some(output), Some(weights), Some(biases), activation],
            parameters: Parameters::None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn convolution(
        input: Tensor,
        output: Tensor,
        filters: Tensor,
        biases: Tensor,
        activation: Option<Tensor>,
        stride: usize,
        pooling: Option<Pooling>,
    ) -> Self {
        Self {
            kind: OperationKind::Convolution,
            operands: vec![Some(input), Some(output), Some(filters), Some(biases), activation],
            parameters: Parameters::Convolution { stride, pooling },
        }
    }

    pub fn copy(input: Tensor, output: Tensor, copy_columns: usize) -> Self {
        Self {
            kind: OperationKind::Copy,
            operands: vec![Some(input), Some(output)],
            parameters: Parameters::Copy { copy_columns },
        }
    }

    pub fn transposition(input: Tensor, output: Tensor) -> Self {
        Self {
            kind: OperationKind::Transposition,
            operands: vec![Some(input), Some(output)],
            parameters: Parameters::None,
        }
    }

    pub fn gmm(
        input: Tensor,
        output: Tensor,
        means: Tensor,
        inverse_covariances: Tensor,
        constants: Tensor,
        maximum_score: u32,
    ) -> Self {
        Self {
            kind: OperationKind::Gmm,
            operands: vec![
                Some(input),
                Some(output),
                Some(means),
                Some(inverse_covariances),
                Some(constants),
            ],
            parameters: Parameters::Gmm { maximum_score },
        }
    }

    pub fn operand(&self, index: usize) -> Option<&Tensor> {
        self.operands.get(index).and_then(Option::as_ref)
    }
}

/// Operand count each kind carries, optional slots included.
pub const fn operand_count(kind: OperationKind) -> usize {
    match kind {
        OperationKind::Copy | OperationKind::Transposition => 2,
        _ => 5,
    }
}

/// Whether the slot may be left out of an operation.
pub const fn is_optional(kind: OperationKind, index: usize) -> bool {
    match kind {
        OperationKind::FullyConnectedAffine
        | OperationKind::ElementWiseAffine
        | OperationKind::Convolution => index == operand::ACTIVATION,
        _ => false,
    }
}

/// An ordered list of operations.
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub operations: Vec<Operation>,
}

impl Model {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self { operations }
    }

    pub fn push(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_sizes() {
        let tensor = Tensor::new(DataType::Int16, [16, 4]);
        assert_eq!(tensor.element_count(), 64);
        assert_eq!(tensor.size_bytes(), 128);
        assert_eq!(tensor.dimension(1), 4);
        assert_eq!(tensor.dimension(2), 0);
    }

    #[test]
    fn test_optional_slots() {
        assert!(is_optional(OperationKind::Convolution, operand::ACTIVATION));
        assert!(!is_optional(OperationKind::Gmm, operand::CONSTANTS));
        assert_eq!(operand_count(OperationKind::Transposition), 2);

        let copy = Operation::copy(
            Tensor::new(DataType::Int16, [2, 8]),
            Tensor::new(DataType::Int16, [2, 8]),
            8,
        );
        assert_eq!(copy.operands.len(), operand_count(copy.kind));
        assert!(copy.operand(operand::WEIGHTS).is_none());
    }
}
