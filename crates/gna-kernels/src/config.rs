//! Kernel calling contract
//!
//! A kernel is a plain function taking an operation-specific configuration
//! and an [`ExecutionContext`]. Configurations carry raw operand bytes plus
//! the dimensions needed to interpret them; the kernel writes into the output
//! slice, adds every numeric clamp to the context's saturation counter and
//! never allocates or fails.
//!
//! Operand byte slices must be aligned to their element type. Runtime tensor
//! buffers are 8-byte aligned, which covers every element type.

use crate::buffers::KernelBuffers;
use crate::types::{DataType, PwlSegment};

/// Per-invocation state handed to a kernel.
#[derive(Debug)]
pub struct ExecutionContext<'a> {
    /// Scratch memory of the executing worker.
    pub buffers: &'a mut KernelBuffers,
    /// Clamps performed so far in the current request.
    pub saturations: u32,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(buffers: &'a mut KernelBuffers) -> Self {
        Self {
            buffers,
            saturations: 0,
        }
    }

    pub(crate) fn add_saturations(&mut self, count: u32) {
        self.saturations = self.saturations.saturating_add(count);
    }
}

/// Affine transform over `groups` interleaved input vectors.
///
/// Input is `[input_elements x groups]`, output is `[rows x groups]` where
/// `rows` is the active-list length or `output_elements`. Full affine weights
/// are `[output_elements x input_elements]`; diagonal weights hold one value
/// per row and require `input_elements == output_elements`.
#[derive(Debug)]
pub struct AffineConfig<'a> {
    pub input_elements: usize,
    pub output_elements: usize,
    pub groups: usize,
    pub input: &'a [u8],
    pub weights: &'a [u8],
    pub biases: &'a [u8],
    pub activation: Option<&'a [PwlSegment]>,
    /// Rows to compute; results are written compacted in list order.
    pub active_list: Option<&'a [u32]>,
    pub output_type: DataType,
    pub output: &'a mut [u8],
}

impl AffineConfig<'_> {
    /// Number of output rows actually written.
    pub fn computed_rows(&self) -> usize {
        self.active_list.map_or(self.output_elements, <[u32]>::len)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PoolingMode {
    Max,
    Sum,
}

/// Pooling fused after a convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Pooling {
    pub mode: PoolingMode,
    pub window: usize,
    pub stride: usize,
}

/// One-dimensional convolution of a single input vector.
///
/// Filters are `[filter_count x filter_size]`; the output is
/// `[outputs x filter_count]`. The pipeline is convolution, then pooling,
/// then activation.
#[derive(Debug)]
pub struct ConvolutionConfig<'a> {
    pub input_elements: usize,
    pub filter_count: usize,
    pub filter_size: usize,
    pub stride: usize,
    pub input: &'a [u8],
    pub filters: &'a [u8],
    pub biases: &'a [u8],
    pub activation: Option<&'a [PwlSegment]>,
    pub pooling: Option<Pooling>,
    pub output_type: DataType,
    pub output: &'a mut [u8],
}

impl ConvolutionConfig<'_> {
    /// Outputs per filter before pooling.
    pub fn convolution_outputs(&self) -> usize {
        convolution_outputs(self.input_elements, self.filter_size, self.stride)
    }

    /// Outputs per filter after pooling.
    pub fn outputs(&self) -> usize {
        let outputs = self.convolution_outputs();
        match self.pooling {
            Some(pooling) => pooled_outputs(outputs, pooling.window, pooling.stride),
            None => outputs,
        }
    }

    /// Convolution scratch accumulators this configuration needs.
    pub fn scratch_len(&self) -> usize {
        self.convolution_outputs() * self.filter_count
    }
}

pub fn convolution_outputs(input_elements: usize, filter_size: usize, stride: usize) -> usize {
    if filter_size == 0 || stride == 0 || input_elements < filter_size {
        return 0;
    }
    (input_elements - filter_size) / stride + 1
}

pub fn pooled_outputs(outputs: usize, window: usize, stride: usize) -> usize {
    if window == 0 || stride == 0 || outputs < window {
        return 0;
    }
    (outputs - window) / stride + 1
}

/// Copy of the leading `copy_columns` of every int16 row.
#[derive(Debug)]
pub struct CopyConfig<'a> {
    pub rows: usize,
    pub input_columns: usize,
    pub output_columns: usize,
    pub copy_columns: usize,
    pub input: &'a [u8],
    pub output: &'a mut [u8],
}

/// Int16 matrix transposition, `[rows x columns]` into `[columns x rows]`.
#[derive(Debug)]
pub struct TransposeConfig<'a> {
    pub rows: usize,
    pub columns: usize,
    pub input: &'a [u8],
    pub output: &'a mut [u8],
}

/// Gaussian-mixture scoring.
///
/// Input is `[groups x feature_count]` uint8. Means and inverse covariances
/// are `[states x mixtures x feature_count]`, Gaussian constants are
/// `[states x mixtures]` uint32. The output is `[rows x groups]` uint32 where
/// `rows` is the active-list length or `states`.
#[derive(Debug)]
pub struct GmmConfig<'a> {
    pub feature_count: usize,
    pub groups: usize,
    pub states: usize,
    pub mixtures: usize,
    pub input: &'a [u8],
    pub means: &'a [u8],
    pub inverse_covariances: &'a [u8],
    pub constants: &'a [u8],
    /// Scores above this value are clamped and counted.
    pub maximum_score: u32,
    pub active_list: Option<&'a [u32]>,
    pub output: &'a mut [u8],
}

impl GmmConfig<'_> {
    pub fn computed_states(&self) -> usize {
        self.active_list.map_or(self.states, <[u32]>::len)
    }
}

pub type AffineKernel = fn(&mut AffineConfig<'_>, &mut ExecutionContext<'_>);
pub type ConvolutionKernel = fn(&mut ConvolutionConfig<'_>, &mut ExecutionContext<'_>);
pub type CopyKernel = fn(&mut CopyConfig<'_>, &mut ExecutionContext<'_>);
pub type TransposeKernel = fn(&mut TransposeConfig<'_>, &mut ExecutionContext<'_>);
pub type GmmKernel = fn(&mut GmmConfig<'_>, &mut ExecutionContext<'_>);

/// A dispatchable kernel function.
#[derive(Clone, Copy, Debug)]
pub enum Kernel {
    /// Full or diagonal affine transform.
    Affine(AffineKernel),
    Convolution(ConvolutionKernel),
    Copy(CopyKernel),
    Transpose(TransposeKernel),
    Gmm(GmmKernel),
}

impl Kernel {
    pub const fn name(&self) -> &'static str {
        match self {
            Kernel::Affine(_) => "affine",
            Kernel::Convolution(_) => "convolution",
            Kernel::Copy(_) => "copy",
            Kernel::Transpose(_) => "transpose",
            Kernel::Gmm(_) => "gmm",
        }
    }
}
