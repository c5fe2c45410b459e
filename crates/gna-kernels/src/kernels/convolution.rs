//! One-dimensional convolution with fused pooling

use super::activation::activate;
use super::{saturate_i32, simd_variant, BiasElement, InputElement, OutputSlice, WeightElement};
use crate::config::{ConvolutionConfig, ExecutionContext, PoolingMode};

/// Convolution into scratch, optional pooling, then activation.
///
/// # Panics
///
/// The convolution scratch must already hold
/// [`ConvolutionConfig::scratch_len`] accumulators.
#[inline(always)]
pub(crate) fn convolution_generic<I: InputElement, W: WeightElement, B: BiasElement>(
    config: &mut ConvolutionConfig<'_>,
    context: &mut ExecutionContext<'_>,
) {
    let filter_count = config.filter_count;
    let filter_size = config.filter_size;
    let stride = config.stride;
    let conv_outputs = config.convolution_outputs();
    let input: &[I] = bytemuck::cast_slice(config.input);
    let filters: &[W] = bytemuck::cast_slice(config.filters);
    let biases: &[B] = bytemuck::cast_slice(config.biases);
    let activation = config.activation;
    let pooling = config.pooling;
    let outputs = config.outputs();

    let mut saturations = 0u32;
    let (scratch, pool) = context
        .buffers
        .convolution_and_pool_mut(conv_outputs * filter_count);

    for (filter, coefficients) in filters.chunks_exact(filter_size).take(filter_count).enumerate() {
        let bias = biases[filter];
        for output in 0..conv_outputs {
            let window = &input[output * stride..output * stride + filter_size];
            let sum: i64 = coefficients
                .iter()
                .zip(window)
                .map(|(weight, x)| weight.to_i64() * bias.multiplier() * i64::from(x.to_i16()))
                .sum();
            scratch[output * filter_count + filter] =
                i64::from(saturate_i32(sum + bias.value(), &mut saturations));
        }
    }

    let mut out = OutputSlice::new(config.output_type, config.output);
    let mut emit = |index: usize, value: i64, saturations: &mut u32| {
        let accumulator = saturate_i32(value, saturations);
        let value = match activation {
            Some(segments) => activate(segments, accumulator),
            None => i64::from(accumulator),
        };
        out.store(index, value, saturations);
    };

    match pooling {
        None => {
            for (index, &value) in scratch.iter().enumerate() {
                emit(index, value, &mut saturations);
            }
        }
        Some(pooling) => {
            let accumulators = &mut pool[..filter_count];
            for output in 0..outputs {
                let start = output * pooling.stride;
                accumulators.fill(match pooling.mode {
                    PoolingMode::Max => i64::MIN,
                    PoolingMode::Sum => 0,
                });
                for step in start..start + pooling.window {
                    let row = &scratch[step * filter_count..(step + 1) * filter_count];
                    for (accumulator, &value) in accumulators.iter_mut().zip(row) {
                        *accumulator = match pooling.mode {
                            PoolingMode::Max => (*accumulator).max(value),
                            PoolingMode::Sum => *accumulator + value,
                        };
                    }
                }
                for (filter, &value) in accumulators.iter().enumerate() {
                    emit(output * filter_count + filter, value, &mut saturations);
                }
            }
        }
    }
    context.add_saturations(saturations);
}

simd_variant!(
    convolution_sse4 = convolution_generic::<I: InputElement, W: WeightElement, B: BiasElement>(ConvolutionConfig)
        features ["sse4.1", "sse4.2"]
);
simd_variant!(
    convolution_avx1 = convolution_generic::<I: InputElement, W: WeightElement, B: BiasElement>(ConvolutionConfig)
        features ["avx"]
);
simd_variant!(
    convolution_avx2 = convolution_generic::<I: InputElement, W: WeightElement, B: BiasElement>(ConvolutionConfig)
        features ["avx2"]
);
