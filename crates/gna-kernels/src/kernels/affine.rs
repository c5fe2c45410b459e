//! Full and diagonal affine transforms

use super::activation::activate;
use super::{saturate_i32, simd_variant, BiasElement, InputElement, OutputSlice, WeightElement};
use crate::config::{AffineConfig, ExecutionContext};

/// `[elements x groups]` interleaved input into `groups` contiguous vectors.
fn deinterleave<I: InputElement>(input: &[I], scratch: &mut [i16], elements: usize, groups: usize) {
    for (element, row) in input.chunks_exact(groups).take(elements).enumerate() {
        for (group, value) in row.iter().enumerate() {
            scratch[group * elements + element] = value.to_i16();
        }
    }
}

/// Full affine: `out[r, g] = act(sum_k w[r, k] * m[r] * x[k, g] + b[r])`.
#[inline(always)]
pub(crate) fn affine_generic<I: InputElement, W: WeightElement, B: BiasElement>(
    config: &mut AffineConfig<'_>,
    context: &mut ExecutionContext<'_>,
) {
    let elements = config.input_elements;
    let groups = config.groups;
    let rows = config.computed_rows();
    let input: &[I] = bytemuck::cast_slice(config.input);
    let weights: &[W] = bytemuck::cast_slice(config.weights);
    let biases: &[B] = bytemuck::cast_slice(config.biases);
    let active_list = config.active_list;
    let activation = config.activation;

    let mut saturations = 0u32;
    let vectors = context.buffers.deinterleave_mut(groups, elements);
    deinterleave(input, vectors, elements, groups);

    let mut output = OutputSlice::new(config.output_type, config.output);
    for out_row in 0..rows {
        let row = active_list.map_or(out_row, |list| list[out_row] as usize);
        let bias = biases[row];
        let multiplier = bias.multiplier();
        let row_weights = &weights[row * elements..(row + 1) * elements];

        for (group, vector) in vectors.chunks_exact(elements).enumerate() {
            let sum: i64 = row_weights
                .iter()
                .zip(vector)
                .map(|(weight, &x)| weight.to_i64() * multiplier * i64::from(x))
                .sum();
            let accumulator = saturate_i32(sum + bias.value(), &mut saturations);
            let value = match activation {
                Some(segments) => activate(segments, accumulator),
                None => i64::from(accumulator),
            };
            output.store(out_row * groups + group, value, &mut saturations);
        }
    }
    context.add_saturations(saturations);
}

/// Diagonal affine: `out[r, g] = act(w[r] * m[r] * x[r, g] + b[r])`.
#[inline(always)]
pub(crate) fn diagonal_generic<I: InputElement, W: WeightElement, B: BiasElement>(
    config: &mut AffineConfig<'_>,
    context: &mut ExecutionContext<'_>,
) {
    let groups = config.groups;
    let input: &[I] = bytemuck::cast_slice(config.input);
    let weights: &[W] = bytemuck::cast_slice(config.weights);
    let biases: &[B] = bytemuck::cast_slice(config.biases);
    let activation = config.activation;

    let mut saturations = 0u32;
    let mut output = OutputSlice::new(config.output_type, config.output);
    for row in 0..config.output_elements {
        let bias = biases[row];
        let weight = weights[row].to_i64() * bias.multiplier();
        for group in 0..groups {
            let index = row * groups + group;
            let x = i64::from(input[index].to_i16());
            let accumulator = saturate_i32(weight * x + bias.value(), &mut saturations);
            let value = match activation {
                Some(segments) => activate(segments, accumulator),
                None => i64::from(accumulator),
            };
            output.store(index, value, &mut saturations);
        }
    }
    context.add_saturations(saturations);
}

simd_variant!(
    affine_sse4 = affine_generic::<I: InputElement, W: WeightElement, B: BiasElement>(AffineConfig)
        features ["sse4.1", "sse4.2"]
);
simd_variant!(
    affine_avx1 = affine_generic::<I: InputElement, W: WeightElement, B: BiasElement>(AffineConfig)
        features ["avx"]
);
simd_variant!(
    affine_avx2 = affine_generic::<I: InputElement, W: WeightElement, B: BiasElement>(AffineConfig)
        features ["avx2"]
);
simd_variant!(
    diagonal_sse4 = diagonal_generic::<I: InputElement, W: WeightElement, B: BiasElement>(AffineConfig)
        features ["sse4.1", "sse4.2"]
);
simd_variant!(
    diagonal_avx1 = diagonal_generic::<I: InputElement, W: WeightElement, B: BiasElement>(AffineConfig)
        features ["avx"]
);
simd_variant!(
    diagonal_avx2 = diagonal_generic::<I: InputElement, W: WeightElement, B: BiasElement>(AffineConfig)
        features ["avx2"]
);
