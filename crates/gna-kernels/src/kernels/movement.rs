//! Copy and transposition of int16 matrices

use super::simd_variant;
use crate::config::{CopyConfig, ExecutionContext, TransposeConfig};

#[inline(always)]
pub(crate) fn copy_generic(config: &mut CopyConfig<'_>, _context: &mut ExecutionContext<'_>) {
    let input: &[i16] = bytemuck::cast_slice(config.input);
    let output: &mut [i16] = bytemuck::cast_slice_mut(config.output);
    let columns = config.copy_columns;

    for row in 0..config.rows {
        let source = row * config.input_columns;
        let target = row * config.output_columns;
        output[target..target + columns].copy_from_slice(&input[source..source + columns]);
    }
}

#[inline(always)]
pub(crate) fn transpose_generic(
    config: &mut TransposeConfig<'_>,
    _context: &mut ExecutionContext<'_>,
) {
    let input: &[i16] = bytemuck::cast_slice(config.input);
    let output: &mut [i16] = bytemuck::cast_slice_mut(config.output);
    let (rows, columns) = (config.rows, config.columns);

    for (row, values) in input.chunks_exact(columns).take(rows).enumerate() {
        for (column, &value) in values.iter().enumerate() {
            output[column * rows + row] = value;
        }
    }
}

simd_variant!(copy_sse4 = copy_generic::<>(CopyConfig) features ["sse4.1", "sse4.2"]);
simd_variant!(copy_avx1 = copy_generic::<>(CopyConfig) features ["avx"]);
simd_variant!(copy_avx2 = copy_generic::<>(CopyConfig) features ["avx2"]);
simd_variant!(transpose_sse4 = transpose_generic::<>(TransposeConfig) features ["sse4.1", "sse4.2"]);
simd_variant!(transpose_avx1 = transpose_generic::<>(TransposeConfig) features ["avx"]);
simd_variant!(transpose_avx2 = transpose_generic::<>(TransposeConfig) features ["avx2"]);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::KernelBuffers;

    #[test]
    fn test_copy_leading_columns() {
        let input: [i16; 6] = [1, 2, 3, 4, 5, 6];
        let mut output = [-1i16; 8];
        let mut buffers = KernelBuffers::new().unwrap();
        let mut context = ExecutionContext::new(&mut buffers);

        let mut config = CopyConfig {
            rows: 2,
            input_columns: 3,
            output_columns: 4,
            copy_columns: 2,
            input: bytemuck::cast_slice(&input),
            output: bytemuck::cast_slice_mut(&mut output),
        };
        copy_sse4(&mut config, &mut context);

        assert_eq!(output, [1, 2, -1, -1, 4, 5, -1, -1]);
    }

    #[test]
    fn test_transpose_rectangular() {
        let input: [i16; 6] = [1, 2, 3, 4, 5, 6];
        let mut output = [0i16; 6];
        let mut buffers = KernelBuffers::new().unwrap();
        let mut context = ExecutionContext::new(&mut buffers);

        let mut config = TransposeConfig {
            rows: 2,
            columns: 3,
            input: bytemuck::cast_slice(&input),
            output: bytemuck::cast_slice_mut(&mut output),
        };
        transpose_generic(&mut config, &mut context);

        assert_eq!(output, [1, 4, 2, 5, 3, 6]);
        assert_eq!(context.saturations, 0);
    }
}
