//! Gaussian-mixture scoring

use super::simd_variant;
use crate::config::{ExecutionContext, GmmConfig};

/// Inverse-covariance element (uint8 or uint16).
pub trait VarianceElement: bytemuck::Pod {
    fn to_u64(self) -> u64;
}

impl VarianceElement for u8 {
    fn to_u64(self) -> u64 {
        u64::from(self)
    }
}

impl VarianceElement for u16 {
    fn to_u64(self) -> u64 {
        u64::from(self)
    }
}

/// Score of state `s` for vector `n`: the smallest over its mixtures of
/// `gconst + sum_f (x[n, f] - mean)^2 * ivar`, clamped to `maximum_score`.
#[inline(always)]
pub(crate) fn gmm_generic<V: VarianceElement>(
    config: &mut GmmConfig<'_>,
    context: &mut ExecutionContext<'_>,
) {
    let features = config.feature_count;
    let mixtures = config.mixtures;
    let groups = config.groups;
    let states = config.computed_states();
    let active_list = config.active_list;
    let maximum = u64::from(config.maximum_score);
    let means = config.means;
    let constants: &[u32] = bytemuck::cast_slice(config.constants);
    let variances: &[V] = bytemuck::cast_slice(config.inverse_covariances);
    let input = config.input;
    let output: &mut [u32] = bytemuck::cast_slice_mut(config.output);

    let mut saturations = 0u32;
    for out_state in 0..states {
        let state = active_list.map_or(out_state, |list| list[out_state] as usize);
        for (group, vector) in input.chunks_exact(features).take(groups).enumerate() {
            let mut best = u64::MAX;
            for mixture in 0..mixtures {
                let offset = (state * mixtures + mixture) * features;
                let distance: u64 = vector
                    .iter()
                    .zip(&means[offset..offset + features])
                    .zip(&variances[offset..offset + features])
                    .map(|((&x, &mean), &variance)| {
                        let delta = u64::from(x.abs_diff(mean));
                        delta * delta * variance.to_u64()
                    })
                    .sum();
                let score = u64::from(constants[state * mixtures + mixture]) + distance;
                best = best.min(score);
            }
            output[out_state * groups + group] = if best > maximum {
                saturations = saturations.saturating_add(1);
                config.maximum_score
            } else {
                best as u32
            };
        }
    }
    context.add_saturations(saturations);
}

simd_variant!(gmm_sse4 = gmm_generic::<V: VarianceElement>(GmmConfig) features ["sse4.1", "sse4.2"]);
simd_variant!(gmm_avx1 = gmm_generic::<V: VarianceElement>(GmmConfig) features ["avx"]);
simd_variant!(gmm_avx2 = gmm_generic::<V: VarianceElement>(GmmConfig) features ["avx2"]);
