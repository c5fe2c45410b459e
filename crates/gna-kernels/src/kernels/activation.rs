//! Piecewise-linear activation

use crate::types::PwlSegment;

/// Evaluate the activation at `x`.
///
/// Uses the last segment whose base is not above `x`, or the first segment
/// when `x` lies below all of them. The result is not clamped; the caller
/// stores it with saturation into the output type.
#[inline]
pub fn activate(segments: &[PwlSegment], x: i32) -> i64 {
    let Some(first) = segments.first() else {
        return i64::from(x);
    };
    let index = segments.partition_point(|segment| segment.base() <= x);
    let segment = if index == 0 { first } else { &segments[index - 1] };

    let delta = i64::from(x) - i64::from(segment.base());
    i64::from(segment.y_base) + ((delta * i64::from(segment.slope)) >> segment.shift())
}
