//! Reference kernels
//!
//! Each operation has one generic body. The SSE4, AVX1 and AVX2 variants are
//! that body compiled under the matching `target_feature` set by
//! `simd_variant!`; a variant whose features the running CPU lacks falls
//! back to the plain body.

pub mod activation;
pub mod affine;
pub mod convolution;
pub mod gmm;
pub mod movement;

use crate::types::{CompoundBias, DataType};

/// Generate a safe wrapper running `$body` with extra target features enabled.
macro_rules! simd_variant {
    (
        $(#[$meta:meta])*
        $name:ident = $body:ident::<$($generic:ident: $bound:path),*>($config:ident)
            features [$($feature:tt),+]
    ) => {
        $(#[$meta])*
        pub(crate) fn $name<$($generic: $bound),*>(
            config: &mut $config<'_>,
            context: &mut $crate::config::ExecutionContext<'_>,
        ) {
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            {
                $(#[target_feature(enable = $feature)])+
                unsafe fn accelerated<$($generic: $bound),*>(
                    config: &mut $config<'_>,
                    context: &mut $crate::config::ExecutionContext<'_>,
                ) {
                    $body::<$($generic),*>(config, context)
                }

                if $(std::arch::is_x86_feature_detected!($feature))&&+ {
                    // SAFETY: every enabled feature was detected on this CPU.
                    unsafe { accelerated::<$($generic),*>(config, context) };
                    return;
                }
            }
            $body::<$($generic),*>(config, context)
        }
    };
}
pub(crate) use simd_variant;

/// Rust element type backing a [`DataType`].
pub trait Element: bytemuck::Pod {
    const DATA_TYPE: DataType;
}

macro_rules! element {
    ($($ty:ty => $data_type:ident),+ $(,)?) => {
        $(impl Element for $ty {
            const DATA_TYPE: DataType = DataType::$data_type;
        })+
    };
}

element! {
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    CompoundBias => CompoundBias,
}

/// Input element widened into the int16 deinterleave scratch.
pub trait InputElement: bytemuck::Pod {
    fn to_i16(self) -> i16;
}

impl InputElement for i8 {
    fn to_i16(self) -> i16 {
        i16::from(self)
    }
}

impl InputElement for i16 {
    fn to_i16(self) -> i16 {
        self
    }
}

pub trait WeightElement: bytemuck::Pod {
    fn to_i64(self) -> i64;
}

impl WeightElement for i8 {
    fn to_i64(self) -> i64 {
        i64::from(self)
    }
}

impl WeightElement for i16 {
    fn to_i64(self) -> i64 {
        i64::from(self)
    }
}

/// Bias element; compound biases also scale the row's weights.
pub trait BiasElement: bytemuck::Pod {
    fn value(self) -> i64;

    fn multiplier(self) -> i64 {
        1
    }
}

impl BiasElement for i8 {
    fn value(self) -> i64 {
        i64::from(self)
    }
}

impl BiasElement for i16 {
    fn value(self) -> i64 {
        i64::from(self)
    }
}

impl BiasElement for i32 {
    fn value(self) -> i64 {
        i64::from(self)
    }
}

impl BiasElement for CompoundBias {
    fn value(self) -> i64 {
        i64::from(self.bias)
    }

    fn multiplier(self) -> i64 {
        i64::from(self.multiplier)
    }
}

/// Clamp `value` into `[min, max]`, counting a clamp.
#[inline]
pub(crate) fn saturate(value: i64, min: i64, max: i64, saturations: &mut u32) -> i64 {
    if value < min {
        *saturations = saturations.saturating_add(1);
        min
    } else if value > max {
        *saturations = saturations.saturating_add(1);
        max
    } else {
        value
    }
}

#[inline]
pub(crate) fn saturate_i32(value: i64, saturations: &mut u32) -> i32 {
    saturate(value, i64::from(i32::MIN), i64::from(i32::MAX), saturations) as i32
}

/// Signed output view selected by the operation's output data type.
pub(crate) enum OutputSlice<'a> {
    Int8(&'a mut [i8]),
    Int16(&'a mut [i16]),
    Int32(&'a mut [i32]),
}

impl<'a> OutputSlice<'a> {
    /// Types other than int8 and int16 are written as int32.
    pub(crate) fn new(data_type: DataType, bytes: &'a mut [u8]) -> Self {
        match data_type {
            DataType::Int8 => OutputSlice::Int8(bytemuck::cast_slice_mut(bytes)),
            DataType::Int16 => OutputSlice::Int16(bytemuck::cast_slice_mut(bytes)),
            _ => OutputSlice::Int32(bytemuck::cast_slice_mut(bytes)),
        }
    }

    #[inline]
    pub(crate) fn store(&mut self, index: usize, value: i64, saturations: &mut u32) {
        match self {
            OutputSlice::Int8(out) => {
                let (min, max) = (i64::from(i8::MIN), i64::from(i8::MAX));
                out[index] = saturate(value, min, max, saturations) as i8
            }
            OutputSlice::Int16(out) => {
                out[index] =
                    saturate(value, i64::from(i16::MIN), i64::from(i16::MAX), saturations) as i16
            }
            OutputSlice::Int32(out) => out[index] = saturate_i32(value, saturations),
        }
    }
}
