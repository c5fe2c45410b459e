//! Per-worker scratch memory
//!
//! Every worker thread owns one [`KernelBuffers`]. Kernels borrow it mutably
//! through the execution context, so no two kernels ever share scratch space.

use crate::error::{KernelError, Result};

/// Maximum number of input vectors processed together.
pub const MAX_GROUPS: usize = 8;

/// Maximum elements in one input vector (largest multiple of 8 below 2^16).
pub const MAX_INPUT_ELEMENTS: usize = 65_528;

/// Maximum convolution filters in one operation.
pub const MAX_FILTERS: usize = 4_096;

/// Maximum fused pooling window.
pub const POOL_WINDOW_MAX: usize = 6;

/// Scratch regions used by the reference kernels.
///
/// The deinterleave region holds `MAX_GROUPS * MAX_INPUT_ELEMENTS` values so
/// an affine input can always be transposed into it. The pooling region holds
/// one accumulator per filter. The convolution region starts empty and grows
/// on demand.
#[derive(Debug)]
pub struct KernelBuffers {
    deinterleave: Vec<i16>,
    pool: Vec<i64>,
    convolution: Vec<i64>,
}

fn allocate<T: Copy + Default>(region: &'static str, len: usize) -> Result<Vec<T>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| KernelError::ScratchAllocation {
            region,
            bytes: len * std::mem::size_of::<T>(),
        })?;
    buffer.resize(len, T::default());
    Ok(buffer)
}

impl KernelBuffers {
    pub const DEINTERLEAVE_LEN: usize = MAX_GROUPS * MAX_INPUT_ELEMENTS;
    pub const POOL_LEN: usize = MAX_FILTERS;

    /// Allocate the fixed scratch regions.
    pub fn new() -> Result<Self> {
        let buffers = Self {
            deinterleave: allocate("deinterleave", Self::DEINTERLEAVE_LEN)?,
            pool: allocate("pool", Self::POOL_LEN)?,
            convolution: Vec::new(),
        };
        tracing::trace!(bytes = buffers.size_bytes(), "kernel_buffers_allocated");
        Ok(buffers)
    }

    /// Make sure the convolution region holds at least `len` accumulators.
    pub fn reserve_convolution(&mut self, len: usize) -> Result<()> {
        if self.convolution.len() >= len {
            return Ok(());
        }
        let additional = len - self.convolution.len();
        self.convolution
            .try_reserve_exact(additional)
            .map_err(|_| KernelError::ScratchAllocation {
                region: "convolution",
                bytes: len * std::mem::size_of::<i64>(),
            })?;
        self.convolution.resize(len, 0);
        Ok(())
    }

    /// Deinterleave region sized for `groups` vectors of `elements` values.
    pub fn deinterleave_mut(&mut self, groups: usize, elements: usize) -> &mut [i16] {
        &mut self.deinterleave[..groups * elements]
    }

    pub fn pool_mut(&mut self) -> &mut [i64] {
        &mut self.pool
    }

    /// Convolution region; call [`Self::reserve_convolution`] first.
    pub fn convolution_mut(&mut self, len: usize) -> &mut [i64] {
        &mut self.convolution[..len]
    }

    /// Convolution and pooling regions borrowed together.
    pub fn convolution_and_pool_mut(&mut self, len: usize) -> (&mut [i64], &mut [i64]) {
        (&mut self.convolution[..len], &mut self.pool)
    }

    /// Current total size of all regions.
    pub fn size_bytes(&self) -> usize {
        self.deinterleave.len() * std::mem::size_of::<i16>()
            + self.pool.len() * std::mem::size_of::<i64>()
            + self.convolution.len() * std::mem::size_of::<i64>()
    }
}
