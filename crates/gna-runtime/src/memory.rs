//! Tensor buffers shared between callers and workers
//!
//! A [`TensorBuffer`] is a cheaply clonable handle to an 8-byte aligned byte
//! region. Kernels read operands through shared guards and write outputs
//! through an exclusive guard, so one buffer can be an output of operation
//! `i` and an input of operation `i + 1` of the same model.

use crate::error::{Error, Result};
use bytemuck::Pod;
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::fmt;
use std::mem::size_of;
use std::sync::Arc;
use std::time::Instant;

const WORD: usize = size_of::<u64>();

#[derive(Clone)]
pub struct TensorBuffer {
    words: Arc<RwLock<Vec<u64>>>,
    len: usize,
}

impl TensorBuffer {
    /// Allocate `len` zeroed bytes.
    pub fn zeroed(len: usize) -> Result<Self> {
        let start = Instant::now();
        let word_count = len.div_ceil(WORD);
        let mut words = Vec::new();
        words
            .try_reserve_exact(word_count)
            .map_err(|_| Error::ResourceAllocation(format!("tensor buffer of {len} bytes")))?;
        words.resize(word_count, 0);

        let duration_us = start.elapsed().as_micros() as u64;
        gna_tracing::performance::record_allocation(len, "tensor", duration_us);
        Ok(Self {
            words: Arc::new(RwLock::new(words)),
            len,
        })
    }

    /// Allocate a buffer holding a copy of `values`.
    pub fn from_slice<T: Pod>(values: &[T]) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let buffer = Self::zeroed(bytes.len())?;
        buffer.write()[..].copy_from_slice(bytes);
        Ok(buffer)
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Shared view; several may be held by one thread at once.
    pub fn read(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        let len = self.len;
        RwLockReadGuard::map(self.words.read_recursive(), |words| {
            &bytemuck::cast_slice::<u64, u8>(words.as_slice())[..len]
        })
    }

    pub fn write(&self) -> MappedRwLockWriteGuard<'_, [u8]> {
        let len = self.len;
        RwLockWriteGuard::map(self.words.write(), |words| {
            &mut bytemuck::cast_slice_mut::<u64, u8>(words.as_mut_slice())[..len]
        })
    }

    /// Overwrite the leading bytes with `values`.
    ///
    /// Fails when `values` does not fit.
    pub fn copy_from<T: Pod>(&self, values: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        if bytes.len() > self.len {
            return Err(Error::BufferTooSmall {
                required: bytes.len(),
                available: self.len,
            });
        }
        self.write()[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Copy the contents out as elements of `T`; a trailing partial element is dropped.
    pub fn to_vec<T: Pod>(&self) -> Vec<T> {
        self.read()
            .chunks_exact(size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }

    /// Whether both handles refer to the same memory.
    pub fn ptr_eq(&self, other: &TensorBuffer) -> bool {
        Arc::ptr_eq(&self.words, &other.words)
    }
}

impl fmt::Debug for TensorBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorBuffer")
            .field("len", &self.len)
            .field("handles", &Arc::strong_count(&self.words))
            .finish()
    }
}
