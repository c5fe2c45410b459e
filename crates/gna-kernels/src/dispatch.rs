//! Operation and kernel-mode to kernel dispatch
//!
//! The registry below is authored data: one row per typed kernel variant,
//! listing the output configurations it serves and the function for each
//! acceleration mode. [`KernelDispatchTable::global`] expands it once into a
//! two-level ordered map and never mutates it afterwards.

use crate::config::Kernel;
use crate::error::{KernelError, Result};
use crate::kernels::affine::{
    affine_avx1, affine_avx2, affine_generic, affine_sse4, diagonal_avx1, diagonal_avx2,
    diagonal_generic, diagonal_sse4,
};
use crate::kernels::convolution::{
    convolution_avx1, convolution_avx2, convolution_generic, convolution_sse4,
};
use crate::kernels::gmm::{gmm_avx1, gmm_avx2, gmm_generic, gmm_sse4};
use crate::kernels::movement::{
    copy_avx1, copy_avx2, copy_generic, copy_sse4, transpose_avx1, transpose_avx2,
    transpose_generic, transpose_sse4,
};
use crate::kernels::Element;
use crate::types::{AccelerationMode, CompoundBias, DataType, KernelMode, OperationKind};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

/// Kernel per concrete acceleration mode.
pub type KernelMap = BTreeMap<AccelerationMode, Kernel>;

/// Function variants of one typed kernel.
#[derive(Debug, Clone, Copy)]
pub struct KernelSet {
    pub generic: Kernel,
    pub sse4: Option<Kernel>,
    pub avx1: Option<Kernel>,
    pub avx2: Option<Kernel>,
}

/// One registry row.
#[derive(Debug, Clone, Copy)]
pub struct Registration {
    pub operation: OperationKind,
    pub input: DataType,
    pub weight: DataType,
    pub bias: DataType,
    /// `(output type, activation disabled)` pairs served by the kernels.
    pub outputs: &'static [(DataType, bool)],
    pub kernels: KernelSet,
}

impl Registration {
    pub fn modes(&self) -> impl Iterator<Item = KernelMode> + '_ {
        self.outputs.iter().map(|&(output, disabled)| {
            KernelMode::new(self.input, self.weight, self.bias, output, disabled)
        })
    }
}

const WEIGHTED_OUTPUTS: &[(DataType, bool)] = &[
    (DataType::Int32, true),
    (DataType::Int16, false),
    (DataType::Int8, false),
];
const MOVEMENT_OUTPUTS: &[(DataType, bool)] = &[(DataType::Int16, true)];
const SCORE_OUTPUTS: &[(DataType, bool)] = &[(DataType::UInt32, true)];

macro_rules! kernel_set {
    ($variant:ident: $generic:ident, $sse4:ident, $avx1:ident, $avx2:ident $(; $($ty:ty),+)?) => {
        KernelSet {
            generic: Kernel::$variant($generic $(::<$($ty),+>)?),
            sse4: Some(Kernel::$variant($sse4 $(::<$($ty),+>)?)),
            avx1: Some(Kernel::$variant($avx1 $(::<$($ty),+>)?)),
            avx2: Some(Kernel::$variant($avx2 $(::<$($ty),+>)?)),
        }
    };
}

macro_rules! full {
    ($input:ty, $weight:ty, $bias:ty) => {
        Registration {
            operation: OperationKind::FullyConnectedAffine,
            input: <$input as Element>::DATA_TYPE,
            weight: <$weight as Element>::DATA_TYPE,
            bias: <$bias as Element>::DATA_TYPE,
            outputs: WEIGHTED_OUTPUTS,
            kernels: kernel_set!(Affine: affine_generic, affine_sse4, affine_avx1, affine_avx2; $input, $weight, $bias),
        }
    };
}

macro_rules! diagonal {
    ($input:ty, $weight:ty, $bias:ty) => {
        Registration {
            operation: OperationKind::ElementWiseAffine,
            input: <$input as Element>::DATA_TYPE,
            weight: <$weight as Element>::DATA_TYPE,
            bias: <$bias as Element>::DATA_TYPE,
            outputs: WEIGHTED_OUTPUTS,
            kernels: kernel_set!(Affine: diagonal_generic, diagonal_sse4, diagonal_avx1, diagonal_avx2; $input, $weight, $bias),
        }
    };
}

macro_rules! gmm {
    ($variance:ty) => {
        Registration {
            operation: OperationKind::Gmm,
            input: DataType::UInt8,
            weight: <$variance as Element>::DATA_TYPE,
            bias: DataType::UInt32,
            outputs: SCORE_OUTPUTS,
            kernels: kernel_set!(Gmm: gmm_generic, gmm_sse4, gmm_avx1, gmm_avx2; $variance),
        }
    };
}

/// Every kernel known to the runtime.
pub static REGISTRY: &[Registration] = &[
    full!(i16, i8, CompoundBias),
    full!(i16, i8, i8),
    full!(i16, i8, i16),
    full!(i16, i8, i32),
    full!(i16, i16, i8),
    full!(i16, i16, i16),
    full!(i16, i16, i32),
    full!(i8, i8, CompoundBias),
    full!(i8, i8, i8),
    full!(i8, i8, i16),
    full!(i8, i8, i32),
    full!(i8, i16, i8),
    full!(i8, i16, i16),
    full!(i8, i16, i32),
    diagonal!(i16, i8, CompoundBias),
    diagonal!(i16, i8, i8),
    diagonal!(i16, i8, i16),
    diagonal!(i16, i8, i32),
    diagonal!(i16, i16, i8),
    diagonal!(i16, i16, i16),
    diagonal!(i16, i16, i32),
    diagonal!(i8, i8, CompoundBias),
    diagonal!(i8, i8, i8),
    diagonal!(i8, i8, i16),
    diagonal!(i8, i8, i32),
    diagonal!(i8, i16, i8),
    diagonal!(i8, i16, i16),
    diagonal!(i8, i16, i32),
    Registration {
        operation: OperationKind::Convolution,
        input: DataType::Int16,
        weight: DataType::Int16,
        bias: DataType::Int32,
        outputs: WEIGHTED_OUTPUTS,
        kernels: kernel_set!(Convolution: convolution_generic, convolution_sse4, convolution_avx1, convolution_avx2; i16, i16, i32),
    },
    Registration {
        operation: OperationKind::Copy,
        input: DataType::Int16,
        weight: DataType::None,
        bias: DataType::None,
        outputs: MOVEMENT_OUTPUTS,
        kernels: kernel_set!(Copy: copy_generic, copy_sse4, copy_avx1, copy_avx2),
    },
    Registration {
        operation: OperationKind::Transposition,
        input: DataType::Int16,
        weight: DataType::None,
        bias: DataType::None,
        outputs: MOVEMENT_OUTPUTS,
        kernels: kernel_set!(Transpose: transpose_generic, transpose_sse4, transpose_avx1, transpose_avx2),
    },
    gmm!(u8),
    gmm!(u16),
];

/// Immutable two-level dispatch table.
#[derive(Debug)]
pub struct KernelDispatchTable {
    entries: BTreeMap<OperationKind, BTreeMap<KernelMode, KernelMap>>,
}

static GLOBAL_TABLE: OnceLock<KernelDispatchTable> = OnceLock::new();

impl KernelDispatchTable {
    /// Process-wide table built from [`REGISTRY`] on first use.
    pub fn global() -> &'static Self {
        GLOBAL_TABLE.get_or_init(|| Self::from_registry(REGISTRY))
    }

    pub fn from_registry(registry: &[Registration]) -> Self {
        let mut entries: BTreeMap<OperationKind, BTreeMap<KernelMode, KernelMap>> = BTreeMap::new();
        for registration in registry {
            let set = registration.kernels;
            let map: KernelMap = [
                (AccelerationMode::Generic, set.generic),
                (AccelerationMode::Sse4, set.sse4.unwrap_or(set.generic)),
                (AccelerationMode::Avx1, set.avx1.unwrap_or(set.generic)),
                (AccelerationMode::Avx2, set.avx2.unwrap_or(set.generic)),
            ]
            .into_iter()
            .collect();

            let modes = entries.entry(registration.operation).or_default();
            for mode in registration.modes() {
                modes.insert(mode, map.clone());
            }
        }
        tracing::debug!(
            operations = entries.len(),
            kernel_modes = entries.values().map(BTreeMap::len).sum::<usize>(),
            "kernel_dispatch_table_built"
        );
        Self { entries }
    }

    pub fn try_kernels(&self, operation: OperationKind, mode: &KernelMode) -> Option<&KernelMap> {
        self.entries.get(&operation)?.get(mode)
    }

    /// Kernels registered for `(operation, mode)`.
    ///
    /// # Panics
    ///
    /// Panics when the pair is not registered. Every mode that passed model
    /// validation has an entry, so a miss is a defect in the runtime.
    pub fn kernels(&self, operation: OperationKind, mode: &KernelMode) -> &KernelMap {
        match self.try_kernels(operation, mode) {
            Some(map) => map,
            None => panic!("no kernels registered for {operation} with kernel mode {mode}"),
        }
    }

    /// Kernel modes registered for one operation.
    pub fn modes(&self, operation: OperationKind) -> impl Iterator<Item = &KernelMode> {
        self.entries.get(&operation).into_iter().flat_map(BTreeMap::keys)
    }

    /// Select the kernel for `requested` given the device's supported modes.
    ///
    /// `Auto` and `Software` pick the first of AVX2, AVX1, SSE4 and generic
    /// present in both `supported` and `kernels`. A concrete mode is returned
    /// only when both contain it.
    pub fn resolve(
        requested: AccelerationMode,
        supported: &BTreeSet<AccelerationMode>,
        kernels: &KernelMap,
    ) -> Result<(AccelerationMode, Kernel)> {
        let available =
            |mode: &AccelerationMode| supported.contains(mode) && kernels.contains_key(mode);

        let selected = if requested.is_concrete() {
            Some(requested).filter(available)
        } else {
            AccelerationMode::PREFERENCE.into_iter().find(available)
        };

        selected
            .and_then(|mode| kernels.get(&mode).map(|kernel| (mode, *kernel)))
            .ok_or(KernelError::AccelerationModeNotSupported(requested))
    }
}
