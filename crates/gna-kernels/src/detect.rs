//! CPU capability detection
//!
//! Decides which [`AccelerationMode`]s the running CPU can execute. The raw
//! CPUID/XCR0 readings are captured in [`CpuFeatures`] so that the decision
//! logic can be exercised with arbitrary feature combinations.
//!
//! AVX kernels are only enabled when the operating system has enabled both the
//! XMM and YMM state components in XCR0. A CPU advertising AVX on an OS that
//! does not save the upper YMM halves would corrupt registers across context
//! switches.

use crate::types::AccelerationMode;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// XCR0 bit for SSE (XMM) state.
pub const XCR0_XMM_STATE: u64 = 1 << 1;
/// XCR0 bit for AVX (upper YMM) state.
pub const XCR0_YMM_STATE: u64 = 1 << 2;

/// Lowest CPUID leaf that reports AVX2.
const EXTENDED_FEATURES_LEAF: u32 = 7;

/// Raw processor feature readings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuFeatures {
    /// Highest standard CPUID leaf.
    pub max_leaf: u32,
    pub sse4_1: bool,
    pub sse4_2: bool,
    pub avx: bool,
    /// OS uses XSAVE/XRSTOR; XCR0 is only readable when set.
    pub osxsave: bool,
    /// Extended control register 0, zero when unreadable.
    pub xcr0: u64,
    pub avx2: bool,
}

static HOST_FEATURES: OnceLock<CpuFeatures> = OnceLock::new();

impl CpuFeatures {
    /// Features of the running CPU, read once per process.
    pub fn host() -> Self {
        *HOST_FEATURES.get_or_init(Self::read)
    }

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    fn read() -> Self {
        #[cfg(target_arch = "x86")]
        use std::arch::x86::{__cpuid, __cpuid_count, _xgetbv};
        #[cfg(target_arch = "x86_64")]
        use std::arch::x86_64::{__cpuid, __cpuid_count, _xgetbv};

        // SAFETY: CPUID is available on every x86_64 CPU and on every x86 CPU
        // able to run Rust's i686 targets.
        let leaf0 = unsafe { __cpuid(0) };
        let max_leaf = leaf0.eax;
        if max_leaf < 1 {
            return Self::default();
        }

        let leaf1 = unsafe { __cpuid(1) };
        let ecx = leaf1.ecx;
        let osxsave = ecx & (1 << 27) != 0;

        let xcr0 = if osxsave {
            // SAFETY: OSXSAVE guarantees XGETBV is enabled.
            unsafe { _xgetbv(0) }
        } else {
            0
        };

        let avx2 = if max_leaf >= EXTENDED_FEATURES_LEAF {
            let leaf7 = unsafe { __cpuid_count(EXTENDED_FEATURES_LEAF, 0) };
            leaf7.ebx & (1 << 5) != 0
        } else {
            false
        };

        Self {
            max_leaf,
            sse4_1: ecx & (1 << 19) != 0,
            sse4_2: ecx & (1 << 20) != 0,
            avx: ecx & (1 << 28) != 0,
            osxsave,
            xcr0,
            avx2,
        }
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    fn read() -> Self {
        Self::default()
    }

    /// The OS saves and restores both XMM and YMM state.
    pub fn os_supports_ymm(&self) -> bool {
        let required = XCR0_XMM_STATE | XCR0_YMM_STATE;
        self.osxsave && self.xcr0 & required == required
    }
}

/// Set of acceleration modes usable on one device.
///
/// Built once at device open and immutable afterwards; the set always holds
/// `Auto`, `Software` and `Generic`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityDetector {
    features: CpuFeatures,
    modes: BTreeSet<AccelerationMode>,
    hardware_available: bool,
}

impl CapabilityDetector {
    /// Detect the modes of the running CPU.
    pub fn detect(hardware_available: bool) -> Self {
        let detector = Self::from_features(CpuFeatures::host(), hardware_available);
        tracing::debug!(
            modes = ?detector.supported_modes(),
            hardware_available,
            "acceleration_modes_detected"
        );
        detector
    }

    /// Derive the modes from explicit feature readings.
    pub fn from_features(features: CpuFeatures, hardware_available: bool) -> Self {
        let mut modes = BTreeSet::from([
            AccelerationMode::Auto,
            AccelerationMode::Software,
            AccelerationMode::Generic,
        ]);

        if features.sse4_1 && features.sse4_2 {
            modes.insert(AccelerationMode::Sse4);
        }

        let avx1 = features.avx && features.os_supports_ymm();
        if avx1 {
            modes.insert(AccelerationMode::Avx1);
            if features.max_leaf >= EXTENDED_FEATURES_LEAF && features.avx2 {
                modes.insert(AccelerationMode::Avx2);
            }
        }

        Self {
            features,
            modes,
            hardware_available,
        }
    }

    /// Enabled modes in ascending order; never empty.
    pub fn supported_modes(&self) -> Vec<AccelerationMode> {
        self.modes.iter().copied().collect()
    }

    pub fn modes(&self) -> &BTreeSet<AccelerationMode> {
        &self.modes
    }

    pub fn is_supported(&self, mode: AccelerationMode) -> bool {
        self.modes.contains(&mode)
    }

    /// Concrete mode `Auto` would pick when every kernel variant exists.
    pub fn best_mode(&self) -> AccelerationMode {
        AccelerationMode::PREFERENCE
            .into_iter()
            .find(|mode| self.modes.contains(mode))
            .unwrap_or(AccelerationMode::Generic)
    }

    pub fn features(&self) -> &CpuFeatures {
        &self.features
    }

    /// Whether inference can run on accelerator silicon for this device.
    pub fn hardware_available(&self) -> bool {
        self.hardware_available
    }
}
