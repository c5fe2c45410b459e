//! Device configuration and hardware description

use crate::capability_matrix::DeviceGeneration;
use crate::error::{Error, Result};
use gna_kernels::{AccelerationMode, MAX_FILTERS, MAX_GROUPS, MAX_INPUT_ELEMENTS, POOL_WINDOW_MAX};
use serde::{Deserialize, Serialize};
use std::env;

/// Smallest worker thread count.
pub const MIN_THREAD_COUNT: u32 = 1;
/// Largest worker thread count.
pub const MAX_THREAD_COUNT: u32 = 127;

/// Settings applied when a device is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Generation whose capability rules models are validated against.
    pub generation: DeviceGeneration,
    pub thread_count: u32,
    /// Mode used by requests without an override.
    pub acceleration_mode: AccelerationMode,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            generation: DeviceGeneration::Gen3_0,
            thread_count: 1,
            acceleration_mode: AccelerationMode::Auto,
        }
    }
}

impl DeviceConfig {
    /// Defaults overridden by `GNA_DEVICE_GENERATION`, `GNA_THREAD_COUNT` and
    /// `GNA_ACCELERATION_MODE`. Unparsable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = env::var("GNA_DEVICE_GENERATION") {
            match value.parse() {
                Ok(generation) => config.generation = generation,
                Err(error) => tracing::warn!(%error, "ignoring GNA_DEVICE_GENERATION"),
            }
        }

        if let Ok(value) = env::var("GNA_THREAD_COUNT") {
            match value.trim().parse::<u32>() {
                Ok(count) => config.thread_count = count,
                Err(error) => tracing::warn!(%error, "ignoring GNA_THREAD_COUNT"),
            }
        }

        if let Ok(value) = env::var("GNA_ACCELERATION_MODE") {
            match value.parse() {
                Ok(mode) => config.acceleration_mode = mode,
                Err(error) => tracing::warn!(%error, "ignoring GNA_ACCELERATION_MODE"),
            }
        }

        config
    }

    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|error| Error::InvalidConfig(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_thread_count(self.thread_count)
    }
}

pub fn validate_thread_count(count: u32) -> Result<()> {
    if (MIN_THREAD_COUNT..=MAX_THREAD_COUNT).contains(&count) {
        Ok(())
    } else {
        Err(Error::ThreadCountInvalid(count))
    }
}

/// Structural limits checked during model validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLimits {
    pub max_operations: usize,
    pub max_input_elements: usize,
    pub max_output_elements: usize,
    pub max_groups: usize,
    pub max_pwl_segments: usize,
    pub max_filters: usize,
    pub max_filter_size: usize,
    pub max_pool_window: usize,
    pub max_gmm_states: usize,
    pub max_gmm_mixtures: usize,
    pub max_gmm_features: usize,
}

/// Description of the device a model targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareCapabilities {
    pub generation: DeviceGeneration,
    pub device_version: String,
    /// Inference on accelerator silicon; this runtime only emulates in software.
    pub hardware_available: bool,
    pub limits: DeviceLimits,
}

impl HardwareCapabilities {
    pub fn for_generation(generation: DeviceGeneration) -> Self {
        let max_operations = match generation {
            DeviceGeneration::Gen0_9 | DeviceGeneration::Gen1_0 | DeviceGeneration::Gen2_0 => 1_023,
            DeviceGeneration::Gen3_0 | DeviceGeneration::Gen3_5 => 8_191,
        };
        Self {
            generation,
            device_version: generation.to_string(),
            hardware_available: false,
            limits: DeviceLimits {
                max_operations,
                max_input_elements: MAX_INPUT_ELEMENTS,
                max_output_elements: MAX_INPUT_ELEMENTS,
                max_groups: MAX_GROUPS,
                max_pwl_segments: 128,
                max_filters: MAX_FILTERS,
                max_filter_size: 768,
                max_pool_window: POOL_WINDOW_MAX,
                max_gmm_states: 262_144,
                max_gmm_mixtures: 4_096,
                max_gmm_features: 256,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = DeviceConfig::default();
        assert_eq!(config.generation, DeviceGeneration::Gen3_0);
        assert_eq!(config.thread_count, 1);
        assert_eq!(config.acceleration_mode, AccelerationMode::Auto);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_partial_document() {
        let config = DeviceConfig::from_json(r#"{"thread_count": 4, "acceleration_mode": "generic"}"#).unwrap();
        assert_eq!(config.thread_count, 4);
        assert_eq!(config.acceleration_mode, AccelerationMode::Generic);
        assert_eq!(config.generation, DeviceGeneration::Gen3_0);

        let config = DeviceConfig::from_json(r#"{"generation": "gen1_0"}"#).unwrap();
        assert_eq!(config.generation, DeviceGeneration::Gen1_0);
    }

    #[test]
    fn test_json_rejects_bad_thread_count() {
        assert_eq!(
            DeviceConfig::from_json(r#"{"thread_count": 128}"#).unwrap_err(),
            Error::ThreadCountInvalid(128)
        );
        assert!(matches!(
            DeviceConfig::from_json("{not json").unwrap_err(),
            Error::InvalidConfig(_)
        ));
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        env::set_var("GNA_DEVICE_GENERATION", "2.0");
        env::set_var("GNA_THREAD_COUNT", "3");
        env::set_var("GNA_ACCELERATION_MODE", "bogus");

        let config = DeviceConfig::from_env();
        assert_eq!(config.generation, DeviceGeneration::Gen2_0);
        assert_eq!(config.thread_count, 3);
        assert_eq!(config.acceleration_mode, AccelerationMode::Auto);

        env::remove_var("GNA_DEVICE_GENERATION");
        env::remove_var("GNA_THREAD_COUNT");
        env::remove_var("GNA_ACCELERATION_MODE");
    }

    #[test]
    fn test_limits_scale_with_generation() {
        let legacy = HardwareCapabilities::for_generation(DeviceGeneration::Gen1_0);
        let current = HardwareCapabilities::for_generation(DeviceGeneration::Gen3_5);
        assert!(legacy.limits.max_operations < current.limits.max_operations);
        assert_eq!(current.device_version, "GNA 3.5");
        assert!(!current.hardware_available);
    }
}
