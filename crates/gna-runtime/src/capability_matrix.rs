//! Operation support per hardware generation
//!
//! The matrix is a declarative list of rules. Each rule accepts every
//! combination of its operations and data-type sets starting with the `since`
//! generation. A model operation is executable on a generation when some rule
//! accepts its `(operation, kernel mode)` key. Every accepted key has kernels
//! in the dispatch table.

use gna_kernels::{DataType, KernelMode, OperationKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Hardware capability tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceGeneration {
    /// Gaussian-mixture scoring only.
    Gen0_9,
    Gen1_0,
    Gen2_0,
    Gen3_0,
    Gen3_5,
}

impl DeviceGeneration {
    pub const ALL: [DeviceGeneration; 5] = [
        DeviceGeneration::Gen0_9,
        DeviceGeneration::Gen1_0,
        DeviceGeneration::Gen2_0,
        DeviceGeneration::Gen3_0,
        DeviceGeneration::Gen3_5,
    ];

    pub const fn version(self) -> &'static str {
        match self {
            DeviceGeneration::Gen0_9 => "0.9",
            DeviceGeneration::Gen1_0 => "1.0",
            DeviceGeneration::Gen2_0 => "2.0",
            DeviceGeneration::Gen3_0 => "3.0",
            DeviceGeneration::Gen3_5 => "3.5",
        }
    }
}

impl fmt::Display for DeviceGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GNA {}", self.version())
    }
}

impl FromStr for DeviceGeneration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', ".");
        let version = normalized.trim_start_matches("gen").trim_start_matches("gna");
        DeviceGeneration::ALL
            .into_iter()
            .find(|generation| generation.version() == version.trim())
            .ok_or_else(|| format!("unknown device generation '{s}'"))
    }
}

/// One declarative support rule.
#[derive(Debug, Clone, Copy)]
pub struct CapabilityRule {
    pub operations: &'static [OperationKind],
    pub inputs: &'static [DataType],
    pub weights: &'static [DataType],
    pub biases: &'static [DataType],
    /// `(output type, activation disabled)` pairs.
    pub outputs: &'static [(DataType, bool)],
    /// First generation the rule applies to.
    pub since: DeviceGeneration,
}

impl CapabilityRule {
    fn accepts(
        &self,
        operation: OperationKind,
        mode: &KernelMode,
        generation: DeviceGeneration,
    ) -> bool {
        generation >= self.since
            && self.operations.contains(&operation)
            && self.inputs.contains(&mode.input)
            && self.weights.contains(&mode.weight)
            && self.biases.contains(&mode.bias)
            && self.outputs.contains(&(mode.output, mode.activation_disabled))
    }

    fn modes(&self) -> impl Iterator<Item = KernelMode> + '_ {
        self.inputs.iter().flat_map(move |&input| {
            self.weights.iter().flat_map(move |&weight| {
                self.biases.iter().flat_map(move |&bias| {
                    self.outputs.iter().map(move |&(output, disabled)| {
                        KernelMode::new(input, weight, bias, output, disabled)
                    })
                })
            })
        })
    }
}

const AFFINE: &[OperationKind] = &[
    OperationKind::FullyConnectedAffine,
    OperationKind::ElementWiseAffine,
];
const MOVEMENT: &[OperationKind] = &[OperationKind::Copy, OperationKind::Transposition];

const LEGACY_OUTPUTS: &[(DataType, bool)] = &[(DataType::Int32, true), (DataType::Int16, false)];
const FULL_OUTPUTS: &[(DataType, bool)] = &[
    (DataType::Int32, true),
    (DataType::Int16, false),
    (DataType::Int8, false),
];

/// Support rules in generation order.
pub static RULES: &[CapabilityRule] = &[
    CapabilityRule {
        operations: &[OperationKind::Gmm],
        inputs: &[DataType::UInt8],
        weights: &[DataType::UInt8, DataType::UInt16],
        biases: &[DataType::UInt32],
        outputs: &[(DataType::UInt32, true)],
        since: DeviceGeneration::Gen0_9,
    },
    CapabilityRule {
        operations: AFFINE,
        inputs: &[DataType::Int16],
        weights: &[DataType::Int8],
        biases: &[DataType::CompoundBias],
        outputs: LEGACY_OUTPUTS,
        since: DeviceGeneration::Gen1_0,
    },
    CapabilityRule {
        operations: AFFINE,
        inputs: &[DataType::Int16],
        weights: &[DataType::Int16],
        biases: &[DataType::Int32],
        outputs: LEGACY_OUTPUTS,
        since: DeviceGeneration::Gen1_0,
    },
    CapabilityRule {
        operations: &[OperationKind::Convolution],
        inputs: &[DataType::Int16],
        weights: &[DataType::Int16],
        biases: &[DataType::Int32],
        outputs: LEGACY_OUTPUTS,
        since: DeviceGeneration::Gen1_0,
    },
    CapabilityRule {
        operations: MOVEMENT,
        inputs: &[DataType::Int16],
        weights: &[DataType::None],
        biases: &[DataType::None],
        outputs: &[(DataType::Int16, true)],
        since: DeviceGeneration::Gen1_0,
    },
    CapabilityRule {
        operations: AFFINE,
        inputs: &[DataType::Int8, DataType::Int16],
        weights: &[DataType::Int8],
        biases: &[
            DataType::Int8,
            DataType::Int16,
            DataType::Int32,
            DataType::CompoundBias,
        ],
        outputs: FULL_OUTPUTS,
        since: DeviceGeneration::Gen3_0,
    },
    CapabilityRule {
        operations: AFFINE,
        inputs: &[DataType::Int8, DataType::Int16],
        weights: &[DataType::Int16],
        biases: &[DataType::Int8, DataType::Int16, DataType::Int32],
        outputs: FULL_OUTPUTS,
        since: DeviceGeneration::Gen3_0,
    },
    CapabilityRule {
        operations: &[OperationKind::Convolution],
        inputs: &[DataType::Int16],
        weights: &[DataType::Int16],
        biases: &[DataType::Int32],
        outputs: &[(DataType::Int8, false)],
        since: DeviceGeneration::Gen3_0,
    },
];

/// Query interface over [`RULES`].
pub struct CapabilityMatrix;

impl CapabilityMatrix {
    /// Whether `generation` can execute `operation` with `mode`.
    pub fn is_supported(
        operation: OperationKind,
        mode: &KernelMode,
        generation: DeviceGeneration,
    ) -> bool {
        RULES.iter().any(|rule| rule.accepts(operation, mode, generation))
    }

    /// Generations accepting `(operation, mode)`.
    pub fn supported_generations(
        operation: OperationKind,
        mode: &KernelMode,
    ) -> BTreeSet<DeviceGeneration> {
        DeviceGeneration::ALL
            .into_iter()
            .filter(|&generation| Self::is_supported(operation, mode, generation))
            .collect()
    }

    /// Whether any kernel mode of `operation` runs on `generation`.
    pub fn supports_operation(operation: OperationKind, generation: DeviceGeneration) -> bool {
        RULES
            .iter()
            .any(|rule| generation >= rule.since && rule.operations.contains(&operation))
    }

    /// Every kernel mode of `operation` accepted on `generation`.
    pub fn accepted_modes(
        operation: OperationKind,
        generation: DeviceGeneration,
    ) -> BTreeSet<KernelMode> {
        RULES
            .iter()
            .filter(|rule| generation >= rule.since && rule.operations.contains(&operation))
            .flat_map(CapabilityRule::modes)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gna_kernels::{AccelerationMode, KernelDispatchTable};

    #[test]
    fn test_every_accepted_mode_has_generic_kernel() {
        let table = KernelDispatchTable::global();
        for generation in DeviceGeneration::ALL {
            for operation in OperationKind::ALL {
                for mode in CapabilityMatrix::accepted_modes(operation, generation) {
                    let kernels = table
                        .try_kernels(operation, &mode)
                        .unwrap_or_else(|| panic!("{operation} {mode} on {generation} has no kernels"));
                    assert!(kernels.contains_key(&AccelerationMode::Generic));
                }
            }
        }
    }

    #[test]
    fn test_gmm_only_generation() {
        let gmm = KernelMode::new(DataType::UInt8, DataType::UInt16, DataType::UInt32, DataType::UInt32, true);
        assert!(CapabilityMatrix::is_supported(OperationKind::Gmm, &gmm, DeviceGeneration::Gen0_9));
        assert!(!CapabilityMatrix::supports_operation(
            OperationKind::FullyConnectedAffine,
            DeviceGeneration::Gen0_9
        ));
        assert!(CapabilityMatrix::supports_operation(OperationKind::Copy, DeviceGeneration::Gen2_0));
    }

    #[test]
    fn test_int8_paths_arrive_with_gen3() {
        let int8_output = KernelMode::new(DataType::Int16, DataType::Int16, DataType::Int32, DataType::Int8, false);
        assert_eq!(
            CapabilityMatrix::supported_generations(OperationKind::FullyConnectedAffine, &int8_output),
            BTreeSet::from([DeviceGeneration::Gen3_0, DeviceGeneration::Gen3_5])
        );

        let int8_input = KernelMode::new(DataType::Int8, DataType::Int8, DataType::Int8, DataType::Int16, false);
        assert!(!CapabilityMatrix::is_supported(
            OperationKind::ElementWiseAffine,
            &int8_input,
            DeviceGeneration::Gen2_0
        ));
        assert!(CapabilityMatrix::is_supported(
            OperationKind::ElementWiseAffine,
            &int8_input,
            DeviceGeneration::Gen3_5
        ));
    }

    #[test]
    fn test_activation_flag_is_part_of_the_key() {
        let int32_with_activation =
            KernelMode::new(DataType::Int16, DataType::Int16, DataType::Int32, DataType::Int32, false);
        assert!(CapabilityMatrix::supported_generations(
            OperationKind::FullyConnectedAffine,
            &int32_with_activation
        )
        .is_empty());
    }

    #[test]
    fn test_generation_parsing() {
        assert_eq!("gen3_5".parse::<DeviceGeneration>(), Ok(DeviceGeneration::Gen3_5));
        assert_eq!("1.0".parse::<DeviceGeneration>(), Ok(DeviceGeneration::Gen1_0));
        assert_eq!(" GNA2.0 ".parse::<DeviceGeneration>(), Ok(DeviceGeneration::Gen2_0));
        assert!("4.0".parse::<DeviceGeneration>().is_err());
    }
}
