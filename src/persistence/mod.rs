//! # Persistence Module
//!
//! Profile records as they are stored on disk. A profile carries everything
//! needed to rebuild mapping state: modes with their bindings, devices with
//! axis rest positions, pipelines, merge axes and macros.
//!
//! ## Compatibility
//! Every optional field has a serde default. Profiles written before axis
//! rest positions existed load with every initial value at 0.0.
//!
//! ## Error Handling Strategy
//! File access and parsing use `color_eyre` for context. Semantic problems
//! (cycles, unknown references, bad curves) are found later when the profile
//! is compiled and are reported as [`crate::mapping::ConfigError`].

pub mod profile_store;

use crate::controller::device::{HatDirection, InputId};
use crate::mapping::binding::{MergeRole, OutputTarget, VirtualButton};
use crate::mapping::curve::Interpolation;
use crate::mapping::macros::MacroPolicy;
use crate::mapping::merge_axis::MergeOperation;
use crate::mapping::transform::DeadZone;
use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use profile_store::{default_profile_path, ensure_default_profile, load_profile, save_profile};
pub(crate) use profile_store::get_config_dir;

/// Root of a profile file
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ProfileConfig {
    pub name: String,

    #[serde(default)]
    pub settings: ProfileSettings,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    pub modes: Vec<ModeConfig>,

    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,

    #[serde(default)]
    pub merge_axes: Vec<MergeAxisConfig>,

    #[serde(default)]
    pub macros: Vec<MacroConfig>,
}

impl ProfileConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| eyre!("Failed to parse profile: {}", e))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| eyre!("Failed to serialize profile: {}", e))
    }

    pub fn device(&self, name: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.name == name)
    }
}

/// Profile wide behavior
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ProfileSettings {
    /// Mode entered on activation; the first declared mode when absent
    pub startup_mode: Option<String>,

    /// Pause between two emissions of a macro, in milliseconds
    pub default_delay_ms: u64,

    /// Nesting limit for temporary mode switches
    pub max_temporary_depth: usize,

    /// Virtual axis positions written once on activation
    pub initial_outputs: Vec<InitialOutputConfig>,
}

impl Default for ProfileSettings {
    fn default() -> Self {
        Self {
            startup_mode: None,
            default_delay_ms: 50,
            max_temporary_depth: 4,
            initial_outputs: Vec::new(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct InitialOutputConfig {
    pub device: u8,
    pub axis: u8,
    pub value: f64,
}

/// Physical device known to the profile
///
/// Bindings refer to devices by `name`, the `id` ties that name to the
/// identity reported by the device layer.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct DeviceConfig {
    pub name: String,
    pub id: Uuid,
    #[serde(default)]
    pub axes: Vec<AxisConfig>,
}

impl DeviceConfig {
    /// Rest position of `axis`, 0.0 when not configured
    pub fn initial_value(&self, axis: u8) -> f64 {
        self.axes
            .iter()
            .find(|a| a.axis == axis)
            .map(|a| a.initial_value)
            .unwrap_or(0.0)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct AxisConfig {
    pub axis: u8,
    #[serde(default)]
    pub initial_value: f64,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ModeConfig {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct BindingConfig {
    pub device: String,
    pub input: InputId,
    pub action: ActionConfig,
    #[serde(default)]
    pub virtual_button: Option<VirtualButton>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionConfig {
    Remap {
        target: OutputTarget,
        #[serde(default)]
        pipeline: Option<String>,
        #[serde(default)]
        mode: AxisMode,
        /// Full travel per second at full deflection, relative mode only
        #[serde(default)]
        axis_scaling: Option<f64>,
    },
    MergeAxis {
        merge: String,
        role: MergeRole,
    },
    Macro {
        name: String,
    },
    Custom {
        handler: String,
        #[serde(default)]
        target: Option<OutputTarget>,
    },
    SwitchMode {
        mode: String,
    },
    SwitchModePrevious,
    SwitchModeTemporary {
        mode: String,
    },
}

/// Whether an axis remap sets the target or moves it
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AxisMode {
    #[default]
    Absolute,
    Relative,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default)]
    pub operators: Vec<OperatorConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperatorConfig {
    DeadZone(DeadZone),
    ResponseCurve {
        #[serde(default)]
        interpolation: Interpolation,
        points: Vec<(f64, f64)>,
    },
    Invert,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct MergeAxisConfig {
    pub name: String,
    #[serde(default)]
    pub operation: MergeOperation,
    pub lower: MergeInputConfig,
    pub upper: MergeInputConfig,
    pub target: OutputTarget,
    #[serde(default)]
    pub pipeline: Option<String>,
    /// Overrides the neutral point derived from both rest positions
    #[serde(default)]
    pub neutral: Option<f64>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct MergeInputConfig {
    pub device: String,
    pub axis: u8,
    /// Falls back to the device's configured rest position
    #[serde(default)]
    pub initial_value: Option<f64>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct MacroConfig {
    pub name: String,
    #[serde(default)]
    pub policy: MacroPolicy,
    /// Overrides `settings.default_delay_ms` for this macro
    #[serde(default)]
    pub delay_ms: Option<u64>,
    pub steps: Vec<MacroStepConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MacroStepConfig {
    Button {
        device: u8,
        button: u8,
        pressed: bool,
    },
    Axis {
        device: u8,
        axis: u8,
        value: f64,
    },
    Hat {
        device: u8,
        hat: u8,
        direction: HatDirection,
    },
    Key {
        key: String,
        pressed: bool,
    },
    Pause {
        ms: u64,
    },
}
