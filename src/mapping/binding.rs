//! Binding types resolved by the mode graph

use crate::controller::device::{HatDirection, InputId, InputValue};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub usize);

        impl $name {
            pub fn index(self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

arena_id!(
    /// Index into the mode arena
    ModeId
);
arena_id!(BindingId);
arena_id!(PipelineId);
arena_id!(MergeId);
arena_id!(MacroId);

/// Virtual device input that receives a written value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputTarget {
    pub device: u8,
    pub input: InputId,
}

impl fmt::Display for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vjoy{}/{}", self.device, self.input)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeRole {
    Lower,
    Upper,
}

impl fmt::Display for MergeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeRole::Lower => write!(f, "lower"),
            MergeRole::Upper => write!(f, "upper"),
        }
    }
}

/// Action attached to one (device, input) pair in one mode
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Remap {
        target: OutputTarget,
        pipeline: Option<PipelineId>,
        mode: RemapMode,
    },
    MergeAxis {
        role: MergeRole,
        merge: MergeId,
    },
    Macro(MacroId),
    Custom {
        handler: String,
        target: Option<OutputTarget>,
    },
    SwitchMode(ModeId),
    SwitchModePrevious,
    SwitchModeTemporary(ModeId),
}

/// How an axis remap drives its target
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RemapMode {
    /// Target follows the input
    Absolute,
    /// Deflection sets how fast the target moves, in full travel per second
    Relative { rate: f64 },
}

/// Turns an axis or hat into a press/release signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VirtualButton {
    /// Pressed while the axis lies within `[lower, upper]`
    AxisRange { lower: f64, upper: f64 },
    /// Pressed while the hat points in one of the listed directions
    HatDirections { directions: Vec<HatDirection> },
}

impl VirtualButton {
    pub fn axis_range(lower: f64, upper: f64) -> Self {
        VirtualButton::AxisRange { lower, upper }.normalized()
    }

    /// Swaps reversed range limits
    pub fn normalized(self) -> Self {
        match self {
            VirtualButton::AxisRange { lower, upper } if lower > upper => VirtualButton::AxisRange {
                lower: upper,
                upper: lower,
            },
            other => other,
        }
    }

    pub fn is_pressed(&self, value: &InputValue) -> Option<bool> {
        match (self, value) {
            (VirtualButton::AxisRange { lower, upper }, InputValue::Axis(v)) => {
                Some(*lower <= *v && *v <= *upper)
            }
            (VirtualButton::HatDirections { directions }, InputValue::Hat(d)) => {
                Some(directions.contains(d))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindingSlot {
    pub binding: Binding,
    pub virtual_button: Option<VirtualButton>,
}

impl BindingSlot {
    pub fn new(binding: Binding) -> Self {
        Self {
            binding,
            virtual_button: None,
        }
    }

    pub fn with_virtual_button(mut self, virtual_button: VirtualButton) -> Self {
        self.virtual_button = Some(virtual_button.normalized());
        self
    }

    /// Button view of a sample, `None` when the sample cannot act as a button
    pub fn pressed(&self, value: &InputValue) -> Option<bool> {
        if let Some(vb) = &self.virtual_button {
            return vb.is_pressed(value);
        }
        match value {
            InputValue::Button(pressed) => Some(*pressed),
            InputValue::Hat(direction) => Some(*direction != HatDirection::Center),
            InputValue::Axis(_) => None,
        }
    }
}
