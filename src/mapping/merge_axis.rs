//! Merging two physical axes into one virtual axis
//!
//! Each side contributes its deviation from its own rest position, scaled by
//! the travel left in that direction. The combined deviation is placed around
//! the output's neutral point, so releasing both axes always lands exactly on
//! neutral no matter where the physical rest positions are.
//!
//! `Sum` is the exception: it adds both raw deviations without rescaling,
//! so one side alone covers only the travel it physically has.
//!
//! The operator keeps the last value seen for each side. Moving one side
//! recomputes the output against the remembered value of the other side.

use super::binding::MergeRole;
use super::error::ConfigError;
use crate::controller::device::normalize_axis;
use serde::{Deserialize, Serialize};

const EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOperation {
    #[default]
    Average,
    Minimum,
    Maximum,
    Sum,
}

impl MergeOperation {
    pub fn combine(self, a: f64, b: f64) -> f64 {
        match self {
            MergeOperation::Average => (a + b) / 2.0,
            MergeOperation::Minimum => a.min(b),
            MergeOperation::Maximum => a.max(b),
            MergeOperation::Sum => (a + b).clamp(-1.0, 1.0),
        }
    }
}

/// Last known value per side
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeAxisState {
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeAxis {
    name: String,
    operation: MergeOperation,
    lower_initial: f64,
    upper_initial: f64,
    neutral: f64,
    state: MergeAxisState,
}

impl MergeAxis {
    /// `neutral` overrides the neutral point derived from the initial values
    pub fn new(
        name: impl Into<String>,
        operation: MergeOperation,
        lower_initial: f64,
        upper_initial: f64,
        neutral: Option<f64>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        for (label, value) in [
            ("lower", Some(lower_initial)),
            ("upper", Some(upper_initial)),
            ("neutral", neutral),
        ] {
            if let Some(value) = value {
                if !value.is_finite() || !(-1.0..=1.0).contains(&value) {
                    return Err(ConfigError::InitialValueOutOfRange {
                        name: format!("{}.{}", name, label),
                        value,
                    });
                }
            }
        }

        let neutral = neutral.unwrap_or_else(|| operation.combine(lower_initial, upper_initial));
        Ok(Self {
            name,
            operation,
            lower_initial,
            upper_initial,
            neutral,
            state: MergeAxisState {
                lower: lower_initial,
                upper: upper_initial,
            },
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operation(&self) -> MergeOperation {
        self.operation
    }

    pub fn neutral(&self) -> f64 {
        self.neutral
    }

    pub fn state(&self) -> MergeAxisState {
        self.state
    }

    /// Back to the configured rest positions
    pub fn reset(&mut self) {
        self.state = MergeAxisState {
            lower: self.lower_initial,
            upper: self.upper_initial,
        };
    }

    /// Puts one side back to its rest position and returns the merged output
    pub fn release(&mut self, role: MergeRole) -> f64 {
        match role {
            MergeRole::Lower => self.state.lower = self.lower_initial,
            MergeRole::Upper => self.state.upper = self.upper_initial,
        }
        self.output()
    }

    /// Stores the new sample for `role` and returns the merged output
    pub fn update(&mut self, role: MergeRole, value: f64) -> f64 {
        let value = normalize_axis(value);
        match role {
            MergeRole::Lower => self.state.lower = value,
            MergeRole::Upper => self.state.upper = value,
        }
        self.output()
    }

    pub fn output(&self) -> f64 {
        let n = self.neutral;
        let lower = contribution(self.state.lower, self.lower_initial);
        let upper = contribution(self.state.upper, self.upper_initial);
        let combined = match self.operation {
            // mean scaled by 2 so either axis alone reaches full travel
            MergeOperation::Average => (lower + upper).clamp(-1.0, 1.0),
            MergeOperation::Minimum => lower.min(upper),
            MergeOperation::Maximum => lower.max(upper),
            MergeOperation::Sum => {
                let raw = (self.state.lower - self.lower_initial)
                    + (self.state.upper - self.upper_initial);
                return (n + raw).clamp(-1.0, 1.0);
            }
        };
        let out = if combined >= 0.0 {
            n + combined * (1.0 - n)
        } else {
            n + combined * (1.0 + n)
        };
        out.clamp(-1.0, 1.0)
    }
}

fn contribution(value: f64, initial: f64) -> f64 {
    let deviation = value - initial;
    if deviation >= 0.0 {
        let travel = 1.0 - initial;
        if travel <= EPS {
            0.0
        } else {
            (deviation / travel).min(1.0)
        }
    } else {
        let travel = 1.0 + initial;
        if travel <= EPS {
            0.0
        } else {
            (deviation / travel).max(-1.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_follows_operation() {
        let avg = MergeAxis::new("t", MergeOperation::Average, 0.3, -0.2, None).unwrap();
        assert!((avg.neutral() - 0.05).abs() < 1e-12);
        let min = MergeAxis::new("t", MergeOperation::Minimum, 0.3, -0.2, None).unwrap();
        assert_eq!(min.neutral(), -0.2);
        let max = MergeAxis::new("t", MergeOperation::Maximum, 0.3, -0.2, Some(0.0)).unwrap();
        assert_eq!(max.neutral(), 0.0);
    }

    #[test]
    fn state_is_seeded_from_initial_values() {
        let merge = MergeAxis::new("t", MergeOperation::Average, 0.3, -0.2, None).unwrap();
        assert_eq!(
            merge.state(),
            MergeAxisState {
                lower: 0.3,
                upper: -0.2
            }
        );
        assert_eq!(merge.output(), merge.neutral());
    }

    #[test]
    fn one_axis_alone_reaches_both_extremes() {
        let mut merge = MergeAxis::new("t", MergeOperation::Average, 0.3, -0.2, None).unwrap();
        assert!((merge.update(MergeRole::Lower, 1.0) - 1.0).abs() < 1e-12);
        assert!((merge.update(MergeRole::Lower, -1.0) + 1.0).abs() < 1e-12);
        merge.update(MergeRole::Lower, 0.3);
        assert!((merge.update(MergeRole::Upper, 1.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn other_side_keeps_its_last_value() {
        let mut merge = MergeAxis::new("t", MergeOperation::Maximum, 0.0, 0.0, None).unwrap();
        merge.update(MergeRole::Upper, 0.6);
        assert!((merge.update(MergeRole::Lower, 0.2) - 0.6).abs() < 1e-12);
        assert!((merge.update(MergeRole::Lower, 0.9) - 0.9).abs() < 1e-12);
    }

    #[test]
    fn reset_restores_rest_positions() {
        let mut merge = MergeAxis::new("t", MergeOperation::Minimum, -0.5, 0.5, None).unwrap();
        merge.update(MergeRole::Lower, 1.0);
        merge.reset();
        assert_eq!(merge.output(), merge.neutral());
    }

    #[test]
    fn saturated_rest_position_contributes_nothing_past_it() {
        let mut merge = MergeAxis::new("t", MergeOperation::Average, 1.0, 0.0, None).unwrap();
        assert_eq!(merge.update(MergeRole::Lower, 1.0), merge.neutral());
        assert!(merge.update(MergeRole::Lower, 0.0) < merge.neutral());
    }

    #[test]
    fn out_of_range_initial_values_are_rejected() {
        assert!(matches!(
            MergeAxis::new("t", MergeOperation::Average, 1.5, 0.0, None),
            Err(ConfigError::InitialValueOutOfRange { .. })
        ));
        assert!(MergeAxis::new("t", MergeOperation::Average, 0.0, 0.0, Some(f64::NAN)).is_err());
    }

    #[test]
    fn sum_adds_raw_deviations() {
        let mut merge = MergeAxis::new("t", MergeOperation::Sum, 0.0, 0.0, None).unwrap();
        assert_eq!(merge.neutral(), 0.0);
        assert!((merge.update(MergeRole::Lower, 0.4) - 0.4).abs() < 1e-12);
        assert!((merge.update(MergeRole::Upper, 0.3) - 0.7).abs() < 1e-12);
        assert_eq!(merge.update(MergeRole::Upper, 0.9), 1.0);
        assert!((merge.update(MergeRole::Upper, -0.4) - 0.0).abs() < 1e-12);

        // Rest positions shift the neutral, releasing lands on it exactly
        let mut pedals = MergeAxis::new("t", MergeOperation::Sum, -0.5, -0.5, None).unwrap();
        assert_eq!(pedals.neutral(), -1.0);
        assert!((pedals.update(MergeRole::Lower, 0.5) - 0.0).abs() < 1e-12);
        pedals.update(MergeRole::Lower, -0.5);
        assert_eq!(pedals.output(), pedals.neutral());
    }

    #[test]
    fn releasing_one_side_keeps_the_other() {
        let mut merge = MergeAxis::new("t", MergeOperation::Maximum, -1.0, -1.0, None).unwrap();
        merge.update(MergeRole::Lower, 1.0);
        merge.update(MergeRole::Upper, 0.0);
        assert_eq!(merge.release(MergeRole::Lower), 0.0);
        assert_eq!(merge.state().lower, -1.0);
        assert_eq!(merge.release(MergeRole::Upper), merge.neutral());
    }
}
