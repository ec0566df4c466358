//! Per-axis transformation pipelines
//!
//! Operators run left to right and the value is clamped to `[-1, 1]` after
//! every stage.

use super::curve::ResponseCurve;
use super::error::ConfigError;
use crate::controller::device::normalize_axis;
use serde::{Deserialize, Serialize};

/// Four-limit dead zone
///
/// `[center_low, center_high]` reads as rest, values past `low` or `high`
/// saturate and the remaining travel is rescaled linearly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeadZone {
    #[serde(default = "neg_one")]
    pub low: f64,
    #[serde(default)]
    pub center_low: f64,
    #[serde(default)]
    pub center_high: f64,
    #[serde(default = "one")]
    pub high: f64,
}

fn one() -> f64 {
    1.0
}

fn neg_one() -> f64 {
    -1.0
}

impl Default for DeadZone {
    fn default() -> Self {
        Self {
            low: -1.0,
            center_low: 0.0,
            center_high: 0.0,
            high: 1.0,
        }
    }
}

impl DeadZone {
    pub fn new(low: f64, center_low: f64, center_high: f64, high: f64) -> Result<Self, ConfigError> {
        let dz = Self {
            low,
            center_low,
            center_high,
            high,
        };
        dz.validate()?;
        Ok(dz)
    }

    /// Symmetric dead zone of `width` on each side of the center
    pub fn centered(width: f64) -> Result<Self, ConfigError> {
        Self::new(-1.0, -width, width, 1.0)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = [self.low, self.center_low, self.center_high, self.high];
        if limits.iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::InvalidDeadZone(
                "limits must be finite".to_string(),
            ));
        }
        let ordered = -1.0 <= self.low
            && self.low < self.center_low
            && self.center_low <= 0.0
            && 0.0 <= self.center_high
            && self.center_high < self.high
            && self.high <= 1.0;
        if !ordered {
            return Err(ConfigError::InvalidDeadZone(format!(
                "expected -1 <= low < center_low <= 0 <= center_high < high <= 1, got {:?}",
                limits
            )));
        }
        Ok(())
    }

    pub fn apply(&self, value: f64) -> f64 {
        if value >= 0.0 {
            ((value - self.center_high) / (self.high - self.center_high).abs()).clamp(0.0, 1.0)
        } else {
            ((value - self.center_low) / (self.low - self.center_low).abs()).clamp(-1.0, 0.0)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    DeadZone(DeadZone),
    Curve(ResponseCurve),
    Invert,
}

impl Operator {
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            Operator::DeadZone(dz) => dz.apply(value),
            Operator::Curve(curve) => curve.evaluate(value),
            Operator::Invert => -value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pipeline {
    pub name: String,
    operators: Vec<Operator>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, operators: Vec<Operator>) -> Self {
        Self {
            name: name.into(),
            operators,
        }
    }

    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    pub fn apply(&self, value: f64) -> f64 {
        self.operators
            .iter()
            .fold(normalize_axis(value), |v, op| normalize_axis(op.apply(v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_zone_rescales_outside_center() {
        let dz = DeadZone::new(-0.9, -0.1, 0.1, 0.9).unwrap();
        assert_eq!(dz.apply(0.05), 0.0);
        assert_eq!(dz.apply(-0.1), 0.0);
        assert!((dz.apply(0.5) - 0.5).abs() < 1e-12);
        assert_eq!(dz.apply(0.95), 1.0);
        assert_eq!(dz.apply(-1.0), -1.0);
        assert!((dz.apply(-0.5) + 0.5).abs() < 1e-12);
    }

    #[test]
    fn default_dead_zone_is_identity() {
        let dz = DeadZone::default();
        for v in [-1.0, -0.3, 0.0, 0.7, 1.0] {
            assert!((dz.apply(v) - v).abs() < 1e-12);
        }
    }

    #[test]
    fn invalid_limits_are_rejected() {
        assert!(DeadZone::new(-1.0, 0.1, 0.2, 1.0).is_err());
        assert!(DeadZone::new(-1.0, -0.1, 0.1, 1.5).is_err());
        assert!(DeadZone::new(-0.5, -0.5, 0.0, 1.0).is_err());
        assert!(DeadZone::centered(1.0).is_err());
        assert!(DeadZone::centered(0.2).is_ok());
    }

    #[test]
    fn pipeline_runs_left_to_right_with_clamping() {
        let curve = ResponseCurve::linear(&[(-1.0, -1.0), (1.0, 1.0)]).unwrap();
        let pipeline = Pipeline::new(
            "inverted",
            vec![
                Operator::DeadZone(DeadZone::centered(0.5).unwrap()),
                Operator::Invert,
                Operator::Curve(curve),
            ],
        );
        assert_eq!(pipeline.apply(0.25), 0.0);
        assert!((pipeline.apply(0.75) + 0.5).abs() < 1e-12);
        assert_eq!(pipeline.apply(4.0), -1.0);
        assert_eq!(Pipeline::default().apply(f64::NAN), 0.0);
    }
}
