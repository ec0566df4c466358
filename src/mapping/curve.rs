//! Response curves over control points
//!
//! The cubic variant uses Fritsch–Carlson tangents, which keeps the
//! interpolant monotonic on every interval where the control points are.

use super::error::ConfigError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    #[default]
    PiecewiseLinear,
    CubicSpline,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseCurve {
    interpolation: Interpolation,
    xs: Vec<f64>,
    ys: Vec<f64>,
    // Hermite tangents, only filled for cubic curves
    tangents: Vec<f64>,
}

impl ResponseCurve {
    pub fn new(interpolation: Interpolation, points: &[(f64, f64)]) -> Result<Self, ConfigError> {
        validate(points)?;
        let xs: Vec<f64> = points.iter().map(|p| p.0).collect();
        let ys: Vec<f64> = points.iter().map(|p| p.1).collect();
        let tangents = match interpolation {
            Interpolation::PiecewiseLinear => Vec::new(),
            Interpolation::CubicSpline => monotone_tangents(&xs, &ys),
        };
        Ok(Self {
            interpolation,
            xs,
            ys,
            tangents,
        })
    }

    pub fn linear(points: &[(f64, f64)]) -> Result<Self, ConfigError> {
        Self::new(Interpolation::PiecewiseLinear, points)
    }

    pub fn cubic(points: &[(f64, f64)]) -> Result<Self, ConfigError> {
        Self::new(Interpolation::CubicSpline, points)
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.xs.iter().copied().zip(self.ys.iter().copied())
    }

    /// Inputs beyond the first or last control point hold the end value
    pub fn evaluate(&self, x: f64) -> f64 {
        let n = self.xs.len();
        let x = x.clamp(self.xs[0], self.xs[n - 1]);
        let k = self
            .xs
            .partition_point(|p| *p <= x)
            .saturating_sub(1)
            .min(n - 2);

        let (x0, x1) = (self.xs[k], self.xs[k + 1]);
        let (y0, y1) = (self.ys[k], self.ys[k + 1]);
        let h = x1 - x0;
        let t = (x - x0) / h;

        let y = match self.interpolation {
            Interpolation::PiecewiseLinear => y0 + t * (y1 - y0),
            Interpolation::CubicSpline => {
                let t2 = t * t;
                let t3 = t2 * t;
                let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
                let h10 = t3 - 2.0 * t2 + t;
                let h01 = -2.0 * t3 + 3.0 * t2;
                let h11 = t3 - t2;
                h00 * y0 + h10 * h * self.tangents[k] + h01 * y1 + h11 * h * self.tangents[k + 1]
            }
        };
        y.clamp(-1.0, 1.0)
    }
}

fn validate(points: &[(f64, f64)]) -> Result<(), ConfigError> {
    if points.len() < 2 {
        return Err(ConfigError::TooFewControlPoints(points.len()));
    }
    for (index, (x, y)) in points.iter().enumerate() {
        if !x.is_finite() || !y.is_finite() {
            return Err(ConfigError::NonFiniteControlPoint(index));
        }
        if !(-1.0..=1.0).contains(x) || !(-1.0..=1.0).contains(y) {
            return Err(ConfigError::ControlPointOutOfRange {
                index,
                x: *x,
                y: *y,
            });
        }
    }
    if let Some(index) = points.windows(2).position(|w| w[1].0 <= w[0].0) {
        return Err(ConfigError::NonIncreasingControlPoints(index + 1));
    }
    Ok(())
}

fn monotone_tangents(xs: &[f64], ys: &[f64]) -> Vec<f64> {
    let n = xs.len();
    let secants: Vec<f64> = (0..n - 1)
        .map(|k| (ys[k + 1] - ys[k]) / (xs[k + 1] - xs[k]))
        .collect();

    let mut m = vec![0.0; n];
    m[0] = secants[0];
    m[n - 1] = secants[n - 2];
    for k in 1..n - 1 {
        let (before, after) = (secants[k - 1], secants[k]);
        m[k] = if before * after <= 0.0 {
            0.0
        } else {
            (before + after) / 2.0
        };
    }

    for k in 0..n - 1 {
        let d = secants[k];
        if d == 0.0 {
            m[k] = 0.0;
            m[k + 1] = 0.0;
            continue;
        }
        let a = m[k] / d;
        let b = m[k + 1] / d;
        let s = a * a + b * b;
        if s > 9.0 {
            let t = 3.0 / s.sqrt();
            m[k] = t * a * d;
            m[k + 1] = t * b * d;
        }
    }
    m
}
