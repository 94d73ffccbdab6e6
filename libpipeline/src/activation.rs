//! Activation algebra.
//!
//! Steps emit per-host scalars that are added to the running weight. The
//! additive identity is the "no effect" activation; weighers usually map a
//! raw metric into an activation band via min-max scaling.

use serde::{Deserialize, Serialize};

use crate::step::PipelineError;

/// The additive identity: returned when a step decides not to influence a
/// host's ranking.
pub fn no_effect() -> f64 {
    0.0
}

/// Monotone min-max scaling of a raw value into an activation band.
/// The input is clamped to `[x_lower, x_upper]` before interpolation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MinMaxScale {
    pub x_lower: f64,
    pub x_upper: f64,
    pub y_lower: f64,
    pub y_upper: f64,
}

impl MinMaxScale {
    /// Rejects degenerate input bounds, which would divide by zero.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.x_lower == self.x_upper {
            return Err(PipelineError::InvalidBounds);
        }
        Ok(())
    }

    pub fn scale(&self, x: f64) -> f64 {
        let clamped = x.clamp(self.x_lower.min(self.x_upper), self.x_upper.max(self.x_lower));
        self.y_lower + (clamped - self.x_lower) * (self.y_upper - self.y_lower)
            / (self.x_upper - self.x_lower)
    }
}
