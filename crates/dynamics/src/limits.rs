use crate::error::DynamicsError;
use crate::inverse::inverse_dynamics;
use crate::types::ACC;
use ndarray::{ArrayView4, Axis};
use serde::{Deserialize, Serialize};

/// Absolute bounds on each control channel, symmetric around zero.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlLimits {
    /// m/s²
    pub acceleration: f32,
    /// 1/m
    pub curvature: f32,
}

impl ControlLimits {
    /// # Errors
    /// Returns [`DynamicsError::InvalidLimit`] unless both limits are positive and finite.
    pub fn new(acceleration: f32, curvature: f32) -> Result<Self, DynamicsError> {
        for (name, value) in [("acceleration", acceleration), ("curvature", curvature)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(DynamicsError::InvalidLimit { name, value });
            }
        }
        Ok(Self { acceleration, curvature })
    }
}

/// Supplies the absolute control bounds for one batch.
pub trait ConstraintProvider {
    /// `positions` is `[sample, agent, t, 2]` with NaN for missing points.
    ///
    /// # Errors
    /// Implementations fail when the batch cannot be analysed.
    fn absolute_limits(&self, positions: ArrayView4<'_, f32>, dt: f32) -> Result<ControlLimits, DynamicsError>;
}

/// The same bounds for every batch.
#[derive(Clone, Copy, Debug)]
pub struct FixedLimits(pub ControlLimits);

impl ConstraintProvider for FixedLimits {
    fn absolute_limits(&self, _positions: ArrayView4<'_, f32>, _dt: f32) -> Result<ControlLimits, DynamicsError> {
        Ok(self.0)
    }
}

/// Acceleration bound taken from the largest valid acceleration observed in
/// the batch itself, never below `min_acceleration`.
#[derive(Clone, Copy, Debug)]
pub struct ObservedLimits {
    pub curvature: f32,
    pub min_acceleration: f32,
}

impl Default for ObservedLimits {
    fn default() -> Self {
        Self { curvature: 0.2, min_acceleration: 2.0 }
    }
}

impl ConstraintProvider for ObservedLimits {
    fn absolute_limits(&self, positions: ArrayView4<'_, f32>, dt: f32) -> Result<ControlLimits, DynamicsError> {
        let mut largest = 0.0f32;
        for sample in positions.axis_iter(Axis(0)) {
            let seq = inverse_dynamics(sample, dt)?;
            for (c, &ok) in seq.control.index_axis(Axis(2), ACC).iter().zip(&seq.valid) {
                if ok {
                    largest = largest.max(c.abs());
                }
            }
        }
        tracing::debug!(largest, floor = self.min_acceleration, "observed acceleration");
        ControlLimits::new(largest.max(self.min_acceleration), self.curvature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn observed_limits_floor() {
        let mut p = Array4::<f32>::zeros((1, 1, 3, 2));
        p[[0, 0, 1, 0]] = 1.0;
        p[[0, 0, 2, 0]] = 2.0;
        let limits = ObservedLimits::default().absolute_limits(p.view(), 1.0).unwrap();
        assert_eq!(limits, ControlLimits { acceleration: 2.0, curvature: 0.2 });
    }

    #[test]
    fn observed_limits_take_largest_valid_acceleration() {
        let mut p = Array4::<f32>::zeros((1, 1, 4, 2));
        for (t, x) in [0.0, 1.0, 2.0, 8.0].into_iter().enumerate() {
            p[[0, 0, t, 0]] = x;
        }
        let limits = ObservedLimits::default().absolute_limits(p.view(), 1.0).unwrap();
        assert!((limits.acceleration - 5.0).abs() < 1e-5);
    }

    #[test]
    fn rejects_non_positive_limit() {
        assert!(ControlLimits::new(1.0, 0.0).is_err());
    }
}
