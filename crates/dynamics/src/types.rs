use ndarray::{Array2, Array3, ArrayView1};

/// Longitudinal acceleration channel of a control pair.
pub const ACC: usize = 0;
/// Curvature channel of a control pair.
pub const CURV: usize = 1;

/// Control actions recovered from observed positions, one row per agent.
///
/// Control index `t` drives the interval `t - 1 -> t`, so index 0 is always
/// zero. `heading` and `velocity` are the state reached after applying the
/// control at the same index.
#[derive(Clone, Debug, PartialEq)]
pub struct ControlSequence {
    /// `[row, t, 2]` acceleration (m/s²) and curvature (1/m).
    pub control: Array3<f32>,
    /// `[row, t]` radians, unwrapped.
    pub heading: Array2<f32>,
    /// `[row, t]` m/s.
    pub velocity: Array2<f32>,
    /// `[row, t]` whether the control at `t` was measured between observed
    /// points and may be perturbed.
    pub valid: Array2<bool>,
}

impl ControlSequence {
    pub fn rows(&self) -> usize {
        self.control.shape()[0]
    }

    pub fn steps(&self) -> usize {
        self.control.shape()[1]
    }

    pub fn initial_heading(&self) -> ArrayView1<'_, f32> {
        self.heading.column(0)
    }

    pub fn initial_velocity(&self) -> ArrayView1<'_, f32> {
        self.velocity.column(0)
    }
}

/// Wraps an angle difference into `(-pi, pi]`.
pub fn wrap_angle(a: f32) -> f32 {
    use std::f32::consts::{PI, TAU};
    let w = (a + PI).rem_euclid(TAU) - PI;
    if w <= -PI {
        w + TAU
    } else {
        w
    }
}

#[cfg(test)]
mod tests {
    use super::wrap_angle;
    use std::f32::consts::PI;

    #[test]
    fn wraps_into_half_open_interval() {
        assert!((wrap_angle(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-6);
        assert!((wrap_angle(-PI) - PI).abs() < 1e-6);
        assert!((wrap_angle(0.25) - 0.25).abs() < 1e-7);
    }
}
