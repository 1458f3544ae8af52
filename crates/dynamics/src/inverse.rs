//! # Inverse dynamics
//!
//! Recovers the control actions that reproduce an observed track under the
//! forward model in [`crate::integrator`].

use crate::error::DynamicsError;
use crate::types::{wrap_angle, ControlSequence, ACC, CURV};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3};

/// Displacements shorter than this keep the previous heading.
pub const MIN_DISPLACEMENT: f32 = 1e-4;
/// Speed floor used when converting a heading change into curvature.
pub const MIN_CURVATURE_SPEED: f32 = 0.1;

pub(crate) fn check_dt(dt: f32) -> Result<(), DynamicsError> {
    if dt.is_finite() && dt > 0.0 {
        Ok(())
    } else {
        Err(DynamicsError::InvalidDt(dt))
    }
}

fn observed(track: &ArrayView2<'_, f32>, t: usize) -> bool {
    track[[t, 0]].is_finite() && track[[t, 1]].is_finite()
}

/// Derives controls, headings and speeds for every row of `positions`
/// (`[row, t, 2]`, NaN where unobserved).
///
/// Each row starts in the state of its first measurable interval. Across a
/// gap the state is held with zero control; the first control after a gap
/// absorbs the average motion over the gap and is marked invalid. A control
/// is valid when its own interval and the one before it are both observed
/// (index 1 only needs its own).
///
/// # Errors
/// Returns [`DynamicsError`] for a malformed array or a bad `dt`.
#[allow(clippy::cast_precision_loss)]
pub fn inverse_dynamics(positions: ArrayView3<'_, f32>, dt: f32) -> Result<ControlSequence, DynamicsError> {
    check_dt(dt)?;
    let (rows, steps, dims) = positions.dim();
    if dims != 2 || steps == 0 {
        return Err(DynamicsError::Shape { expected: "[row, t, 2] with t > 0", got: positions.shape().to_vec() });
    }

    let mut control = Array3::<f32>::zeros((rows, steps, 2));
    let mut heading = Array2::<f32>::zeros((rows, steps));
    let mut velocity = Array2::<f32>::zeros((rows, steps));
    let mut valid = Array2::from_elem((rows, steps), false);

    for (r, track) in positions.outer_iter().enumerate() {
        // Average speed and direction of motion arriving at each observed point.
        let mut measured: Vec<Option<(f32, f32)>> = vec![None; steps];
        let mut last_seen: Option<usize> = None;
        let mut last_dir: Option<f32> = None;
        for t in 0..steps {
            if !observed(&track, t) {
                continue;
            }
            if let Some(prev) = last_seen {
                let n = (t - prev) as f32;
                let dx = (track[[t, 0]] - track[[prev, 0]]) / n;
                let dy = (track[[t, 1]] - track[[prev, 1]]) / n;
                let dist = dx.hypot(dy);
                let dir = if dist < MIN_DISPLACEMENT {
                    last_dir.unwrap_or(0.0)
                } else {
                    let raw = dy.atan2(dx);
                    last_dir.map_or(raw, |d| d + wrap_angle(raw - d))
                };
                last_dir = Some(dir);
                measured[t] = Some((dist / dt, dir));
            }
            last_seen = Some(t);
        }

        let (v0, h0) = measured.iter().flatten().next().copied().unwrap_or((0.0, 0.0));
        let (mut v, mut h) = (v0, h0);
        heading[[r, 0]] = h;
        velocity[[r, 0]] = v;
        for t in 1..steps {
            if let Some((speed, dir)) = measured[t] {
                let acc = (speed - v) / dt;
                let curv = wrap_angle(dir - h) / (v.max(MIN_CURVATURE_SPEED) * dt);
                control[[r, t, ACC]] = acc;
                control[[r, t, CURV]] = curv;
                h += curv * v * dt;
                v += acc * dt;
            }
            heading[[r, t]] = h;
            velocity[[r, t]] = v;

            let interval = observed(&track, t) && observed(&track, t - 1);
            let before = t == 1 || (observed(&track, t - 1) && observed(&track, t - 2));
            valid[[r, t]] = interval && before;
        }
    }

    Ok(ControlSequence { control, heading, velocity, valid })
}
