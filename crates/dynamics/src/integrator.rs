//! # Forward integration
//!
//! Semi-implicit Euler update of the bicycle-style state, per control index `t`:
//!
//! ```text
//! v_t = v_{t-1} + a_t dt
//! h_t = h_{t-1} + k_t v_{t-1} dt
//! p_t = p_{t-1} + v_t (cos h_t, sin h_t) dt
//! ```
//!
//! [`integrate`] runs it on plain floats for one track; [`forward_dynamics`]
//! runs it on [`Tensor`]s for a batch of tracks so that gradients can flow
//! from positions back to the controls.

use crate::error::DynamicsError;
use crate::inverse::check_dt;
use crate::types::{ACC, CURV};
use ml::{Recorder, Tensor};
use ndarray::{Array2, ArrayView2};

/// Integrates one track of `[t, 2]` controls from position `origin`.
///
/// # Errors
/// Returns [`DynamicsError`] for a malformed array or a bad `dt`.
pub fn integrate(
    control: ArrayView2<'_, f32>,
    origin: [f32; 2],
    heading: f32,
    velocity: f32,
    dt: f32,
) -> Result<Array2<f32>, DynamicsError> {
    check_dt(dt)?;
    let (steps, dims) = control.dim();
    if dims != 2 {
        return Err(DynamicsError::Shape { expected: "[t, 2]", got: control.shape().to_vec() });
    }
    let mut out = Array2::<f32>::zeros((steps, 2));
    if steps == 0 {
        return Ok(out);
    }
    let (mut x, mut y) = (origin[0], origin[1]);
    let (mut h, mut v) = (heading, velocity);
    out[[0, 0]] = x;
    out[[0, 1]] = y;
    for t in 1..steps {
        h += control[[t, CURV]] * v * dt;
        v += control[[t, ACC]] * dt;
        x += v * h.cos() * dt;
        y += v * h.sin() * dt;
        out[[t, 0]] = x;
        out[[t, 1]] = y;
    }
    Ok(out)
}

/// Batched, differentiable version of [`integrate`].
///
/// `control` is `[row, t, 2]`, `origin` is `[row, 2]`; `heading` and
/// `velocity` hold the initial state of each row. Returns `[row, t, 2]`.
///
/// # Errors
/// Returns [`DynamicsError`] if the shapes disagree or `dt` is bad.
pub fn forward_dynamics(
    control: &Tensor,
    origin: &Tensor,
    heading: &[f32],
    velocity: &[f32],
    dt: f32,
    rec: &mut dyn Recorder,
) -> Result<Tensor, DynamicsError> {
    check_dt(dt)?;
    if control.shape.len() != 3 || control.shape[2] != 2 {
        return Err(DynamicsError::Shape { expected: "[row, t, 2]", got: control.shape.clone() });
    }
    let (rows, steps) = (control.shape[0], control.shape[1]);
    if origin.shape != [rows, 2] || heading.len() != rows || velocity.len() != rows {
        return Err(DynamicsError::Shape { expected: "[row, 2] origin and [row] state", got: origin.shape.clone() });
    }

    let channel = |t: usize, c: usize| (0..rows).map(|r| (r * steps + t) * 2 + c).collect::<Vec<_>>();

    let mut x = origin.gather((0..rows).map(|r| r * 2).collect(), vec![rows], rec);
    let mut y = origin.gather((0..rows).map(|r| r * 2 + 1).collect(), vec![rows], rec);
    let mut h = Tensor::from_vec(vec![rows], heading.to_vec());
    let mut v = Tensor::from_vec(vec![rows], velocity.to_vec());

    let mut parts = Vec::with_capacity(steps * 2);
    parts.push(x.clone());
    parts.push(y.clone());
    for t in 1..steps {
        let acc = control.gather(channel(t, ACC), vec![rows], rec);
        let curv = control.gather(channel(t, CURV), vec![rows], rec);
        h = h.add(&curv.mul(&v, rec).mul_scalar(dt, rec), rec);
        v = v.add(&acc.mul_scalar(dt, rec), rec);
        let step = v.mul_scalar(dt, rec);
        x = x.add(&step.mul(&h.cos(rec), rec), rec);
        y = y.add(&step.mul(&h.sin(rec), rec), rec);
        parts.push(x.clone());
        parts.push(y.clone());
    }

    // parts are laid out [t][coord][row]
    let refs: Vec<&Tensor> = parts.iter().collect();
    let flat = Tensor::concat(&refs, rec);
    let mut order = Vec::with_capacity(rows * steps * 2);
    for r in 0..rows {
        for t in 0..steps {
            for c in 0..2 {
                order.push((t * 2 + c) * rows + r);
            }
        }
    }
    Ok(flat.gather(order, vec![rows, steps, 2], rec))
}
