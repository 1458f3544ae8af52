//! Agent ordering, observation masks and shape bookkeeping.

use crate::error::{AttackError, BatchError};
use ndarray::{s, Array3, Array4, ArrayView4, Axis};

pub const TARGET_NAME: &str = "tar";
pub const EGO_NAME: &str = "ego";

/// Agent permutation that puts the target first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentOrder {
    /// `order[new] = old`
    order: Vec<usize>,
    /// `inverse[old] = new`
    inverse: Vec<usize>,
    /// Position of the ego agent after reordering.
    ego: Option<usize>,
}

impl AgentOrder {
    /// Target first, everyone else in their original relative order.
    ///
    /// # Errors
    /// Returns [`BatchError::MissingTarget`] if no agent is named `tar`.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, BatchError> {
        let target = names
            .iter()
            .position(|n| n.as_ref() == TARGET_NAME)
            .ok_or(BatchError::MissingTarget)?;
        let order: Vec<usize> = std::iter::once(target).chain((0..names.len()).filter(|&i| i != target)).collect();
        let mut inverse = vec![0; order.len()];
        for (new, &old) in order.iter().enumerate() {
            inverse[old] = new;
        }
        let ego = names.iter().position(|n| n.as_ref() == EGO_NAME).map(|old| inverse[old]);
        Ok(Self { order, inverse, ego })
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn ego(&self) -> Option<usize> {
        self.ego
    }

    /// Caller order to working order.
    pub fn apply(&self, a: &Array4<f32>) -> Array4<f32> {
        a.select(Axis(1), &self.order)
    }

    /// Working order back to caller order.
    pub fn restore(&self, a: &Array4<f32>) -> Array4<f32> {
        a.select(Axis(1), &self.inverse)
    }
}

/// `[sample, agent, t]`: both coordinates finite.
pub fn observed_mask(positions: ArrayView4<'_, f32>) -> Array3<bool> {
    let (samples, agents, steps, _) = positions.dim();
    Array3::from_shape_fn((samples, agents, steps), |(s, a, t)| {
        positions[[s, a, t, 0]].is_finite() && positions[[s, a, t, 1]].is_finite()
    })
}

/// Number of future steps up to the last one at which the target (agent 0)
/// is observed in any sample.
pub fn target_future_len(future: ArrayView4<'_, f32>) -> usize {
    let mask = observed_mask(future);
    let steps = mask.shape()[2];
    (0..steps)
        .rev()
        .find(|&t| mask.slice(s![.., 0, t]).iter().any(|&o| o))
        .map_or(0, |t| t + 1)
}

/// Fails unless `after` is finite exactly where `before` is.
///
/// Both are flat `[sample, agent, t, 2]` buffers with `agents` and `steps`
/// describing the layout.
///
/// # Errors
/// Returns [`AttackError::ObservabilityChanged`] at the first differing point.
pub fn check_observability(before: &[f32], after: &[f32], agents: usize, steps: usize) -> Result<(), AttackError> {
    for (i, (b, a)) in before.chunks_exact(2).zip(after.chunks_exact(2)).enumerate() {
        let seen_before = b[0].is_finite() && b[1].is_finite();
        let seen_after = a[0].is_finite() && a[1].is_finite();
        if seen_before != seen_after {
            return Err(AttackError::ObservabilityChanged {
                sample: i / (agents * steps),
                agent: i / steps % agents,
                step: i % steps,
            });
        }
    }
    Ok(())
}
