//! # Projected gradient optimiser
//!
//! Searches a perturbation `delta` of the target's control actions. Each
//! outer iteration differentiates the summed per-sample loss, clamps the raw
//! gradient, and takes one projected step per sample. A sample whose
//! candidate produces a non-finite loss has its step halved and is retried;
//! after [`MAX_BACKOFF_ATTEMPTS`] its perturbation is reset to zero.

use crate::config::{AttackConfig, GRADIENT_CLAMP_FACTOR, MAX_BACKOFF_ATTEMPTS};
use crate::error::AttackError;
use crate::report::IterationRecord;
use dynamics::{ControlLimits, ACC, CURV};
use ml::{compute_gradient, Graph, Recorder, Tensor};
use tracing::{debug, info, warn};

/// Side values of one evaluation.
#[derive(Clone, Debug, Default)]
pub struct Probe {
    /// Per-sample largest displacement of the target's past, in metres.
    pub max_displacement: Vec<f32>,
}

/// Loss of a perturbation, one value per sample.
pub trait Objective {
    /// `delta` is `[sample, t, 2]`.
    ///
    /// # Errors
    /// Fatal failures only; numerical trouble must show up as a non-finite loss.
    fn evaluate(&self, delta: &Tensor, rec: &mut dyn Recorder) -> Result<(Tensor, Probe), AttackError>;
}

/// Bounds and step sizes of one attack on one batch.
pub struct ProjectedGradient<'a> {
    /// Unperturbed controls, `[sample, t, 2]`.
    control: &'a [f32],
    /// `[sample, t]` controls that may change.
    valid: &'a [bool],
    samples: usize,
    steps: usize,
    /// Relative bounds apply to control indices below this.
    past_steps: usize,
    relative: [f32; 2],
    absolute: [f32; 2],
    alpha: [f32; 2],
    gamma: f32,
    iterations: usize,
}

/// Final perturbation and the per-iteration diagnostics.
#[derive(Debug)]
pub struct Outcome {
    pub delta: Vec<f32>,
    pub history: Vec<IterationRecord>,
}

impl<'a> ProjectedGradient<'a> {
    /// # Panics
    /// Panics if `control` and `valid` disagree with `samples * steps`.
    pub fn new(
        config: &AttackConfig,
        limits: ControlLimits,
        control: &'a [f32],
        valid: &'a [bool],
        samples: usize,
        past_steps: usize,
    ) -> Self {
        let steps = valid.len() / samples.max(1);
        assert_eq!(control.len(), samples * steps * 2, "control layout");
        assert_eq!(valid.len(), samples * steps, "validity layout");
        Self {
            control,
            valid,
            samples,
            steps,
            past_steps,
            relative: [config.epsilon_acc_relative, config.epsilon_curv_relative],
            absolute: [limits.acceleration, config.epsilon_curv_absolute],
            alpha: [config.alpha_acc(), config.alpha_curv()],
            gamma: config.gamma,
            iterations: config.max_number_iterations,
        }
    }

    fn tensor(&self, delta: &[f32]) -> Tensor {
        Tensor::from_vec(vec![self.samples, self.steps, 2], delta.to_vec())
    }

    /// Clamps each channel to `GRADIENT_CLAMP_FACTOR` times its relative bound.
    pub fn clamp_gradient(&self, grad: &mut [f32]) {
        for pair in grad.chunks_exact_mut(2) {
            for c in [ACC, CURV] {
                let bound = GRADIENT_CLAMP_FACTOR * self.relative[c];
                pair[c] = pair[c].clamp(-bound, bound);
            }
        }
    }

    /// Projects a candidate in place onto the feasible set.
    ///
    /// The relative bound is applied first, then the absolute bound on the
    /// resulting control. A control whose unperturbed value already lies
    /// outside the absolute bound may stay where it is or move back towards
    /// the bound, never further out, so a zero `delta` is always feasible.
    /// Controls that are not valid stay unperturbed.
    pub fn project(&self, delta: &mut [f32]) {
        for (i, pair) in delta.chunks_exact_mut(2).enumerate() {
            if !self.valid[i] {
                pair.fill(0.0);
                continue;
            }
            let t = i % self.steps;
            for c in [ACC, CURV] {
                let mut d = pair[c];
                if t < self.past_steps {
                    d = d.clamp(-self.relative[c], self.relative[c]);
                }
                let nominal = self.control[i * 2 + c];
                let low = (-self.absolute[c]).min(nominal);
                let high = self.absolute[c].max(nominal);
                let clamped = (nominal + d).clamp(low, high);
                pair[c] = clamped - nominal;
            }
        }
    }

    fn candidate(&self, delta: &[f32], grad: &[f32], alpha: &[[f32; 2]]) -> Vec<f32> {
        let per_sample = self.steps * 2;
        let mut next: Vec<f32> = delta
            .iter()
            .zip(grad)
            .enumerate()
            .map(|(i, (d, g))| d - g * alpha[i / per_sample][i % 2])
            .collect();
        self.project(&mut next);
        next
    }

    /// Runs the configured number of outer iterations from zero perturbation.
    ///
    /// # Errors
    /// Propagates fatal errors from `objective` and fails with
    /// [`AttackError::NonFiniteGradient`] if differentiation breaks down.
    pub fn run(&self, objective: &dyn Objective) -> Result<Outcome, AttackError> {
        let mut delta = vec![0.0; self.samples * self.steps * 2];
        let mut alpha = vec![self.alpha; self.samples];
        let mut history = Vec::with_capacity(self.iterations);
        let per_sample = self.steps * 2;

        for iteration in 0..self.iterations {
            let eval = compute_gradient(&self.tensor(&delta), |d, rec| objective.evaluate(d, rec))?;
            let alpha_curvature: Vec<f32> = alpha.iter().map(|a| a[CURV]).collect();
            info!(
                iteration,
                losses = ?eval.loss,
                max_displacement = ?eval.aux.max_displacement,
                alpha_curvature = ?alpha_curvature,
                "initial state"
            );
            let mut grad = eval.grad;
            if !grad.iter().all(|g| g.is_finite()) {
                return Err(AttackError::NonFiniteGradient(iteration));
            }
            self.clamp_gradient(&mut grad);

            let mut step = alpha.clone();
            let mut attempts = 0;
            let mut reset_samples = Vec::new();
            let (accepted, loss, probe) = loop {
                attempts += 1;
                let mut next = self.candidate(&delta, &grad, &step);
                let (loss, probe) = objective.evaluate(&self.tensor(&next), &mut Graph::new())?;
                let failed: Vec<usize> = (0..self.samples).filter(|&s| !loss.data[s].is_finite()).collect();
                debug!(
                    iteration,
                    attempt = attempts,
                    losses = ?loss.data,
                    max_displacement = ?probe.max_displacement,
                    failed = failed.len(),
                    "candidate"
                );
                if failed.is_empty() {
                    break (next, loss.data, probe);
                }
                if attempts >= MAX_BACKOFF_ATTEMPTS {
                    warn!(iteration, samples = ?failed, "backoff exhausted, resetting perturbation");
                    for &s in &failed {
                        next[s * per_sample..(s + 1) * per_sample].fill(0.0);
                    }
                    reset_samples = failed;
                    let (loss, probe) = objective.evaluate(&self.tensor(&next), &mut Graph::new())?;
                    break (next, loss.data, probe);
                }
                for &s in &failed {
                    step[s][ACC] *= 0.5;
                    step[s][CURV] *= 0.5;
                }
            };

            history.push(IterationRecord {
                iteration,
                initial_loss: eval.loss,
                loss,
                max_displacement: probe.max_displacement,
                alpha_curvature: step.iter().map(|a| a[CURV]).collect(),
                attempts,
                reset_samples,
            });
            delta = accepted;
            for a in &mut alpha {
                a[ACC] *= self.gamma;
                a[CURV] *= self.gamma;
            }
        }
        Ok(Outcome { delta, history })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn optimiser<'a>(control: &'a [f32], valid: &'a [bool]) -> ProjectedGradient<'a> {
        let config = AttackConfig::new(0.1);
        ProjectedGradient::new(&config, ControlLimits { acceleration: 3.0, curvature: 0.2 }, control, valid, 1, 2)
    }

    #[test]
    fn projection_applies_both_bounds() {
        let control = [0.0, 0.0, 2.5, 0.18, 0.0, 0.0];
        let valid = [false, true, true];
        let pg = optimiser(&control, &valid);
        let mut delta = [1.0, 1.0, 5.0, 0.5, 5.0, 0.5];
        pg.project(&mut delta);
        // index 0 invalid
        assert_eq!(&delta[..2], &[0.0, 0.0]);
        // relative then absolute
        assert!((delta[2] - 0.5).abs() < 1e-6);
        assert!((delta[3] - 0.02).abs() < 1e-6);
        // beyond the past only the absolute bound applies
        assert!((delta[4] - 3.0).abs() < 1e-6);
        assert!((delta[5] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn out_of_bound_controls_only_move_inwards() {
        let control = [3.5, 0.5, -4.0, -0.3];
        let valid = [true, true];
        let pg = optimiser(&control, &valid);
        let mut still = [0.0; 4];
        pg.project(&mut still);
        assert_eq!(still, [0.0; 4]);

        let mut outwards = [0.5, 0.02, -0.5, -0.02];
        pg.project(&mut outwards);
        assert_eq!(outwards, [0.0; 4]);

        let mut inwards = [-0.5, -0.02, 0.5, 0.02];
        pg.project(&mut inwards);
        assert!((inwards[0] + 0.5).abs() < 1e-6);
        assert!((inwards[1] + 0.02).abs() < 1e-6);
        assert!((inwards[2] - 0.5).abs() < 1e-6);
        assert!((inwards[3] - 0.02).abs() < 1e-6);
    }

    #[test]
    fn gradient_clamp_per_channel() {
        let control = [0.0; 2];
        let valid = [true];
        let pg = ProjectedGradient::new(
            &AttackConfig::new(0.1),
            ControlLimits { acceleration: 3.0, curvature: 0.2 },
            &control,
            &valid,
            1,
            1,
        );
        let mut grad = [100.0, -100.0];
        pg.clamp_gradient(&mut grad);
        assert_eq!(grad, [40.0, -1.0]);
    }

    struct Quadratic;

    impl Objective for Quadratic {
        fn evaluate(&self, delta: &Tensor, rec: &mut dyn Recorder) -> Result<(Tensor, Probe), AttackError> {
            // pull every entry towards 1
            let off = delta.add_scalar(-1.0, rec);
            Ok((off.mul(&off, rec).reduce_sum(rec), Probe::default()))
        }
    }

    #[test]
    fn descends_within_bounds() {
        let control = [0.0; 6];
        let valid = [false, true, true];
        let mut config = AttackConfig::new(0.1);
        config.max_number_iterations = 30;
        config.alpha = 0.005;
        let limits = ControlLimits { acceleration: 3.0, curvature: 0.2 };
        let pg = ProjectedGradient::new(&config, limits, &control, &valid, 1, 3);
        let outcome = pg.run(&Quadratic).unwrap();
        assert_eq!(outcome.history.len(), 30);
        assert_eq!(&outcome.delta[..2], &[0.0, 0.0]);
        assert!((outcome.delta[2] - 1.0).abs() < 1e-3);
        assert!((outcome.delta[3] - 0.05).abs() < 1e-6);
        let first = outcome.history[0].loss[0];
        let last = outcome.history[29].loss[0];
        assert!(last < first);
    }
}
