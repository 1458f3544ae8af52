//! The trajectory prediction capability and two reference models.
//!
//! A model sees past positions `[sample, agent, timestep, 2]` in which missing
//! observations are NaN, and must keep those NaNs out of both its output and
//! its gradient. Both models here do that by only ever gathering observed
//! coordinates, routing everything else to an appended constant zero.

use crate::context::SceneContext;
use crate::error::ModelError;
use crate::nn::Dense;
use crate::recorder::Recorder;
use crate::Tensor;
use ndarray::Array2;

/// What the caller wants predicted.
#[derive(Clone, Debug)]
pub struct PredictionRequest {
    /// `[sample, agent]`: agents whose forecast is needed.
    pub pred_agents: Array2<bool>,
    pub num_steps: usize,
    pub num_paths: usize,
}

/// A differentiable trajectory forecaster.
pub trait Predictor {
    fn name(&self) -> &str;

    /// Forecast `[sample, agent, path, step, 2]`.
    ///
    /// Only entries of agents flagged in `request.pred_agents` are meaningful;
    /// the rest must be finite but carry no information.
    ///
    /// # Errors
    /// Returns [`ModelError`] when the input violates the model's contract.
    fn predict(
        &self,
        past: &Tensor,
        ctx: &SceneContext,
        request: &PredictionRequest,
        rec: &mut dyn Recorder,
    ) -> Result<Tensor, ModelError>;
}

struct PastLayout {
    samples: usize,
    agents: usize,
    steps: usize,
}

impl PastLayout {
    fn check(past: &Tensor, request: &PredictionRequest) -> Result<Self, ModelError> {
        if past.shape.len() != 4 || past.shape[3] != 2 {
            return Err(ModelError::Shape { expected: vec![0, 0, 0, 2], got: past.shape.clone() });
        }
        let layout = Self { samples: past.shape[0], agents: past.shape[1], steps: past.shape[2] };
        let (rows, cols) = request.pred_agents.dim();
        if rows != layout.samples || cols != layout.agents {
            return Err(ModelError::Shape {
                expected: vec![layout.samples, layout.agents],
                got: vec![rows, cols],
            });
        }
        Ok(layout)
    }

    /// Flat index of the x coordinate of `(s, a, t)`.
    fn at(&self, s: usize, a: usize, t: usize) -> usize {
        ((s * self.agents + a) * self.steps + t) * 2
    }

    fn observed(&self, past: &Tensor, s: usize, a: usize, t: usize) -> bool {
        let i = self.at(s, a, t);
        past.data[i].is_finite() && past.data[i + 1].is_finite()
    }

    /// Observed timesteps of `(s, a)`, latest last.
    fn observed_steps(&self, past: &Tensor, s: usize, a: usize) -> Vec<usize> {
        (0..self.steps).filter(|&t| self.observed(past, s, a, t)).collect()
    }

    fn output_shape(&self, request: &PredictionRequest) -> Vec<usize> {
        vec![self.samples, self.agents, request.num_paths, request.num_steps, 2]
    }
}

/// Extrapolates the most recent observed displacement at constant velocity.
///
/// Agents with a single observation stay put. Every path is identical.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConstantVelocity;

impl Predictor for ConstantVelocity {
    fn name(&self) -> &str {
        "constant_velocity"
    }

    #[allow(clippy::cast_precision_loss)]
    fn predict(
        &self,
        past: &Tensor,
        _ctx: &SceneContext,
        request: &PredictionRequest,
        rec: &mut dyn Recorder,
    ) -> Result<Tensor, ModelError> {
        let layout = PastLayout::check(past, request)?;
        let zero = Tensor::zeros(vec![1]);
        let zero_slot = past.len();
        let flat = Tensor::concat(&[past, &zero], rec);

        let shape = layout.output_shape(request);
        let total: usize = shape.iter().product();
        let mut last_idx = Vec::with_capacity(total);
        let mut prev_idx = Vec::with_capacity(total);
        let mut scale = Vec::with_capacity(total);

        for s in 0..layout.samples {
            for a in 0..layout.agents {
                let steps = if request.pred_agents[[s, a]] {
                    layout.observed_steps(past, s, a)
                } else {
                    Vec::new()
                };
                let (last, prev, gap) = match steps.as_slice() {
                    [] => (None, None, 1),
                    [t] => (Some(*t), Some(*t), 1),
                    [.., t0, t1] => (Some(*t1), Some(*t0), t1 - t0),
                };
                for _ in 0..request.num_paths {
                    for k in 0..request.num_steps {
                        for c in 0..2 {
                            last_idx.push(last.map_or(zero_slot, |t| layout.at(s, a, t) + c));
                            prev_idx.push(prev.map_or(zero_slot, |t| layout.at(s, a, t) + c));
                            scale.push((k + 1) as f32 / gap as f32);
                        }
                    }
                }
            }
        }

        let last = flat.gather(last_idx, shape.clone(), rec);
        let prev = flat.gather(prev_idx, shape.clone(), rec);
        let step = last.sub(&prev, rec);
        let scale = Tensor::from_vec(shape, scale);
        let travel = step.mul(&scale, rec);
        Ok(last.add(&travel, rec))
    }
}

/// Two-layer perceptron forecasting offsets from the last observed position.
///
/// The input of an agent is its last `history` positions relative to its last
/// observed one (missing points read as zero offset), scaled down by
/// [`MlpPredictor::SCALE`]. Weights are drawn from a seeded generator so runs
/// are reproducible.
pub struct MlpPredictor {
    hidden: Dense,
    head: Dense,
    history: usize,
    horizon: usize,
    paths: usize,
}

impl MlpPredictor {
    pub const SCALE: f32 = 10.0;

    #[must_use]
    pub fn new(history: usize, horizon: usize, paths: usize, hidden: usize, seed: u64) -> Self {
        let mut rng = fastrand::Rng::with_seed(seed);
        Self {
            hidden: Dense::xavier(history * 2, hidden, &mut rng),
            head: Dense::xavier(hidden, paths * horizon * 2, &mut rng),
            history,
            horizon,
            paths,
        }
    }
}

impl Predictor for MlpPredictor {
    fn name(&self) -> &str {
        "mlp"
    }

    fn predict(
        &self,
        past: &Tensor,
        _ctx: &SceneContext,
        request: &PredictionRequest,
        rec: &mut dyn Recorder,
    ) -> Result<Tensor, ModelError> {
        let layout = PastLayout::check(past, request)?;
        if layout.steps < self.history {
            return Err(ModelError::InsufficientHistory {
                model: self.name().to_owned(),
                needed: self.history,
                got: layout.steps,
            });
        }
        if request.num_steps > self.horizon || request.num_paths > self.paths {
            return Err(ModelError::Shape {
                expected: vec![self.paths, self.horizon],
                got: vec![request.num_paths, request.num_steps],
            });
        }

        let zero = Tensor::zeros(vec![1]);
        let zero_slot = past.len();
        let flat = Tensor::concat(&[past, &zero], rec);

        // One row per requested agent.
        let mut rows = Vec::new();
        let mut point_idx = Vec::new();
        let mut anchor_idx = Vec::new();
        for s in 0..layout.samples {
            for a in 0..layout.agents {
                if !request.pred_agents[[s, a]] {
                    continue;
                }
                let last = layout.observed_steps(past, s, a).last().copied();
                for t in layout.steps - self.history..layout.steps {
                    let seen = last.is_some() && layout.observed(past, s, a, t);
                    for c in 0..2 {
                        point_idx.push(if seen { layout.at(s, a, t) + c } else { zero_slot });
                        anchor_idx.push(match last {
                            Some(l) if seen => layout.at(s, a, l) + c,
                            _ => zero_slot,
                        });
                    }
                }
                rows.push((s, a, last));
            }
        }

        let shape = layout.output_shape(request);
        let total: usize = shape.iter().product();
        if rows.is_empty() {
            return Ok(Tensor::zeros(shape));
        }

        let width = self.history * 2;
        let points = flat.gather(point_idx, vec![rows.len(), width], rec);
        let anchors = flat.gather(anchor_idx, vec![rows.len(), width], rec);
        let input = points.sub(&anchors, rec).mul_scalar(1.0 / Self::SCALE, rec);
        let hidden = self.hidden.forward(&input, rec).tanh(rec);
        let offsets = self.head.forward(&hidden, rec).mul_scalar(Self::SCALE, rec);

        let out_width = self.paths * self.horizon * 2;
        let mut base_idx = Vec::with_capacity(rows.len() * out_width);
        for &(s, a, last) in &rows {
            for j in 0..out_width {
                base_idx.push(last.map_or(zero_slot, |l| layout.at(s, a, l) + j % 2));
            }
        }
        let base = flat.gather(base_idx, vec![rows.len(), out_width], rec);
        let positions = offsets.add(&base, rec);

        let filler = positions.len();
        let padded = Tensor::concat(&[&positions, &zero], rec);
        let mut row_of = vec![None; layout.samples * layout.agents];
        for (r, &(s, a, _)) in rows.iter().enumerate() {
            row_of[s * layout.agents + a] = Some(r);
        }
        let mut out_idx = Vec::with_capacity(total);
        for row in row_of {
            for p in 0..request.num_paths {
                for k in 0..request.num_steps {
                    for c in 0..2 {
                        out_idx.push(row.map_or(filler, |r| {
                            r * out_width + (p * self.horizon + k) * 2 + c
                        }));
                    }
                }
            }
        }
        Ok(padded.gather(out_idx, shape, rec))
    }
}
