//! # Batch driver
//!
//! [`Perturber::perturb_batch`] runs one attack on one batch:
//!
//! 1.  reorder agents so the target comes first and trim trailing future
//!     steps at which the target is never observed;
//! 2.  derive the target's control actions, over past and future when an
//!     objective or barrier needs the future perturbed;
//! 3.  optimise a perturbation of those controls with [`ProjectedGradient`];
//! 4.  rebuild the perturbed past, pick the future to return and restore the
//!     caller's agent order.
//!
//! Perturbed positions are `observed + forward(control + delta) -
//! forward(control)`, so missing points stay missing and a zero perturbation
//! returns the input unchanged. Only the target's track is differentiable;
//! everyone else is gathered from a constant copy of the input.

use crate::barrier::{Barrier, BarrierInputs};
use crate::batch::{AgentBatch, PerturbedBatch};
use crate::config::{AttackConfig, GtData};
use crate::error::{AttackError, BatchError, ConfigError};
use crate::helper::{check_observability, observed_mask, target_future_len, AgentOrder};
use crate::loss::{LossInputs, Track};
use crate::optimizer::{Objective, Probe, ProjectedGradient};
use crate::report::AttackReport;
use dynamics::{forward_dynamics, inverse_dynamics, ConstraintProvider};
use ml::{Graph, ModelError, PredictionRequest, Predictor, Recorder, SceneContext, Tensor};
use ndarray::{s, Array2, Array3, Array4};
use tracing::info;

/// A configured attack against one model.
pub struct Perturber {
    model: Box<dyn Predictor>,
    constraints: Box<dyn ConstraintProvider>,
    config: AttackConfig,
}

impl Perturber {
    /// # Errors
    /// Returns [`ConfigError`] if `config` does not validate.
    pub fn new(
        model: Box<dyn Predictor>,
        constraints: Box<dyn ConstraintProvider>,
        config: AttackConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { model, constraints, config })
    }

    pub fn config(&self) -> &AttackConfig {
        &self.config
    }

    pub fn method_name(&self) -> String {
        self.config.method_name(self.model.name())
    }

    /// Attacks every sample of `batch` in one optimisation.
    ///
    /// # Errors
    /// Fails on malformed batches, on model contract violations and on the
    /// fatal invariant violations of [`AttackError`].
    pub fn perturb_batch(&self, batch: &AgentBatch) -> Result<PerturbedBatch, AttackError> {
        batch.check()?;
        let order = AgentOrder::from_names(&batch.agent_names)?;
        let past = order.apply(&batch.past);
        let future = order.apply(&batch.future);

        let future_steps = target_future_len(future.view());
        if future_steps == 0 {
            return Err(BatchError::EmptyFuture.into());
        }
        let past_mask = observed_mask(past.view());
        for (s, target) in past_mask.slice(s![.., 0, ..]).outer_iter().enumerate() {
            if !target.iter().any(|&o| o) {
                return Err(BatchError::TargetUnobserved(s).into());
            }
        }
        let ego = match (self.config.ego_objective(), order.ego()) {
            (Some(spec), None) => return Err(BatchError::MissingEgo(spec.to_string()).into()),
            (Some(_), ego) => ego,
            (None, _) => None,
        };

        let limits = self.constraints.absolute_limits(past.view(), self.config.dt)?;
        let future_included = self.config.future_included();
        info!(
            samples = batch.num_samples(),
            agents = batch.num_agents(),
            past_steps = batch.past_steps(),
            future_steps,
            future_included,
            acceleration_limit = limits.acceleration,
            "perturbing batch"
        );

        let trimmed = future.slice(s![.., .., ..future_steps, ..]).to_owned();
        let context = batch.context.select_agents(order.order());
        let mut scene = Scene::build(self, context, &past, &trimmed, ego)?;
        scene.first_prediction = scene.predict(&scene.past, &mut Graph::new())?;

        let optimiser = ProjectedGradient::new(
            &self.config,
            limits,
            &scene.control.data,
            &scene.valid,
            scene.samples,
            scene.past_steps,
        );
        let outcome = optimiser.run(&scene)?;

        let delta = Tensor::from_vec(vec![scene.samples, scene.len, 2], outcome.delta);
        let mut graph = Graph::new();
        let rollout = scene.rollout(&delta, &mut graph)?;
        let final_loss = scene.loss(&rollout, &mut graph)?;
        let probe = scene.probe(&rollout.target);
        info!(losses = ?final_loss.data, max_displacement = ?probe.max_displacement, "final state");

        let (samples, agents, steps) = (scene.samples, scene.agents, scene.past_steps);
        let perturbed_past = Array4::from_shape_fn((samples, agents, steps, 2), |(s, a, t, c)| {
            rollout.past.data[((s * agents + a) * steps + t) * 2 + c]
        });
        let returned_future = match self.config.gt_data {
            GtData::No => batch.future.clone(),
            GtData::One => order.restore(&scene.splice_future(&future, &scene.first_prediction, true)),
            GtData::Full => match &rollout.future {
                Some(f) => order.restore(&scene.splice_future(&future, f, false)),
                None => batch.future.clone(),
            },
        };

        let report = AttackReport {
            method: self.method_name(),
            limits: Some(limits),
            future_included,
            iterations: outcome.history,
            final_loss: final_loss.data,
            final_max_displacement: probe.max_displacement,
        };
        Ok(PerturbedBatch { past: order.restore(&perturbed_past), future: returned_future, report })
    }

    /// Attacks `batch` in chunks of `batch_size` samples.
    ///
    /// # Errors
    /// Stops at the first chunk that fails; see [`Perturber::perturb_batch`].
    pub fn perturb_all(&self, batch: &AgentBatch) -> Result<PerturbedBatch, AttackError> {
        batch.check()?;
        let total = batch.num_samples();
        let mut past = batch.past.clone();
        let mut future = batch.future.clone();
        let mut report = AttackReport::default();
        for start in (0..total).step_by(self.config.batch_size) {
            let end = (start + self.config.batch_size).min(total);
            let part = self.perturb_batch(&batch.slice_samples(start, end))?;
            past.slice_mut(s![start..end, .., .., ..]).assign(&part.past);
            future.slice_mut(s![start..end, .., .., ..]).assign(&part.future);
            report.merge(part.report);
        }
        Ok(PerturbedBatch { past, future, report })
    }
}

fn single(values: &Tensor) -> Track<'_> {
    Track { values, paths: 1 }
}

fn tensor4(a: &Array4<f32>) -> Tensor {
    Tensor::from_vec(a.shape().to_vec(), a.iter().copied().collect())
}

/// Trajectories produced by one perturbation.
struct Rollout {
    /// `[sample, t, 2]` target track over the reparameterised window.
    target: Tensor,
    /// `[sample, agent, t, 2]` model input.
    past: Tensor,
    /// `[sample, 1, t, 2]` perturbed target future, when it is reparameterised.
    future: Option<Tensor>,
    /// `[sample, path, t, 2]` target forecast.
    prediction: Tensor,
}

/// Everything constant during one attack, in working agent order.
struct Scene<'a> {
    model: &'a dyn Predictor,
    config: &'a AttackConfig,
    context: SceneContext,
    request: PredictionRequest,
    samples: usize,
    agents: usize,
    past_steps: usize,
    future_steps: usize,
    /// Length of the reparameterised target window.
    len: usize,
    paths: usize,

    control: Tensor,
    valid: Vec<bool>,
    origin: Tensor,
    heading: Vec<f32>,
    velocity: Vec<f32>,
    nominal: Tensor,
    /// Observed target window with missing points set to zero.
    observed: Tensor,
    missing: Tensor,
    /// Per coordinate of the target window: point observed.
    mask: Vec<bool>,

    past: Tensor,
    past_mask: Array3<bool>,
    target_past_mask: Array2<bool>,
    /// Gathers the model input out of `concat(past, target)`.
    past_index: Vec<usize>,

    ground_truth: Tensor,
    future_mask: Array2<bool>,
    future: Tensor,
    future_agents_mask: Array3<bool>,
    ego: Option<(Tensor, Array2<bool>)>,
    first_prediction: Tensor,

    barrier_past: Option<Barrier>,
    barrier_future: Option<Barrier>,
}

impl<'a> Scene<'a> {
    #[allow(clippy::too_many_lines)]
    fn build(
        perturber: &'a Perturber,
        context: SceneContext,
        past: &Array4<f32>,
        future: &Array4<f32>,
        ego: Option<usize>,
    ) -> Result<Self, AttackError> {
        let config = &perturber.config;
        let (samples, agents, past_steps, _) = past.dim();
        let future_steps = future.shape()[2];
        let len = if config.future_included() { past_steps + future_steps } else { past_steps };
        let paths = config.num_samples_perturb;

        let track = Array3::from_shape_fn((samples, len, 2), |(s, t, c)| {
            if t < past_steps {
                past[[s, 0, t, c]]
            } else {
                future[[s, 0, t - past_steps, c]]
            }
        });
        let seq = inverse_dynamics(track.view(), config.dt)?;
        let control = Tensor::from_vec(vec![samples, len, 2], seq.control.iter().copied().collect());
        let origin = Tensor::zeros(vec![samples, 2]);
        let heading = seq.initial_heading().to_vec();
        let velocity = seq.initial_velocity().to_vec();
        let nominal = forward_dynamics(&control, &origin, &heading, &velocity, config.dt, &mut Graph::new())?;

        let mut mask = Vec::with_capacity(samples * len * 2);
        let mut observed = Vec::with_capacity(samples * len * 2);
        for point in track.rows() {
            let seen = point.iter().all(|v| v.is_finite());
            for &v in point {
                mask.push(seen);
                observed.push(if seen { v } else { 0.0 });
            }
        }

        let past_len = samples * agents * past_steps * 2;
        let mut past_index = Vec::with_capacity(past_len);
        for s in 0..samples {
            for a in 0..agents {
                for t in 0..past_steps {
                    for c in 0..2 {
                        past_index.push(if a == 0 {
                            past_len + (s * len + t) * 2 + c
                        } else {
                            ((s * agents + a) * past_steps + t) * 2 + c
                        });
                    }
                }
            }
        }

        let past_mask = observed_mask(past.view());
        let future_agents_mask = observed_mask(future.view());
        let target_future = future.slice(s![.., 0..1, .., ..]).to_owned();
        let ego = ego.map(|e| {
            let track = future.slice(s![.., e..=e, .., ..]).to_owned();
            (tensor4(&track), future_agents_mask.slice(s![.., e, ..]).to_owned())
        });
        let barrier = |kind, threshold, log_base| Barrier { kind, threshold, log_base };

        Ok(Self {
            model: perturber.model.as_ref(),
            config,
            context,
            request: PredictionRequest {
                pred_agents: Array2::from_shape_fn((samples, agents), |(_, a)| a == 0),
                num_steps: future_steps,
                num_paths: paths,
            },
            samples,
            agents,
            past_steps,
            future_steps,
            len,
            paths,
            control,
            valid: seq.valid.iter().copied().collect(),
            origin,
            heading,
            velocity,
            nominal,
            observed: Tensor::from_vec(vec![samples, len, 2], observed),
            missing: Tensor::full(vec![samples, len, 2], f32::NAN),
            mask,
            past: tensor4(past),
            target_past_mask: past_mask.slice(s![.., 0, ..]).to_owned(),
            past_mask,
            past_index,
            ground_truth: tensor4(&target_future),
            future_mask: future_agents_mask.slice(s![.., 0, ..]).to_owned(),
            future: tensor4(future),
            future_agents_mask,
            ego,
            first_prediction: Tensor::zeros(vec![samples, paths, future_steps, 2]),
            barrier_past: config
                .barrier_function_past
                .map(|kind| barrier(kind, config.distance_threshold_past, config.log_value_past)),
            barrier_future: config
                .barrier_function_future
                .map(|kind| barrier(kind, config.distance_threshold_future, config.log_value_future)),
        })
    }

    /// Flat indices of target window steps `start..start + steps`.
    fn window(&self, start: usize, steps: usize) -> Vec<usize> {
        (0..self.samples)
            .flat_map(|s| (start..start + steps).flat_map(move |t| [0, 1].map(|c| (s * self.len + t) * 2 + c)))
            .collect()
    }

    /// Runs the model on `past` and keeps the target's forecast.
    fn predict(&self, past: &Tensor, rec: &mut dyn Recorder) -> Result<Tensor, AttackError> {
        let out = self.model.predict(past, &self.context, &self.request, rec)?;
        let expected = vec![self.samples, self.agents, self.paths, self.future_steps, 2];
        if out.shape != expected {
            return Err(ModelError::Shape { expected, got: out.shape.clone() }.into());
        }
        let per_agent = self.paths * self.future_steps * 2;
        let index = (0..self.samples)
            .flat_map(|s| {
                let start = s * self.agents * per_agent;
                start..start + per_agent
            })
            .collect();
        Ok(out.gather(index, vec![self.samples, self.paths, self.future_steps, 2], rec))
    }

    fn rollout(&self, delta: &Tensor, rec: &mut dyn Recorder) -> Result<Rollout, AttackError> {
        let control = self.control.add(delta, rec);
        let moved = forward_dynamics(&control, &self.origin, &self.heading, &self.velocity, self.config.dt, rec)?;
        let target = self
            .observed
            .add(&moved.sub(&self.nominal, rec), rec)
            .where_mask(&self.mask, &self.missing, rec);

        let past = Tensor::concat(&[&self.past, &target], rec).gather(self.past_index.clone(), self.past.shape.clone(), rec);
        check_observability(&self.past.data, &past.data, self.agents, self.past_steps)?;

        let future = if self.len > self.past_steps {
            let shape = vec![self.samples, 1, self.future_steps, 2];
            let future = target.gather(self.window(self.past_steps, self.future_steps), shape, rec);
            check_observability(&self.ground_truth.data, &future.data, 1, self.future_steps)?;
            Some(future)
        } else {
            None
        };
        let prediction = self.predict(&past, rec)?;
        Ok(Rollout { target, past, future, prediction })
    }

    fn loss(&self, rollout: &Rollout, rec: &mut dyn Recorder) -> Result<Tensor, AttackError> {
        let inputs = LossInputs {
            samples: self.samples,
            steps: self.future_steps,
            paths: self.paths,
            ground_truth: single(&self.ground_truth),
            perturbed: single(rollout.future.as_ref().unwrap_or(&self.ground_truth)),
            prediction: Track { values: &rollout.prediction, paths: self.paths },
            first_prediction: Track { values: &self.first_prediction, paths: self.paths },
            ego: self.ego.as_ref().map(|(track, _)| single(track)),
            future_mask: &self.future_mask,
            ego_mask: self.ego.as_ref().map(|(_, mask)| mask),
        };
        let mut loss = inputs.objective(&self.config.loss_function_1, rec)?;
        if let Some(spec) = &self.config.loss_function_2 {
            let extra = inputs.objective(spec, rec)?;
            loss = loss.add(&extra, rec);
        }

        if let Some(barrier) = &self.barrier_past {
            let shape = vec![self.samples, 1, self.past_steps, 2];
            let target = rollout.target.gather(self.window(0, self.past_steps), shape, rec);
            let penalty = barrier.evaluate(
                &BarrierInputs {
                    samples: self.samples,
                    steps: self.past_steps,
                    target: &target,
                    target_mask: &self.target_past_mask,
                    agents: &self.past,
                    agents_mask: &self.past_mask,
                },
                rec,
            );
            loss = loss.add(&penalty, rec);
        }
        if let (Some(barrier), Some(future)) = (&self.barrier_future, &rollout.future) {
            let penalty = barrier.evaluate(
                &BarrierInputs {
                    samples: self.samples,
                    steps: self.future_steps,
                    target: future,
                    target_mask: &self.future_mask,
                    agents: &self.future,
                    agents_mask: &self.future_agents_mask,
                },
                rec,
            );
            loss = loss.add(&penalty, rec);
        }
        Ok(loss)
    }

    /// Largest displacement of each sample's observed target past.
    fn probe(&self, target: &Tensor) -> Probe {
        let max_displacement = (0..self.samples)
            .map(|s| {
                (0..self.past_steps)
                    .map(|t| (s * self.len + t) * 2)
                    .filter(|&i| self.mask[i])
                    .map(|i| {
                        let dx = target.data[i] - self.observed.data[i];
                        let dy = target.data[i + 1] - self.observed.data[i + 1];
                        dx.hypot(dy)
                    })
                    .fold(0.0f32, f32::max)
            })
            .collect();
        Probe { max_displacement }
    }

    /// Working-order `future` with the target's first `future_steps` replaced
    /// by `track`, `[sample, paths, t, 2]` of which path 0 is used.
    ///
    /// With `observed_only` the target's missing steps stay missing.
    fn splice_future(&self, future: &Array4<f32>, track: &Tensor, observed_only: bool) -> Array4<f32> {
        let paths = track.shape[1];
        let mut out = future.clone();
        for s in 0..self.samples {
            for t in 0..self.future_steps {
                if observed_only && !self.future_mask[[s, t]] {
                    continue;
                }
                for c in 0..2 {
                    out[[s, 0, t, c]] = track.data[(s * paths * self.future_steps + t) * 2 + c];
                }
            }
        }
        out
    }
}

impl Objective for Scene<'_> {
    fn evaluate(&self, delta: &Tensor, rec: &mut dyn Recorder) -> Result<(Tensor, Probe), AttackError> {
        let rollout = self.rollout(delta, rec)?;
        let loss = self.loss(&rollout, rec)?;
        Ok((loss, self.probe(&rollout.target)))
    }
}
