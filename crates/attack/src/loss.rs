//! Objective terms, one value per sample.
//!
//! Trajectories are flat tensors laid out `[sample, path, t, 2]`; single
//! trajectories use one path and are broadcast against multi-path
//! predictions. Only observed points are ever gathered, so NaN padding in
//! the inputs never reaches a loss value or its gradient.

use crate::config::{CollisionSource, LossSpec, Metric, Pairing, Polarity};
use crate::error::{AttackError, BatchError};
use ml::{Recorder, Tensor};
use ndarray::Array2;

/// A `[sample, paths, t, 2]` trajectory tensor.
#[derive(Clone, Copy)]
pub struct Track<'a> {
    pub values: &'a Tensor,
    pub paths: usize,
}

impl Track<'_> {
    fn point(&self, steps: usize, s: usize, p: usize, t: usize) -> usize {
        ((s * self.paths + p.min(self.paths - 1)) * steps + t) * 2
    }
}

/// Everything an objective may compare, all over the trimmed future horizon.
pub struct LossInputs<'a> {
    pub samples: usize,
    pub steps: usize,
    pub paths: usize,
    /// Target ground truth.
    pub ground_truth: Track<'a>,
    /// Target future after perturbation; the ground truth when the future is
    /// not reparameterised.
    pub perturbed: Track<'a>,
    pub prediction: Track<'a>,
    /// Prediction on the unperturbed input.
    pub first_prediction: Track<'a>,
    pub ego: Option<Track<'a>>,
    /// `[sample, t]` target future observed.
    pub future_mask: &'a Array2<bool>,
    pub ego_mask: Option<&'a Array2<bool>>,
}

/// Euclidean distances between `a` and `b` at each `(s, p, t)` entry.
pub(crate) fn distances(
    a: Track<'_>,
    b: Track<'_>,
    steps: usize,
    entries: &[(usize, usize, usize)],
    rec: &mut dyn Recorder,
) -> Tensor {
    let pick = |track: Track<'_>| {
        entries
            .iter()
            .flat_map(|&(s, p, t)| {
                let i = track.point(steps, s, p, t);
                [i, i + 1]
            })
            .collect::<Vec<_>>()
    };
    let n = entries.len();
    let ga = a.values.gather(pick(a), vec![n * 2], rec);
    let gb = b.values.gather(pick(b), vec![n * 2], rec);
    let diff = ga.sub(&gb, rec);
    let pairs: Vec<usize> = (0..n * 2).map(|i| i / 2).collect();
    diff.mul(&diff, rec).segment_sum(&pairs, n, rec).sqrt(rec)
}

/// `sum_i values[i] * weights[i]` per segment.
pub(crate) fn weighted_sum(
    values: &Tensor,
    weights: Vec<f32>,
    segments: &[usize],
    num_segments: usize,
    rec: &mut dyn Recorder,
) -> Tensor {
    let w = Tensor::from_vec(vec![weights.len()], weights);
    values.mul(&w, rec).segment_sum(segments, num_segments, rec)
}

/// Smallest entry per segment.
pub(crate) fn segment_min(values: &Tensor, segments: &[usize], num_segments: usize, rec: &mut dyn Recorder) -> Tensor {
    values.neg(rec).segment_max(segments, num_segments, rec).neg(rec)
}

impl LossInputs<'_> {
    fn observed_steps(&self, s: usize) -> Vec<usize> {
        (0..self.steps).filter(|&t| self.future_mask[[s, t]]).collect()
    }

    /// One value per sample for `spec`.
    ///
    /// # Errors
    /// Returns [`BatchError::MissingEgo`] for a collision objective without an
    /// ego agent.
    pub fn objective(&self, spec: &LossSpec, rec: &mut dyn Recorder) -> Result<Tensor, AttackError> {
        match *spec {
            LossSpec::Displacement { metric, pairing, polarity } => {
                let d = self.displacement(metric, pairing, rec);
                Ok(match polarity {
                    Polarity::Max => d.neg(rec),
                    Polarity::Min => d,
                })
            }
            LossSpec::Collision(source) => self.collision(spec, source, rec),
            LossSpec::PerturbFuture => Ok(Tensor::zeros(vec![self.samples])),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn displacement(&self, metric: Metric, pairing: Pairing, rec: &mut dyn Recorder) -> Tensor {
        let (a, b) = match pairing {
            Pairing::GtPred => (self.ground_truth, self.prediction),
            Pairing::PerturbPred => (self.perturbed, self.prediction),
            Pairing::PerturbGt => (self.perturbed, self.ground_truth),
            Pairing::FirstPredPerturb => (self.first_prediction, self.perturbed),
            Pairing::PredFirstPred => (self.prediction, self.first_prediction),
        };
        let paths = a.paths.max(b.paths);
        // Comparing two predictions is defined on the whole horizon.
        let whole_horizon = pairing == Pairing::PredFirstPred;

        let mut entries = Vec::new();
        let mut weights = Vec::new();
        let mut segments = Vec::new();
        for s in 0..self.samples {
            let steps = if whole_horizon { (0..self.steps).collect() } else { self.observed_steps(s) };
            let picked: Vec<usize> = match metric {
                Metric::Ade => steps,
                Metric::Fde => steps.last().copied().into_iter().collect(),
            };
            if picked.is_empty() {
                continue;
            }
            let w = 1.0 / (paths * picked.len()) as f32;
            for p in 0..paths {
                for &t in &picked {
                    entries.push((s, p, t));
                    weights.push(w);
                    segments.push(s);
                }
            }
        }
        if entries.is_empty() {
            return Tensor::zeros(vec![self.samples]);
        }
        let d = distances(a, b, self.steps, &entries, rec);
        weighted_sum(&d, weights, &segments, self.samples, rec)
    }

    #[allow(clippy::cast_precision_loss)]
    fn collision(&self, spec: &LossSpec, source: CollisionSource, rec: &mut dyn Recorder) -> Result<Tensor, AttackError> {
        let (Some(ego), Some(ego_mask)) = (self.ego, self.ego_mask) else {
            return Err(BatchError::MissingEgo(spec.to_string()).into());
        };
        let (target, paths, needs_target_mask) = match source {
            CollisionSource::Prediction => (self.prediction, self.paths, false),
            CollisionSource::PerturbedFuture => (self.perturbed, 1, true),
        };

        let mut entries = Vec::new();
        let mut pair_of = Vec::new();
        let mut pair_sample = Vec::new();
        for s in 0..self.samples {
            let steps: Vec<usize> = (0..self.steps)
                .filter(|&t| ego_mask[[s, t]] && (!needs_target_mask || self.future_mask[[s, t]]))
                .collect();
            if steps.is_empty() {
                continue;
            }
            for p in 0..paths {
                for &t in &steps {
                    entries.push((s, p, t));
                    pair_of.push(pair_sample.len());
                }
                pair_sample.push(s);
            }
        }
        if entries.is_empty() {
            return Ok(Tensor::zeros(vec![self.samples]));
        }
        let d = distances(target, ego, self.steps, &entries, rec);
        let closest = segment_min(&d, &pair_of, pair_sample.len(), rec);
        let w = vec![1.0 / paths as f32; pair_sample.len()];
        Ok(weighted_sum(&closest, w, &pair_sample, self.samples, rec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ml::Graph;
    use ndarray::array;

    fn track(data: Vec<f32>, samples: usize, paths: usize, steps: usize) -> Tensor {
        Tensor::from_vec(vec![samples, paths, steps, 2], data)
    }

    #[test]
    fn ade_and_fde_against_two_paths() {
        let nan = f32::NAN;
        let gt = track(vec![0.0, 0.0, 1.0, 0.0, nan, nan], 1, 1, 3);
        let pred = track(vec![0.0, 1.0, 1.0, 1.0, 9.0, 9.0, 0.0, 3.0, 1.0, 3.0, 9.0, 9.0], 1, 2, 3);
        let mask = array![[true, true, false]];
        let inputs = LossInputs {
            samples: 1,
            steps: 3,
            paths: 2,
            ground_truth: Track { values: &gt, paths: 1 },
            perturbed: Track { values: &gt, paths: 1 },
            prediction: Track { values: &pred, paths: 2 },
            first_prediction: Track { values: &pred, paths: 2 },
            ego: None,
            future_mask: &mask,
            ego_mask: None,
        };
        let mut g = Graph::new();
        let ade: LossSpec = "ADE_Y_GT_Y_Pred_Min".parse().unwrap();
        assert_eq!(inputs.objective(&ade, &mut g).unwrap().data, vec![2.0]);
        let fde: LossSpec = "FDE_Y_GT_Y_Pred_Max".parse().unwrap();
        assert_eq!(inputs.objective(&fde, &mut g).unwrap().data, vec![-2.0]);
        let same: LossSpec = "ADE_Y_pred_and_Y_pred_iteration_1_Max".parse().unwrap();
        assert_eq!(inputs.objective(&same, &mut g).unwrap().data, vec![0.0]);
        let collision: LossSpec = "Collision_Y_pred_tar_Y_GT_ego".parse().unwrap();
        assert!(matches!(
            inputs.objective(&collision, &mut g),
            Err(AttackError::Batch(BatchError::MissingEgo(_)))
        ));
    }

    #[test]
    fn collision_takes_closest_approach() {
        let target = track(vec![0.0, 0.0, 1.0, 0.0, 2.0, 0.0], 1, 1, 3);
        let ego = track(vec![0.0, 5.0, 1.0, 1.0, 2.0, 4.0], 1, 1, 3);
        let mask = array![[true, true, true]];
        let inputs = LossInputs {
            samples: 1,
            steps: 3,
            paths: 1,
            ground_truth: Track { values: &target, paths: 1 },
            perturbed: Track { values: &target, paths: 1 },
            prediction: Track { values: &target, paths: 1 },
            first_prediction: Track { values: &target, paths: 1 },
            ego: Some(Track { values: &ego, paths: 1 }),
            future_mask: &mask,
            ego_mask: Some(&mask),
        };
        let spec: LossSpec = "Collision_Y_Perturb_tar_Y_GT_ego".parse().unwrap();
        assert_eq!(inputs.objective(&spec, &mut Graph::new()).unwrap().data, vec![1.0]);
    }
}
