//! Distance barriers keeping the target away from other agents.
//!
//! A distance `d` below the threshold `r` costs `-log_b(clamp(d / r, 1e-6, 1))`
//! and nothing at or beyond `r`.

use crate::config::BarrierKind;
use crate::loss::{distances, segment_min, weighted_sum, Track};
use ml::{Recorder, Tensor};
use ndarray::{Array2, Array3};

const MIN_RATIO: f32 = 1e-6;

pub struct Barrier {
    pub kind: BarrierKind,
    pub threshold: f32,
    pub log_base: f32,
}

/// The target's trajectory and everyone else's over the same time window.
pub struct BarrierInputs<'a> {
    pub samples: usize,
    pub steps: usize,
    /// `[sample, 1, t, 2]`
    pub target: &'a Tensor,
    /// `[sample, t]`
    pub target_mask: &'a Array2<bool>,
    /// `[sample, agent, t, 2]`, agent 0 is ignored.
    pub agents: &'a Tensor,
    /// `[sample, agent, t]`
    pub agents_mask: &'a Array3<bool>,
}

impl Barrier {
    fn penalty(&self, d: &Tensor, rec: &mut dyn Recorder) -> Tensor {
        d.mul_scalar(1.0 / self.threshold, rec)
            .clamp(MIN_RATIO, 1.0, rec)
            .log(rec)
            .mul_scalar(-1.0 / self.log_base.ln(), rec)
    }

    /// Summed penalty over other agents, one value per sample.
    #[allow(clippy::cast_precision_loss)]
    pub fn evaluate(&self, inputs: &BarrierInputs<'_>, rec: &mut dyn Recorder) -> Tensor {
        let agents = inputs.agents_mask.shape()[1];
        // (sample, agent) pairs that share at least one observed step
        let mut entries = Vec::new();
        let mut pair_of = Vec::new();
        let mut pair_sample = Vec::new();
        let mut pair_len = Vec::new();
        for s in 0..inputs.samples {
            for a in 1..agents {
                let before = entries.len();
                for t in 0..inputs.steps {
                    if inputs.target_mask[[s, t]] && inputs.agents_mask[[s, a, t]] {
                        // agent index doubles as the path index of the other track
                        entries.push((s, a, t));
                        pair_of.push(pair_sample.len());
                    }
                }
                if entries.len() > before {
                    pair_sample.push(s);
                    pair_len.push(entries.len() - before);
                }
            }
        }
        if entries.is_empty() {
            return Tensor::zeros(vec![inputs.samples]);
        }

        let target = Track { values: inputs.target, paths: 1 };
        let others = Track { values: inputs.agents, paths: agents };
        let d = distances(target, others, inputs.steps, &entries, rec);

        let time = || {
            pair_of.iter().map(|&k| 1.0 / pair_len[k] as f32).collect::<Vec<_>>()
        };
        let sample_of_entry: Vec<usize> = entries.iter().map(|&(s, _, _)| s).collect();
        match self.kind {
            BarrierKind::TimeSpecific => {
                let p = self.penalty(&d, rec);
                weighted_sum(&p, time(), &sample_of_entry, inputs.samples, rec)
            }
            BarrierKind::TrajectorySpecific => {
                let closest = segment_min(&d, &pair_of, pair_sample.len(), rec);
                let p = self.penalty(&closest, rec);
                p.segment_sum(&pair_sample, inputs.samples, rec)
            }
            BarrierKind::TimeTrajectorySpecific => {
                let p = self.penalty(&d, rec);
                let per_time = weighted_sum(&p, time(), &sample_of_entry, inputs.samples, rec);
                let closest = segment_min(&d, &pair_of, pair_sample.len(), rec);
                let per_traj = self.penalty(&closest, rec).segment_sum(&pair_sample, inputs.samples, rec);
                per_time.add(&per_traj, rec)
            }
        }
    }
}
