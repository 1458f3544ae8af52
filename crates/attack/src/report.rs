use dynamics::ControlLimits;
use serde::{Deserialize, Serialize};

/// Diagnostics of one outer iteration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    /// Per-sample loss before the step.
    pub initial_loss: Vec<f32>,
    /// Per-sample loss of the accepted candidate.
    pub loss: Vec<f32>,
    /// Per-sample largest displacement of the target's past, in metres.
    pub max_displacement: Vec<f32>,
    /// Per-sample curvature step size used for the accepted candidate.
    pub alpha_curvature: Vec<f32>,
    pub attempts: usize,
    /// Samples whose perturbation was reset after running out of attempts.
    pub reset_samples: Vec<usize>,
}

/// Everything reported while attacking one batch. Informational only.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AttackReport {
    pub method: String,
    pub limits: Option<ControlLimits>,
    pub future_included: bool,
    pub iterations: Vec<IterationRecord>,
    /// Per-sample loss of the returned perturbation.
    pub final_loss: Vec<f32>,
    pub final_max_displacement: Vec<f32>,
}

impl AttackReport {
    /// Appends the samples of `other`, attacked as a separate batch,
    /// iteration by iteration.
    pub fn merge(&mut self, other: AttackReport) {
        let offset = self.final_loss.len();
        let mut theirs = other.iterations.into_iter().map(|mut record| {
            for s in &mut record.reset_samples {
                *s += offset;
            }
            record
        });
        if self.iterations.is_empty() {
            self.iterations = theirs.collect();
        } else {
            for (mine, theirs) in self.iterations.iter_mut().zip(&mut theirs) {
                mine.initial_loss.extend(theirs.initial_loss);
                mine.loss.extend(theirs.loss);
                mine.max_displacement.extend(theirs.max_displacement);
                mine.alpha_curvature.extend(theirs.alpha_curvature);
                mine.attempts = mine.attempts.max(theirs.attempts);
                mine.reset_samples.extend(theirs.reset_samples);
            }
        }
        self.final_loss.extend(other.final_loss);
        self.final_max_displacement.extend(other.final_max_displacement);
        if self.method.is_empty() {
            self.method = other.method;
        }
        self.limits = self.limits.or(other.limits);
        self.future_included |= other.future_included;
    }
}
