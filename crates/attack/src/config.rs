//! Attack configuration.
//!
//! Field names follow the option names used in experiment files, so a JSON
//! object such as `{"dt": 0.1, "loss_function_1": "ADE_Y_GT_Y_Pred_Max"}`
//! deserialises directly. Every option except `dt` has a default.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Backoff attempts per outer iteration before a sample is reset to zero.
pub const MAX_BACKOFF_ATTEMPTS: usize = 20;
/// Raw gradients are clamped to this multiple of the relative bound.
pub const GRADIENT_CLAMP_FACTOR: f32 = 20.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Metric {
    Ade,
    Fde,
}

/// Which two trajectories a displacement objective compares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pairing {
    GtPred,
    PerturbPred,
    PerturbGt,
    FirstPredPerturb,
    PredFirstPred,
}

impl Pairing {
    const ALL: [(Pairing, &'static str); 5] = [
        (Pairing::GtPred, "Y_GT_Y_Pred"),
        (Pairing::PerturbPred, "Y_Perturb_Y_Pred"),
        (Pairing::PerturbGt, "Y_Perturb_Y_GT"),
        (Pairing::FirstPredPerturb, "Y_pred_iteration_1_and_Y_Perturb"),
        (Pairing::PredFirstPred, "Y_pred_and_Y_pred_iteration_1"),
    ];

    fn label(self) -> &'static str {
        Self::ALL.iter().find(|(p, _)| *p == self).map_or("", |(_, l)| l)
    }

    fn touches_perturbed_future(self) -> bool {
        matches!(self, Pairing::PerturbPred | Pairing::PerturbGt | Pairing::FirstPredPerturb)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Polarity {
    /// Push the two trajectories apart.
    Max,
    /// Pull them together.
    Min,
}

/// Which target trajectory a collision objective drives towards the ego agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollisionSource {
    Prediction,
    PerturbedFuture,
}

/// One objective term.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LossSpec {
    Displacement { metric: Metric, pairing: Pairing, polarity: Polarity },
    Collision(CollisionSource),
    /// Contributes nothing; only asks for the future to be perturbed too.
    PerturbFuture,
}

impl LossSpec {
    /// Whether the target's future has to be reparameterised along with its past.
    pub fn needs_future(&self) -> bool {
        match self {
            LossSpec::Displacement { pairing, .. } => pairing.touches_perturbed_future(),
            LossSpec::Collision(source) => *source == CollisionSource::PerturbedFuture,
            LossSpec::PerturbFuture => true,
        }
    }

    pub fn needs_ego(&self) -> bool {
        matches!(self, LossSpec::Collision(_))
    }
}

impl FromStr for LossSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Y_perturb" => return Ok(LossSpec::PerturbFuture),
            "Collision_Y_pred_tar_Y_GT_ego" => return Ok(LossSpec::Collision(CollisionSource::Prediction)),
            "Collision_Y_Perturb_tar_Y_GT_ego" => {
                return Ok(LossSpec::Collision(CollisionSource::PerturbedFuture))
            }
            _ => {}
        }
        let unknown = || ConfigError::UnknownObjective(s.to_owned());
        let (metric, rest) = if let Some(rest) = s.strip_prefix("ADE_") {
            (Metric::Ade, rest)
        } else if let Some(rest) = s.strip_prefix("FDE_") {
            (Metric::Fde, rest)
        } else {
            return Err(unknown());
        };
        let (polarity, label) = if let Some(label) = rest.strip_suffix("_Max") {
            (Polarity::Max, label)
        } else if let Some(label) = rest.strip_suffix("_Min") {
            (Polarity::Min, label)
        } else {
            return Err(unknown());
        };
        let pairing = Pairing::ALL
            .iter()
            .find(|(_, l)| *l == label)
            .map(|(p, _)| *p)
            .ok_or_else(unknown)?;
        Ok(LossSpec::Displacement { metric, pairing, polarity })
    }
}

impl fmt::Display for LossSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LossSpec::Displacement { metric, pairing, polarity } => {
                let metric = match metric {
                    Metric::Ade => "ADE",
                    Metric::Fde => "FDE",
                };
                let polarity = match polarity {
                    Polarity::Max => "Max",
                    Polarity::Min => "Min",
                };
                write!(f, "{metric}_{}_{polarity}", pairing.label())
            }
            LossSpec::Collision(CollisionSource::Prediction) => f.write_str("Collision_Y_pred_tar_Y_GT_ego"),
            LossSpec::Collision(CollisionSource::PerturbedFuture) => {
                f.write_str("Collision_Y_Perturb_tar_Y_GT_ego")
            }
            LossSpec::PerturbFuture => f.write_str("Y_perturb"),
        }
    }
}

impl TryFrom<String> for LossSpec {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<LossSpec> for String {
    fn from(spec: LossSpec) -> Self {
        spec.to_string()
    }
}

/// Shape of a distance barrier. See [`crate::barrier`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BarrierKind {
    TimeSpecific,
    TrajectorySpecific,
    TimeTrajectorySpecific,
}

impl FromStr for BarrierKind {
    type Err = ConfigError;

    /// Accepts a `_V<variant>` suffix, which only labels experiments.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let base = s.split("_V").next().unwrap_or(s);
        match base {
            "Time_specific" => Ok(BarrierKind::TimeSpecific),
            "Trajectory_specific" => Ok(BarrierKind::TrajectorySpecific),
            "Time_Trajectory_specific" => Ok(BarrierKind::TimeTrajectorySpecific),
            _ => Err(ConfigError::UnknownBarrier(s.to_owned())),
        }
    }
}

impl fmt::Display for BarrierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BarrierKind::TimeSpecific => "Time_specific",
            BarrierKind::TrajectorySpecific => "Trajectory_specific",
            BarrierKind::TimeTrajectorySpecific => "Time_Trajectory_specific",
        })
    }
}

impl TryFrom<String> for BarrierKind {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BarrierKind> for String {
    fn from(kind: BarrierKind) -> Self {
        kind.to_string()
    }
}

/// Which future the driver hands back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GtData {
    /// The caller's future, untouched.
    #[default]
    No,
    /// The future predicted on the unperturbed input.
    One,
    /// The target's future after the last iteration.
    Full,
}

impl fmt::Display for GtData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GtData::No => "no",
            GtData::One => "one",
            GtData::Full => "full",
        })
    }
}

fn default_num_samples() -> usize {
    20
}
fn default_iterations() -> usize {
    50
}
fn default_gamma() -> f32 {
    1.0
}
fn default_alpha() -> f32 {
    0.01
}
fn default_loss() -> LossSpec {
    LossSpec::Displacement { metric: Metric::Ade, pairing: Pairing::GtPred, polarity: Polarity::Max }
}
fn default_threshold() -> f32 {
    1.0
}
fn default_log_value() -> f32 {
    1.5
}
fn default_acc_relative() -> f32 {
    2.0
}
fn default_curv_relative() -> f32 {
    0.05
}
fn default_curv_absolute() -> f32 {
    0.2
}
fn default_batch_size() -> usize {
    5
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttackConfig {
    /// Predicted paths per sample.
    #[serde(default = "default_num_samples")]
    pub num_samples_perturb: usize,
    #[serde(default = "default_iterations")]
    pub max_number_iterations: usize,
    /// Step-size decay per outer iteration.
    #[serde(default = "default_gamma")]
    pub gamma: f32,
    /// Base step size of the curvature channel.
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    #[serde(default = "default_loss")]
    pub loss_function_1: LossSpec,
    #[serde(default)]
    pub loss_function_2: Option<LossSpec>,
    #[serde(default)]
    pub barrier_function_past: Option<BarrierKind>,
    #[serde(default)]
    pub barrier_function_future: Option<BarrierKind>,
    #[serde(default = "default_threshold")]
    pub distance_threshold_past: f32,
    #[serde(default = "default_threshold")]
    pub distance_threshold_future: f32,
    #[serde(default = "default_log_value")]
    pub log_value_past: f32,
    #[serde(default = "default_log_value")]
    pub log_value_future: f32,
    #[serde(rename = "GT_data", default)]
    pub gt_data: GtData,
    /// Seconds between samples.
    pub dt: f32,
    #[serde(default = "default_acc_relative")]
    pub epsilon_acc_relative: f32,
    #[serde(default = "default_curv_relative")]
    pub epsilon_curv_relative: f32,
    #[serde(default = "default_curv_absolute")]
    pub epsilon_curv_absolute: f32,
    /// Samples per `perturb_batch` call when a larger set is split up.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl AttackConfig {
    /// Defaults for everything but the time step.
    #[must_use]
    pub fn new(dt: f32) -> Self {
        Self {
            num_samples_perturb: default_num_samples(),
            max_number_iterations: default_iterations(),
            gamma: default_gamma(),
            alpha: default_alpha(),
            loss_function_1: default_loss(),
            loss_function_2: None,
            barrier_function_past: None,
            barrier_function_future: None,
            distance_threshold_past: default_threshold(),
            distance_threshold_future: default_threshold(),
            log_value_past: default_log_value(),
            log_value_future: default_log_value(),
            gt_data: GtData::No,
            dt,
            epsilon_acc_relative: default_acc_relative(),
            epsilon_curv_relative: default_curv_relative(),
            epsilon_curv_absolute: default_curv_absolute(),
            batch_size: default_batch_size(),
        }
    }

    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    /// Returns [`ConfigError`] for malformed JSON, unknown names or invalid values.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    #[allow(clippy::cast_precision_loss)]
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |field: &'static str, value: f32| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid { field, value, reason: "must be positive and finite" })
            }
        };
        positive("dt", self.dt)?;
        positive("gamma", self.gamma)?;
        positive("epsilon_acc_relative", self.epsilon_acc_relative)?;
        positive("epsilon_curv_relative", self.epsilon_curv_relative)?;
        positive("epsilon_curv_absolute", self.epsilon_curv_absolute)?;
        positive("distance_threshold_past", self.distance_threshold_past)?;
        positive("distance_threshold_future", self.distance_threshold_future)?;
        positive("log_value_past", self.log_value_past)?;
        positive("log_value_future", self.log_value_future)?;
        if !(self.alpha.is_finite() && self.alpha >= 0.0) {
            return Err(ConfigError::Invalid { field: "alpha", value: self.alpha, reason: "must be non-negative and finite" });
        }
        for (field, value) in [("log_value_past", self.log_value_past), ("log_value_future", self.log_value_future)] {
            if value == 1.0 {
                return Err(ConfigError::Invalid { field, value, reason: "a logarithm base cannot be 1" });
            }
        }
        if self.num_samples_perturb == 0 {
            return Err(ConfigError::Invalid { field: "num_samples_perturb", value: 0.0, reason: "must be at least 1" });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid { field: "batch_size", value: 0.0, reason: "must be at least 1" });
        }
        Ok(())
    }

    /// Step size of the acceleration channel, scaled so both channels move
    /// the same fraction of their relative bound.
    pub fn alpha_acc(&self) -> f32 {
        self.epsilon_acc_relative / self.epsilon_curv_relative * self.alpha
    }

    pub fn alpha_curv(&self) -> f32 {
        self.alpha
    }

    fn objectives(&self) -> impl Iterator<Item = &LossSpec> {
        std::iter::once(&self.loss_function_1).chain(self.loss_function_2.as_ref())
    }

    /// Whether controls are derived over past and future together.
    pub fn future_included(&self) -> bool {
        self.barrier_function_future.is_some() || self.objectives().any(LossSpec::needs_future)
    }

    /// The first objective that needs an ego agent, if any.
    pub fn ego_objective(&self) -> Option<&LossSpec> {
        self.objectives().find(|o| o.needs_ego())
    }

    /// `---`-joined identifier of this attack against `model`, used to name
    /// result files.
    pub fn method_name(&self, model: &str) -> String {
        let mut parts = vec![
            model.to_owned(),
            "control_action".to_owned(),
            format!("{:?}", self.gamma),
            format!("{:?}", self.alpha),
            self.num_samples_perturb.to_string(),
            self.max_number_iterations.to_string(),
            self.loss_function_1.to_string(),
            self.gt_data.to_string(),
        ];
        if let Some(loss) = &self.loss_function_2 {
            parts.push(loss.to_string());
        }
        if let Some(kind) = &self.barrier_function_past {
            parts.push(kind.to_string());
            parts.push(format!("{:?}", self.distance_threshold_past));
            parts.push(format!("{:?}", self.log_value_past));
        }
        if let Some(kind) = &self.barrier_function_future {
            parts.push(kind.to_string());
            parts.push(format!("{:?}", self.distance_threshold_future));
            parts.push(format!("{:?}", self.log_value_future));
        }
        parts.join("---")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_objective_name_round_trips() {
        let mut names = vec![
            "Y_perturb".to_owned(),
            "Collision_Y_pred_tar_Y_GT_ego".to_owned(),
            "Collision_Y_Perturb_tar_Y_GT_ego".to_owned(),
        ];
        for metric in ["ADE", "FDE"] {
            for (_, pairing) in Pairing::ALL {
                for polarity in ["Max", "Min"] {
                    names.push(format!("{metric}_{pairing}_{polarity}"));
                }
            }
        }
        for name in names {
            let spec: LossSpec = name.parse().unwrap();
            assert_eq!(spec.to_string(), name);
        }
    }

    #[test]
    fn future_inclusion() {
        let mut config = AttackConfig::new(0.1);
        assert!(!config.future_included());
        config.loss_function_2 = Some("ADE_Y_Perturb_Y_GT_Min".parse().unwrap());
        assert!(config.future_included());
        config.loss_function_2 = None;
        config.barrier_function_future = Some(BarrierKind::TimeSpecific);
        assert!(config.future_included());
    }

    #[test]
    fn barrier_variant_suffix() {
        assert_eq!("Time_specific_V2".parse::<BarrierKind>().unwrap(), BarrierKind::TimeSpecific);
        assert!("Space_specific".parse::<BarrierKind>().is_err());
    }

    #[test]
    fn scaled_acceleration_step() {
        let config = AttackConfig::new(0.1);
        assert!((config.alpha_acc() - 0.4).abs() < 1e-6);
        assert_eq!(config.alpha_curv(), 0.01);
    }
}
