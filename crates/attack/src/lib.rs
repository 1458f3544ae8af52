//! # Control-action perturbation attacks
//!
//! Searches a small, kinematically plausible change of one target agent's
//! recorded past that pushes a trajectory predictor's forecast in a chosen
//! direction. The target's track is mapped to control actions with
//! [`dynamics::inverse_dynamics`], the controls are perturbed by projected
//! gradient descent through [`dynamics::forward_dynamics`] and the model, and
//! the result is mapped back to positions.
//!
//! [`Perturber`] is the entry point; [`AttackConfig`] holds every option.

#![deny(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_panics_doc,
    clippy::similar_names,
    clippy::many_single_char_names,
    clippy::trivially_copy_pass_by_ref,
    clippy::float_cmp
)]

pub mod barrier;
pub mod batch;
pub mod config;
pub mod driver;
pub mod error;
pub mod helper;
pub mod loss;
pub mod optimizer;
pub mod report;

pub use batch::{AgentBatch, PerturbedBatch};
pub use config::{AttackConfig, BarrierKind, GtData, LossSpec};
pub use driver::Perturber;
pub use error::{AttackError, BatchError, ConfigError};
pub use optimizer::{Objective, Outcome, Probe, ProjectedGradient};
pub use report::{AttackReport, IterationRecord};
