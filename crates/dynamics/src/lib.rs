#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::must_use_candidate, clippy::missing_panics_doc)]
//! # Control-action dynamics
//!
//! A planar bicycle-style model that maps observed agent tracks to control
//! actions (longitudinal acceleration and curvature) and back.
//!
//! -   [`inverse_dynamics`] derives controls, headings and speeds from
//!     positions, tolerating missing observations.
//! -   [`forward_dynamics`] integrates controls on [`ml::Tensor`]s so that a
//!     loss on positions can be differentiated with respect to the controls.
//!     [`integrate`] is the same update on plain floats.
//! -   [`ConstraintProvider`] supplies the absolute control bounds an
//!     optimiser must respect.

pub mod error;
pub mod integrator;
pub mod inverse;
pub mod limits;
pub mod types;

pub use error::DynamicsError;
pub use integrator::{forward_dynamics, integrate};
pub use inverse::inverse_dynamics;
pub use limits::{ConstraintProvider, ControlLimits, FixedLimits, ObservedLimits};
pub use types::{wrap_angle, ControlSequence, ACC, CURV};
