//! Tape-based reverse-mode differentiation and the prediction-model contract.
//!
//! Operations on [`Tensor`] take a [`Recorder`]. A [`Tape`] keeps what is
//! needed for [`Tape::backward`]; a [`Graph`] evaluates forward only.

#![deny(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_panics_doc,
    clippy::many_single_char_names,
    clippy::similar_names,
    clippy::float_cmp
)]

pub mod context;
pub mod error;
pub mod gradient;
pub mod graph;
pub mod nn;
pub mod predictor;
pub mod recorder;
pub mod tape;
pub mod tensor;

pub use context::{AgentType, LaneGraph, SceneContext};
pub use error::{ModelError, TapeError};
pub use gradient::{compute_gradient, Evaluation};
pub use graph::{EOp, Graph, Node};
pub use nn::Dense;
pub use predictor::{ConstantVelocity, MlpPredictor, PredictionRequest, Predictor};
pub use recorder::Recorder;
pub use tape::{Gradients, Tape};
pub use tensor::Tensor;
