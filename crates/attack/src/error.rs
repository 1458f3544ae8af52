use dynamics::DynamicsError;
use ml::{ModelError, TapeError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown objective `{0}`")]
    UnknownObjective(String),
    #[error("unknown barrier function `{0}`")]
    UnknownBarrier(String),
    #[error("`{field}` = {value} is invalid: {reason}")]
    Invalid { field: &'static str, value: f32, reason: &'static str },
}

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("{what} has shape {got:?}, expected {expected:?}")]
    Shape { what: &'static str, expected: Vec<usize>, got: Vec<usize> },
    #[error("{got} agent names for {expected} agents")]
    AgentNames { expected: usize, got: usize },
    #[error("no agent is named `tar`")]
    MissingTarget,
    #[error("objective `{0}` needs an agent named `ego`")]
    MissingEgo(String),
    #[error("target agent has no observed past in sample {0}")]
    TargetUnobserved(usize),
    #[error("target agent has no observed future in any sample")]
    EmptyFuture,
}

#[derive(Error, Debug)]
pub enum AttackError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error(transparent)]
    Dynamics(#[from] DynamicsError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Tape(#[from] TapeError),
    #[error("observability changed at sample {sample}, agent {agent}, step {step}")]
    ObservabilityChanged { sample: usize, agent: usize, step: usize },
    #[error("non-finite gradient in iteration {0}")]
    NonFiniteGradient(usize),
}
