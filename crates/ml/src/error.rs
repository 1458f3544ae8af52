use thiserror::Error;

#[derive(Debug, Error)]
pub enum TapeError {
    #[error("tensor {id} does not require a gradient")]
    NotTracked { id: usize },
    #[error("{op} node is missing saved value {slot}")]
    MissingSaved { op: String, slot: usize },
    #[error("{op} node needs at least {expected} inputs")]
    Arity { op: String, expected: usize },
}

/// Failures raised by a trajectory prediction model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("input shape mismatch: expected {expected:?}, got {got:?}")]
    Shape { expected: Vec<usize>, got: Vec<usize> },
    #[error("model `{model}` needs at least {needed} past steps, got {got}")]
    InsufficientHistory { model: String, needed: usize, got: usize },
    #[error("model `{model}` failed: {reason}")]
    Failed { model: String, reason: String },
    #[error(transparent)]
    Tape(#[from] TapeError),
}
