use thiserror::Error;

#[derive(Debug, Error)]
pub enum DynamicsError {
    #[error("expected shape {expected}, got {got:?}")]
    Shape { expected: &'static str, got: Vec<usize> },
    #[error("time step must be positive and finite, got {0}")]
    InvalidDt(f32),
    #[error("control limit `{name}` must be positive and finite, got {value}")]
    InvalidLimit { name: &'static str, value: f32 },
}
