//! The single differentiation entry point used by optimisers.

use crate::error::TapeError;
use crate::recorder::Recorder;
use crate::tape::Tape;
use crate::Tensor;

/// Result of one differentiated evaluation.
#[derive(Debug)]
pub struct Evaluation<A> {
    /// Per-element values of the loss tensor.
    pub loss: Vec<f32>,
    /// Whatever else the closure wanted to hand back.
    pub aux: A,
    /// Gradient of `sum(loss)` with respect to the input, same layout.
    pub grad: Vec<f32>,
}

/// Evaluates `f` at `input` on a fresh tape and differentiates the sum of the
/// returned loss tensor with respect to `input`.
///
/// `f` receives a tracked copy of `input`. If the loss does not depend on it
/// the gradient is all zeros.
///
/// # Errors
/// Propagates errors from `f` and from the backward pass.
pub fn compute_gradient<A, E, F>(input: &Tensor, f: F) -> Result<Evaluation<A>, E>
where
    F: FnOnce(&Tensor, &mut dyn Recorder) -> Result<(Tensor, A), E>,
    E: From<TapeError>,
{
    let mut tape = Tape::new();
    let x = input.detach().with_grad();
    let (loss, aux) = f(&x, &mut tape)?;
    let grads = tape.backward(&loss)?;
    Ok(Evaluation { loss: loss.data.clone(), aux, grad: grads.wrt(&x) })
}
