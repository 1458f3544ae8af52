use crate::recorder::Recorder;

/// Differentiable operations known to the tape.
///
/// Operations that need more than their inputs' values to run backward carry
/// that data inline (gather indices, segment maps, masks).
#[derive(Clone, Debug)]
pub enum EOp {
    Add,
    Sub,
    Mul,
    Div,
    AddScalar,
    MulScalar(f32),
    Neg,
    Sin,
    Cos,
    Sqrt,
    Log,
    Exp,
    Tanh,
    Clamp { min: f32, max: f32 },
    Where(Vec<bool>),
    Gather(Vec<usize>),
    Concat,
    Reshape,
    ReduceSum,
    SegmentSum(Vec<usize>),
    SegmentMax(Vec<Option<usize>>),
    MatMul { m: usize, k: usize, n: usize },
}

/// One recorded operation: `out = op(inputs...)`.
///
/// `saved` holds the forward values the backward rule of `op` needs, in the
/// order documented next to each rule in [`crate::tape::Tape::backward`].
#[derive(Clone, Debug)]
pub struct Node {
    pub op: EOp,
    pub inputs: Vec<usize>,
    pub input_lens: Vec<usize>,
    pub out: usize,
    pub saved: Vec<Vec<f32>>,
}

/// A recorder for forward-only evaluation.
///
/// Tensors produced under a `Graph` never require gradients, so nothing is
/// kept alive for a backward pass. Use it for inference passes whose result
/// is only inspected.
#[derive(Default)]
pub struct Graph;

impl Recorder for Graph {
    fn record(&mut self, _node: Node) {}

    fn tracks_grad(&self) -> bool {
        false
    }
}

impl Graph {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}
