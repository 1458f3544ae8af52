use crate::error::TapeError;
use crate::graph::{EOp, Node};
use crate::recorder::Recorder;
use crate::Tensor;
use std::collections::HashMap;

/// A tape that records operations for reverse-mode differentiation.
#[derive(Default)]
pub struct Tape {
    nodes: Vec<Node>,
}

impl Recorder for Tape {
    fn record(&mut self, node: Node) {
        self.nodes.push(node);
    }

    fn tracks_grad(&self) -> bool {
        true
    }
}

/// Accumulated gradients keyed by tensor id.
#[derive(Debug, Default)]
pub struct Gradients {
    grads: HashMap<usize, Vec<f32>>,
}

impl Gradients {
    pub fn get(&self, t: &Tensor) -> Option<&[f32]> {
        self.grads.get(&t.id).map(Vec::as_slice)
    }

    /// Gradient of `t`, or zeros when the loss does not depend on it.
    #[must_use]
    pub fn wrt(&self, t: &Tensor) -> Vec<f32> {
        self.grads
            .get(&t.id)
            .cloned()
            .unwrap_or_else(|| vec![0.0; t.len()])
    }

    /// Gradient of `t`, failing when `t` never reached the loss.
    ///
    /// # Errors
    /// Returns [`TapeError::NotTracked`] if no gradient was accumulated for `t`.
    pub fn require(&self, t: &Tensor) -> Result<&[f32], TapeError> {
        self.get(t).ok_or(TapeError::NotTracked { id: t.id })
    }
}

fn accumulate(grads: &mut HashMap<usize, Vec<f32>>, id: usize, len: usize) -> &mut Vec<f32> {
    grads.entry(id).or_insert_with(|| vec![0.0; len])
}

fn saved<'a>(node: &'a Node, slot: usize) -> Result<&'a [f32], TapeError> {
    node.saved
        .get(slot)
        .map(Vec::as_slice)
        .ok_or_else(|| TapeError::MissingSaved { op: format!("{:?}", node.op), slot })
}

fn input(node: &Node, slot: usize) -> Result<(usize, usize), TapeError> {
    match (node.inputs.get(slot), node.input_lens.get(slot)) {
        (Some(&id), Some(&len)) => Ok((id, len)),
        _ => Err(TapeError::Arity { op: format!("{:?}", node.op), expected: slot + 1 }),
    }
}

impl Tape {
    /// Creates a new, empty tape.
    #[must_use]
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Computes the gradients of every recorded tensor with respect to `loss`.
    ///
    /// The loss is seeded with ones, so a non-scalar loss differentiates the
    /// sum of its elements. Nodes whose output does not reach the loss are
    /// skipped.
    ///
    /// # Errors
    /// Returns [`TapeError`] if a node was recorded without the inputs or
    /// saved values its backward rule needs.
    #[allow(clippy::too_many_lines)]
    pub fn backward(&self, loss: &Tensor) -> Result<Gradients, TapeError> {
        let mut grads: HashMap<usize, Vec<f32>> = HashMap::new();
        grads.insert(loss.id, vec![1.0; loss.len()]);

        for node in self.nodes.iter().rev() {
            let Some(out_grad) = grads.get(&node.out).cloned() else {
                continue;
            };

            match &node.op {
                EOp::Add | EOp::Sub => {
                    let (a, a_len) = input(node, 0)?;
                    let (b, b_len) = input(node, 1)?;
                    for (g, og) in accumulate(&mut grads, a, a_len).iter_mut().zip(&out_grad) {
                        *g += og;
                    }
                    let sign: f32 = if matches!(node.op, EOp::Sub) { -1.0 } else { 1.0 };
                    for (g, og) in accumulate(&mut grads, b, b_len).iter_mut().zip(&out_grad) {
                        *g += sign * og;
                    }
                }
                EOp::Mul => {
                    let (a, a_len) = input(node, 0)?;
                    let (b, b_len) = input(node, 1)?;
                    let (av, bv) = (saved(node, 0)?, saved(node, 1)?);
                    // A zero upstream gradient stays zero even against a NaN operand.
                    for ((g, &og), d) in accumulate(&mut grads, a, a_len).iter_mut().zip(&out_grad).zip(bv) {
                        if og != 0.0 {
                            *g += og * d;
                        }
                    }
                    for ((g, &og), d) in accumulate(&mut grads, b, b_len).iter_mut().zip(&out_grad).zip(av) {
                        if og != 0.0 {
                            *g += og * d;
                        }
                    }
                }
                EOp::Div => {
                    let (a, a_len) = input(node, 0)?;
                    let (b, b_len) = input(node, 1)?;
                    let (av, bv) = (saved(node, 0)?, saved(node, 1)?);
                    for ((g, &og), d) in accumulate(&mut grads, a, a_len).iter_mut().zip(&out_grad).zip(bv) {
                        if og != 0.0 {
                            *g += og / d;
                        }
                    }
                    let b_grad = accumulate(&mut grads, b, b_len);
                    for i in 0..b_len {
                        if out_grad[i] != 0.0 {
                            b_grad[i] -= out_grad[i] * av[i] / (bv[i] * bv[i]);
                        }
                    }
                }
                EOp::AddScalar | EOp::Reshape => {
                    let (a, a_len) = input(node, 0)?;
                    for (g, og) in accumulate(&mut grads, a, a_len).iter_mut().zip(&out_grad) {
                        *g += og;
                    }
                }
                EOp::MulScalar(s) => {
                    let (a, a_len) = input(node, 0)?;
                    for (g, og) in accumulate(&mut grads, a, a_len).iter_mut().zip(&out_grad) {
                        *g += s * og;
                    }
                }
                EOp::Neg => {
                    let (a, a_len) = input(node, 0)?;
                    for (g, og) in accumulate(&mut grads, a, a_len).iter_mut().zip(&out_grad) {
                        *g -= og;
                    }
                }
                // saved: [input]
                EOp::Sin | EOp::Cos | EOp::Log | EOp::Clamp { .. } => {
                    let (a, a_len) = input(node, 0)?;
                    let av = saved(node, 0)?;
                    let local = |x: f32| match node.op {
                        EOp::Sin => x.cos(),
                        EOp::Cos => -x.sin(),
                        EOp::Log => 1.0 / x,
                        EOp::Clamp { min, max } => {
                            if x > min && x < max {
                                1.0
                            } else {
                                0.0
                            }
                        }
                        _ => unreachable!(),
                    };
                    for ((g, og), &x) in accumulate(&mut grads, a, a_len).iter_mut().zip(&out_grad).zip(av) {
                        let d = local(x);
                        if d != 0.0 {
                            *g += og * d;
                        }
                    }
                }
                // saved: [output]
                EOp::Sqrt | EOp::Exp | EOp::Tanh => {
                    let (a, a_len) = input(node, 0)?;
                    let yv = saved(node, 0)?;
                    let local = |y: f32| match node.op {
                        EOp::Sqrt => {
                            if y > 0.0 {
                                0.5 / y
                            } else {
                                0.0
                            }
                        }
                        EOp::Exp => y,
                        EOp::Tanh => 1.0 - y * y,
                        _ => unreachable!(),
                    };
                    for ((g, og), &y) in accumulate(&mut grads, a, a_len).iter_mut().zip(&out_grad).zip(yv) {
                        let d = local(y);
                        if d != 0.0 {
                            *g += og * d;
                        }
                    }
                }
                EOp::Where(mask) => {
                    let (a, a_len) = input(node, 0)?;
                    let (b, b_len) = input(node, 1)?;
                    for ((g, og), &m) in accumulate(&mut grads, a, a_len).iter_mut().zip(&out_grad).zip(mask) {
                        if m {
                            *g += og;
                        }
                    }
                    for ((g, og), &m) in accumulate(&mut grads, b, b_len).iter_mut().zip(&out_grad).zip(mask) {
                        if !m {
                            *g += og;
                        }
                    }
                }
                EOp::Gather(indices) => {
                    let (a, a_len) = input(node, 0)?;
                    let a_grad = accumulate(&mut grads, a, a_len);
                    for (&i, og) in indices.iter().zip(&out_grad) {
                        a_grad[i] += og;
                    }
                }
                EOp::Concat => {
                    let mut offset = 0;
                    for slot in 0..node.inputs.len() {
                        let (a, a_len) = input(node, slot)?;
                        let part = &out_grad[offset..offset + a_len];
                        for (g, og) in accumulate(&mut grads, a, a_len).iter_mut().zip(part) {
                            *g += og;
                        }
                        offset += a_len;
                    }
                }
                EOp::ReduceSum => {
                    let (a, a_len) = input(node, 0)?;
                    let og = out_grad[0];
                    for g in accumulate(&mut grads, a, a_len).iter_mut() {
                        *g += og;
                    }
                }
                EOp::SegmentSum(segments) => {
                    let (a, a_len) = input(node, 0)?;
                    for (g, &s) in accumulate(&mut grads, a, a_len).iter_mut().zip(segments) {
                        *g += out_grad[s];
                    }
                }
                EOp::SegmentMax(argmax) => {
                    let (a, a_len) = input(node, 0)?;
                    let a_grad = accumulate(&mut grads, a, a_len);
                    for (og, pick) in out_grad.iter().zip(argmax) {
                        if let Some(i) = pick {
                            a_grad[*i] += og;
                        }
                    }
                }
                EOp::MatMul { m, k, n } => {
                    let (m, k, n) = (*m, *k, *n);
                    let (a, a_len) = input(node, 0)?;
                    let (b, b_len) = input(node, 1)?;
                    let (av, bv) = (saved(node, 0)?, saved(node, 1)?);
                    let a_grad = accumulate(&mut grads, a, a_len);
                    for i in 0..m {
                        for p in 0..k {
                            let mut sum = 0.0;
                            for j in 0..n {
                                sum += out_grad[i * n + j] * bv[p * n + j];
                            }
                            a_grad[i * k + p] += sum;
                        }
                    }
                    let b_grad = accumulate(&mut grads, b, b_len);
                    for p in 0..k {
                        for j in 0..n {
                            let mut sum = 0.0;
                            for i in 0..m {
                                sum += av[i * k + p] * out_grad[i * n + j];
                            }
                            b_grad[p * n + j] += sum;
                        }
                    }
                }
            }
        }
        Ok(Gradients { grads })
    }
}
