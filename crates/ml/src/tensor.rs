use crate::graph::{EOp, Node};
use crate::recorder::Recorder;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

fn next_id() -> usize {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// A dense, row-major `f32` tensor with a process-unique id.
///
/// Every operation allocates a fresh output tensor. When the recorder tracks
/// gradients and an input requires one, the operation is appended to the
/// recorder so [`crate::tape::Tape::backward`] can replay it in reverse.
#[derive(Clone, Debug)]
pub struct Tensor {
    pub id: usize,
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
    pub requires_grad: bool,
}

impl Tensor {
    /// # Panics
    /// Panics if `shape` does not describe exactly `data.len()` elements.
    #[must_use]
    pub fn from_vec(shape: Vec<usize>, data: Vec<f32>) -> Self {
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {shape:?} does not hold {} elements",
            data.len()
        );
        Self { id: next_id(), data, shape, requires_grad: false }
    }

    #[must_use]
    pub fn scalar(value: f32) -> Self {
        Self::from_vec(vec![1], vec![value])
    }

    #[must_use]
    pub fn full(shape: Vec<usize>, value: f32) -> Self {
        let len = shape.iter().product();
        Self::from_vec(shape, vec![value; len])
    }

    #[must_use]
    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::full(shape, 0.0)
    }

    #[must_use]
    pub fn with_grad(mut self) -> Self {
        self.requires_grad = true;
        self
    }

    pub fn set_requires_grad(&mut self) {
        self.requires_grad = true;
    }

    /// Copy of the values under a new id that is disconnected from any tape.
    #[must_use]
    pub fn detach(&self) -> Self {
        Self::from_vec(self.shape.clone(), self.data.clone())
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn all_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    fn emit(
        inputs: &[&Tensor],
        op: EOp,
        shape: Vec<usize>,
        data: Vec<f32>,
        rec: &mut dyn Recorder,
        saved: impl FnOnce() -> Vec<Vec<f32>>,
    ) -> Tensor {
        let mut out = Tensor::from_vec(shape, data);
        if rec.tracks_grad() && inputs.iter().any(|t| t.requires_grad) {
            out.requires_grad = true;
            rec.record(Node {
                op,
                inputs: inputs.iter().map(|t| t.id).collect(),
                input_lens: inputs.iter().map(|t| t.len()).collect(),
                out: out.id,
                saved: saved(),
            });
        }
        out
    }

    fn zip_with(&self, other: &Tensor, f: impl Fn(f32, f32) -> f32) -> Vec<f32> {
        assert_eq!(
            self.shape, other.shape,
            "element-wise operands differ in shape"
        );
        self.data.iter().zip(&other.data).map(|(&a, &b)| f(a, b)).collect()
    }

    fn map(&self, f: impl Fn(f32) -> f32) -> Vec<f32> {
        self.data.iter().map(|&a| f(a)).collect()
    }

    pub fn add(&self, other: &Tensor, rec: &mut dyn Recorder) -> Tensor {
        let data = self.zip_with(other, |a, b| a + b);
        Self::emit(&[self, other], EOp::Add, self.shape.clone(), data, rec, Vec::new)
    }

    pub fn sub(&self, other: &Tensor, rec: &mut dyn Recorder) -> Tensor {
        let data = self.zip_with(other, |a, b| a - b);
        Self::emit(&[self, other], EOp::Sub, self.shape.clone(), data, rec, Vec::new)
    }

    pub fn mul(&self, other: &Tensor, rec: &mut dyn Recorder) -> Tensor {
        let data = self.zip_with(other, |a, b| a * b);
        Self::emit(&[self, other], EOp::Mul, self.shape.clone(), data, rec, || {
            vec![self.data.clone(), other.data.clone()]
        })
    }

    pub fn div(&self, other: &Tensor, rec: &mut dyn Recorder) -> Tensor {
        let data = self.zip_with(other, |a, b| a / b);
        Self::emit(&[self, other], EOp::Div, self.shape.clone(), data, rec, || {
            vec![self.data.clone(), other.data.clone()]
        })
    }

    pub fn add_scalar(&self, value: f32, rec: &mut dyn Recorder) -> Tensor {
        let data = self.map(|a| a + value);
        Self::emit(&[self], EOp::AddScalar, self.shape.clone(), data, rec, Vec::new)
    }

    pub fn mul_scalar(&self, value: f32, rec: &mut dyn Recorder) -> Tensor {
        let data = self.map(|a| a * value);
        Self::emit(&[self], EOp::MulScalar(value), self.shape.clone(), data, rec, Vec::new)
    }

    pub fn neg(&self, rec: &mut dyn Recorder) -> Tensor {
        let data = self.map(|a| -a);
        Self::emit(&[self], EOp::Neg, self.shape.clone(), data, rec, Vec::new)
    }

    pub fn sin(&self, rec: &mut dyn Recorder) -> Tensor {
        let data = self.map(f32::sin);
        Self::emit(&[self], EOp::Sin, self.shape.clone(), data, rec, || vec![self.data.clone()])
    }

    pub fn cos(&self, rec: &mut dyn Recorder) -> Tensor {
        let data = self.map(f32::cos);
        Self::emit(&[self], EOp::Cos, self.shape.clone(), data, rec, || vec![self.data.clone()])
    }

    /// Square root. Its backward rule uses the zero sub-gradient at 0.
    pub fn sqrt(&self, rec: &mut dyn Recorder) -> Tensor {
        let data = self.map(f32::sqrt);
        let saved = data.clone();
        Self::emit(&[self], EOp::Sqrt, self.shape.clone(), data, rec, || vec![saved])
    }

    /// Natural logarithm.
    pub fn log(&self, rec: &mut dyn Recorder) -> Tensor {
        let data = self.map(f32::ln);
        Self::emit(&[self], EOp::Log, self.shape.clone(), data, rec, || vec![self.data.clone()])
    }

    pub fn exp(&self, rec: &mut dyn Recorder) -> Tensor {
        let data = self.map(f32::exp);
        let saved = data.clone();
        Self::emit(&[self], EOp::Exp, self.shape.clone(), data, rec, || vec![saved])
    }

    pub fn tanh(&self, rec: &mut dyn Recorder) -> Tensor {
        let data = self.map(f32::tanh);
        let saved = data.clone();
        Self::emit(&[self], EOp::Tanh, self.shape.clone(), data, rec, || vec![saved])
    }

    /// Clamps every element into `[min, max]`; the gradient is zero outside
    /// the open interval.
    pub fn clamp(&self, min: f32, max: f32, rec: &mut dyn Recorder) -> Tensor {
        let data = self.map(|a| a.clamp(min, max));
        Self::emit(&[self], EOp::Clamp { min, max }, self.shape.clone(), data, rec, || {
            vec![self.data.clone()]
        })
    }

    /// Picks `self` where `mask` is set and `other` elsewhere.
    ///
    /// The unpicked branch receives an exact zero gradient, so non-finite
    /// values hidden behind the mask never leak into the backward pass.
    pub fn where_mask(&self, mask: &[bool], other: &Tensor, rec: &mut dyn Recorder) -> Tensor {
        assert_eq!(mask.len(), self.len(), "mask length differs from tensor length");
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .zip(mask)
            .map(|((&a, &b), &m)| if m { a } else { b })
            .collect();
        Self::emit(&[self, other], EOp::Where(mask.to_vec()), self.shape.clone(), data, rec, Vec::new)
    }

    /// `out[i] = self[indices[i]]`, reshaped to `shape`.
    ///
    /// Slicing, selection, broadcasting and permutation are all expressed
    /// through this one operation.
    pub fn gather(&self, indices: Vec<usize>, shape: Vec<usize>, rec: &mut dyn Recorder) -> Tensor {
        let data = indices.iter().map(|&i| self.data[i]).collect();
        Self::emit(&[self], EOp::Gather(indices), shape, data, rec, Vec::new)
    }

    /// Flat concatenation of all parts.
    pub fn concat(parts: &[&Tensor], rec: &mut dyn Recorder) -> Tensor {
        let data: Vec<f32> = parts.iter().flat_map(|t| t.data.iter().copied()).collect();
        let len = data.len();
        Self::emit(parts, EOp::Concat, vec![len], data, rec, Vec::new)
    }

    pub fn reshape(&self, shape: Vec<usize>, rec: &mut dyn Recorder) -> Tensor {
        Self::emit(&[self], EOp::Reshape, shape, self.data.clone(), rec, Vec::new)
    }

    pub fn reduce_sum(&self, rec: &mut dyn Recorder) -> Tensor {
        let data = vec![self.data.iter().sum()];
        Self::emit(&[self], EOp::ReduceSum, vec![1], data, rec, Vec::new)
    }

    /// `out[segments[i]] += self[i]`.
    pub fn segment_sum(&self, segments: &[usize], num_segments: usize, rec: &mut dyn Recorder) -> Tensor {
        assert_eq!(segments.len(), self.len(), "segment map length differs from tensor length");
        let mut data = vec![0.0; num_segments];
        for (&v, &s) in self.data.iter().zip(segments) {
            data[s] += v;
        }
        Self::emit(&[self], EOp::SegmentSum(segments.to_vec()), vec![num_segments], data, rec, Vec::new)
    }

    /// Maximum per segment. Empty segments yield 0 and pass no gradient.
    pub fn segment_max(&self, segments: &[usize], num_segments: usize, rec: &mut dyn Recorder) -> Tensor {
        assert_eq!(segments.len(), self.len(), "segment map length differs from tensor length");
        let mut argmax: Vec<Option<usize>> = vec![None; num_segments];
        for (i, (&v, &s)) in self.data.iter().zip(segments).enumerate() {
            match argmax[s] {
                Some(j) if v.partial_cmp(&self.data[j]) != Some(std::cmp::Ordering::Greater) => {}
                _ => argmax[s] = Some(i),
            }
        }
        let data = argmax.iter().map(|a| a.map_or(0.0, |i| self.data[i])).collect();
        Self::emit(&[self], EOp::SegmentMax(argmax), vec![num_segments], data, rec, Vec::new)
    }

    /// `[m, k] x [k, n] -> [m, n]`.
    pub fn matmul(&self, other: &Tensor, rec: &mut dyn Recorder) -> Tensor {
        assert_eq!(self.shape.len(), 2, "matmul lhs must be 2-d");
        assert_eq!(other.shape.len(), 2, "matmul rhs must be 2-d");
        let (m, k, n) = (self.shape[0], self.shape[1], other.shape[1]);
        assert_eq!(other.shape[0], k, "matmul inner dimensions differ");
        let mut data = vec![0.0; m * n];
        for i in 0..m {
            for p in 0..k {
                let a = self.data[i * k + p];
                for j in 0..n {
                    data[i * n + j] += a * other.data[p * n + j];
                }
            }
        }
        Self::emit(&[self, other], EOp::MatMul { m, k, n }, vec![m, n], data, rec, || {
            vec![self.data.clone(), other.data.clone()]
        })
    }
}
