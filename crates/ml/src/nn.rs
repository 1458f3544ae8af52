use crate::recorder::Recorder;
use crate::Tensor;

/// Fully connected layer: `y = x · w + b` for a row batch `x: [rows, in]`.
pub struct Dense {
    pub w: Tensor,
    pub b: Tensor,
    in_dim: usize,
    out_dim: usize,
}

impl Dense {
    /// # Panics
    /// Panics if the weight or bias lengths do not match the dimensions.
    #[must_use]
    pub fn new(weights: Vec<f32>, bias: Vec<f32>, in_dim: usize, out_dim: usize) -> Self {
        assert_eq!(weights.len(), in_dim * out_dim);
        assert_eq!(bias.len(), out_dim);
        Self {
            w: Tensor::from_vec(vec![in_dim, out_dim], weights),
            b: Tensor::from_vec(vec![out_dim], bias),
            in_dim,
            out_dim,
        }
    }

    /// Xavier-uniform weights and zero bias.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn xavier(in_dim: usize, out_dim: usize, rng: &mut fastrand::Rng) -> Self {
        let limit = (6.0f32 / (in_dim as f32 + out_dim as f32)).sqrt();
        let weights: Vec<f32> = (0..in_dim * out_dim)
            .map(|_| (rng.f32() * 2.0 - 1.0) * limit)
            .collect();
        Self::new(weights, vec![0.0; out_dim], in_dim, out_dim)
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    /// # Panics
    /// Panics if `x` is not `[rows, in_dim]`.
    pub fn forward(&self, x: &Tensor, rec: &mut dyn Recorder) -> Tensor {
        assert_eq!(x.shape.len(), 2, "dense input must be [rows, features]");
        assert_eq!(x.shape[1], self.in_dim, "dense input width");
        let rows = x.shape[0];
        let y = x.matmul(&self.w, rec);
        let bias = self.b.gather(
            (0..rows * self.out_dim).map(|i| i % self.out_dim).collect(),
            vec![rows, self.out_dim],
            rec,
        );
        y.add(&bias, rec)
    }
}
