use ml::graph::Graph;
use ml::nn::Dense;
use ml::recorder::Recorder;
use ml::tape::Tape;
use ml::tensor::Tensor;
use ml::{compute_gradient, TapeError};

fn finite_diff_check<F>(x: &Tensor, f: F, epsilon: f32, tol: f32)
where
    F: Fn(&Tensor, &mut dyn Recorder) -> Tensor,
{
    let eval = compute_gradient(x, |x, rec| Ok::<_, TapeError>((f(x, rec).reduce_sum(rec), ())))
        .unwrap();

    for i in 0..x.len() {
        let mut plus = x.detach();
        let mut minus = x.detach();
        plus.data[i] += epsilon;
        minus.data[i] -= epsilon;
        let lp: f32 = f(&plus, &mut Graph::new()).data.iter().sum();
        let lm: f32 = f(&minus, &mut Graph::new()).data.iter().sum();
        let numerical = (lp - lm) / (2.0 * epsilon);
        let analytical = eval.grad[i];
        let diff = (numerical - analytical).abs();
        assert!(
            diff < tol * (1.0 + numerical.abs()),
            "grad check failed at {i}. Numerical: {numerical}, Analytical: {analytical}"
        );
    }
}

#[test]
fn elementwise_chain() {
    let x = Tensor::from_vec(vec![4], vec![0.3, 1.2, -0.7, 2.0]);
    finite_diff_check(
        &x,
        |x, rec| {
            let s = x.sin(rec).mul(&x.cos(rec), rec);
            let e = x.mul_scalar(0.5, rec).exp(rec).tanh(rec);
            let sq = x.mul(x, rec).add_scalar(1.0, rec).sqrt(rec).log(rec);
            s.add(&e, rec).sub(&sq, rec).div(&x.mul(x, rec).add_scalar(2.0, rec), rec)
        },
        1e-3,
        1e-2,
    );
}

#[test]
fn gather_segment_and_clamp() {
    let x = Tensor::from_vec(vec![6], vec![0.1, 0.9, 0.4, -0.2, 0.6, 0.3]);
    finite_diff_check(
        &x,
        |x, rec| {
            let g = x.gather(vec![5, 0, 1, 1, 3, 2], vec![6], rec);
            let m = g.segment_max(&[0, 0, 1, 1, 2, 2], 3, rec);
            let s = x.segment_sum(&[0, 1, 2, 0, 1, 2], 3, rec);
            let c = x.clamp(0.0, 0.5, rec).segment_sum(&[0, 0, 1, 1, 2, 2], 3, rec);
            m.mul(&s, rec).add(&c, rec)
        },
        1e-3,
        1e-2,
    );
}

#[test]
fn dense_tanh_matmul() {
    let layer = Dense::xavier(3, 2, &mut fastrand::Rng::with_seed(3));
    let x = Tensor::from_vec(vec![2, 3], vec![0.9, -0.1, 0.3, 0.2, 0.5, -0.4]);
    finite_diff_check(&x, |x, rec| layer.forward(x, rec).tanh(rec), 1e-3, 1e-2);
}

#[test]
fn dense_weight_gradients() {
    let mut layer = Dense::new(vec![0.5, -0.2, 0.1, 0.3], vec![0.0, 0.1], 2, 2);
    layer.w.set_requires_grad();
    layer.b.set_requires_grad();
    let x = Tensor::from_vec(vec![1, 2], vec![2.0, -1.0]);

    let mut tape = Tape::new();
    let loss = layer.forward(&x, &mut tape).reduce_sum(&mut tape);
    let grads = tape.backward(&loss).unwrap();

    assert_eq!(grads.require(&layer.w).unwrap(), &[2.0, 2.0, -1.0, -1.0]);
    assert_eq!(grads.require(&layer.b).unwrap(), &[1.0, 1.0]);
}

#[test]
fn where_blocks_nan_gradients() {
    let x = Tensor::from_vec(vec![3], vec![1.0, 2.0, 3.0]);
    let poison = Tensor::from_vec(vec![3], vec![f32::NAN, 0.0, f32::NAN]);
    let eval = compute_gradient(&x, |x, rec| {
        let bad = x.mul(&poison, rec);
        let picked = x.where_mask(&[true, false, true], &bad, rec);
        let picked = picked.where_mask(&[true, true, true], &bad, rec);
        Ok::<_, TapeError>((picked.mul(&picked, rec).reduce_sum(rec), ()))
    })
    .unwrap();
    assert!(eval.grad[0].is_finite() && eval.grad[2].is_finite());
    assert_eq!(eval.grad[0], 2.0);
}

#[test]
fn sqrt_at_zero_has_zero_gradient() {
    let x = Tensor::from_vec(vec![2], vec![0.0, 4.0]);
    let eval =
        compute_gradient(&x, |x, rec| Ok::<_, TapeError>((x.sqrt(rec).reduce_sum(rec), ()))).unwrap();
    assert_eq!(eval.grad, vec![0.0, 0.25]);
}

#[test]
fn independent_loss_gives_zero_gradient() {
    let x = Tensor::from_vec(vec![2], vec![1.0, 2.0]);
    let c = Tensor::from_vec(vec![1], vec![5.0]);
    let eval = compute_gradient(&x, |_, rec| Ok::<_, TapeError>((c.reduce_sum(rec), ()))).unwrap();
    assert_eq!(eval.loss, vec![5.0]);
    assert_eq!(eval.grad, vec![0.0, 0.0]);
}

#[test]
fn untracked_tensor_is_reported() {
    let a = Tensor::from_vec(vec![1], vec![1.0]).with_grad();
    let b = Tensor::from_vec(vec![1], vec![1.0]);
    let mut tape = Tape::new();
    let loss = a.mul_scalar(3.0, &mut tape);
    let grads = tape.backward(&loss).unwrap();
    assert_eq!(grads.require(&a).unwrap(), &[3.0]);
    assert!(matches!(grads.require(&b), Err(TapeError::NotTracked { .. })));
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn matmul_matches_finite_differences(
            a in prop::collection::vec(-2.0f32..2.0, 6),
            b in prop::collection::vec(-2.0f32..2.0, 6),
        ) {
            let b = Tensor::from_vec(vec![3, 2], b);
            let x = Tensor::from_vec(vec![2, 3], a);
            finite_diff_check(&x, |x, rec| x.matmul(&b, rec).tanh(rec), 1e-2, 2e-2);
        }

        #[test]
        fn segment_sum_spreads_ones(segments in prop::collection::vec(0usize..4, 1..16)) {
            let x = Tensor::from_vec(vec![segments.len()], vec![1.0; segments.len()]);
            let eval = compute_gradient(&x, |x, rec| {
                Ok::<_, TapeError>((x.segment_sum(&segments, 4, rec), ()))
            })
            .unwrap();
            prop_assert!(eval.grad.iter().all(|g| *g == 1.0));
            prop_assert_eq!(eval.loss.iter().sum::<f32>(), segments.len() as f32);
        }
    }
}
