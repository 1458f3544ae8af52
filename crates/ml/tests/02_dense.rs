use ml::graph::Graph;
use ml::nn::Dense;
use ml::tensor::Tensor;

#[test]
fn dense_forward_known_weights() {
    // w is [in, out]
    let layer = Dense::new(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], vec![0.5, -0.5], 3, 2);
    let x = Tensor::from_vec(vec![2, 3], vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0]);
    let mut g = Graph::new();
    let y = layer.forward(&x, &mut g);
    assert_eq!(y.shape, vec![2, 2]);
    assert_eq!(y.data, vec![4.5, 4.5, 0.5, -0.5]);
}

#[test]
fn xavier_is_seeded() {
    let a = Dense::xavier(4, 3, &mut fastrand::Rng::with_seed(7));
    let b = Dense::xavier(4, 3, &mut fastrand::Rng::with_seed(7));
    assert_eq!(a.w.data, b.w.data);
    let limit = (6.0f32 / 7.0).sqrt();
    assert!(a.w.data.iter().all(|w| w.abs() <= limit));
    assert!(a.b.data.iter().all(|&b| b == 0.0));
}
