use dynamics::forward_dynamics;
use ml::{compute_gradient, Graph, Tensor};

const DT: f32 = 0.2;

fn final_distance(control: &Tensor, rec: &mut dyn ml::Recorder) -> Tensor {
    let origin = Tensor::from_vec(vec![2, 2], vec![0.0, 0.0, 5.0, 1.0]);
    let p = forward_dynamics(control, &origin, &[0.1, -0.3], &[6.0, 3.0], DT, rec).unwrap();
    // squared norm of the last point of each row
    let last = p.gather(vec![8, 9, 18, 19], vec![4], rec);
    last.mul(&last, rec).reduce_sum(rec)
}

#[test]
fn control_gradient_matches_finite_differences() {
    let data: Vec<f32> = (0..20).map(|i| ((i * 7) % 5) as f32 * 0.1 - 0.2).collect();
    let control = Tensor::from_vec(vec![2, 5, 2], data);

    let eval = compute_gradient(&control, |c, rec| Ok::<_, ml::TapeError>((final_distance(c, rec), ()))).unwrap();

    let eps = 1e-2;
    for i in 0..control.len() {
        let mut plus = control.detach();
        let mut minus = control.detach();
        plus.data[i] += eps;
        minus.data[i] -= eps;
        let lp = final_distance(&plus, &mut Graph::new()).data[0];
        let lm = final_distance(&minus, &mut Graph::new()).data[0];
        let numerical = (lp - lm) / (2.0 * eps);
        let analytical = eval.grad[i];
        assert!(
            (numerical - analytical).abs() < 2e-2 * (1.0 + numerical.abs()),
            "grad mismatch at {i}: numerical {numerical}, analytical {analytical}"
        );
    }
    // index 0 of every row never acts
    assert_eq!(eval.grad[0], 0.0);
    assert_eq!(eval.grad[11], 0.0);
}
