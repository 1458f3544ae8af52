use attack::{AttackConfig, AttackError, Objective, Probe, ProjectedGradient};
use dynamics::ControlLimits;
use ml::{Recorder, Tensor};
use proptest::prelude::*;

const LIMITS: ControlLimits = ControlLimits { acceleration: 3.0, curvature: 0.2 };

/// `sum((delta - 1)^2)` per sample, except that any movement of sample 0
/// makes its loss NaN.
struct Fragile {
    steps: usize,
}

impl Objective for Fragile {
    fn evaluate(&self, delta: &Tensor, rec: &mut dyn Recorder) -> Result<(Tensor, Probe), AttackError> {
        let per_sample = self.steps * 2;
        let samples = delta.len() / per_sample;
        let off = delta.add_scalar(-1.0, rec);
        let segments: Vec<usize> = (0..delta.len()).map(|i| i / per_sample).collect();
        let loss = off.mul(&off, rec).segment_sum(&segments, samples, rec);
        let broken = delta.data[..per_sample].iter().any(|d| *d != 0.0);
        let poison: Vec<f32> = (0..samples).map(|s| if s == 0 && broken { f32::NAN } else { 1.0 }).collect();
        let loss = loss.mul(&Tensor::from_vec(vec![samples], poison), rec);
        Ok((loss, Probe { max_displacement: vec![0.0; samples] }))
    }
}

#[test]
fn exhausted_backoff_resets_the_sample() {
    let control = vec![0.0; 2 * 3 * 2];
    let valid = vec![false, true, true, false, true, true];
    let mut config = AttackConfig::new(0.1);
    config.max_number_iterations = 2;
    let optimiser = ProjectedGradient::new(&config, LIMITS, &control, &valid, 2, 3);
    let outcome = optimiser.run(&Fragile { steps: 3 }).unwrap();

    for record in &outcome.history {
        assert_eq!(record.attempts, 20);
        assert_eq!(record.reset_samples, vec![0]);
        assert!(record.loss.iter().all(|l| l.is_finite()));
        let halved = config.alpha * 0.5f32.powi(19);
        assert!((record.alpha_curvature[0] - halved).abs() < 1e-12);
    }
    assert!(outcome.delta[..6].iter().all(|d| *d == 0.0));
    assert!(outcome.delta[6..].iter().all(|d| d.is_finite()));
    assert!(outcome.delta[8] > 0.0);
}

struct LogOfZero;

impl Objective for LogOfZero {
    fn evaluate(&self, delta: &Tensor, rec: &mut dyn Recorder) -> Result<(Tensor, Probe), AttackError> {
        Ok((delta.log(rec).reduce_sum(rec), Probe::default()))
    }
}

#[test]
fn non_finite_gradient_is_fatal() {
    let control = vec![0.0; 4];
    let valid = vec![true, true];
    let config = AttackConfig::new(0.1);
    let optimiser = ProjectedGradient::new(&config, LIMITS, &control, &valid, 1, 2);
    let err = optimiser.run(&LogOfZero).unwrap_err();
    assert!(matches!(err, AttackError::NonFiniteGradient(0)));
}

proptest! {
    #[test]
    fn projection_stays_feasible(
        entries in prop::collection::vec(
            (-3.0f32..3.0, -0.2f32..0.2, -50.0f32..50.0, -5.0f32..5.0, any::<bool>()),
            1..24,
        ),
        past_steps in 0usize..24,
    ) {
        let config = AttackConfig::new(0.1);
        let control: Vec<f32> = entries.iter().flat_map(|e| [e.0, e.1]).collect();
        let valid: Vec<bool> = entries.iter().map(|e| e.4).collect();
        let mut delta: Vec<f32> = entries.iter().flat_map(|e| [e.2, e.3]).collect();
        let optimiser = ProjectedGradient::new(&config, LIMITS, &control, &valid, 1, past_steps);
        optimiser.project(&mut delta);

        let relative = [config.epsilon_acc_relative, config.epsilon_curv_relative];
        let absolute = [LIMITS.acceleration, config.epsilon_curv_absolute];
        for (t, (&ok, d)) in valid.iter().zip(delta.chunks_exact(2)).enumerate() {
            for c in 0..2 {
                if !ok {
                    prop_assert_eq!(d[c], 0.0);
                    continue;
                }
                prop_assert!((control[t * 2 + c] + d[c]).abs() <= absolute[c] + 1e-5);
                if t < past_steps {
                    prop_assert!(d[c].abs() <= relative[c] + 1e-5);
                }
            }
        }
    }
}
