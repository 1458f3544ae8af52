#![allow(dead_code, clippy::cast_precision_loss)]

use attack::{AgentBatch, AttackConfig, Perturber};
use dynamics::{integrate, ControlLimits, FixedLimits};
use ml::{AgentType, ConstantVelocity, Predictor, SceneContext};
use ndarray::{s, Array2, Array4};

pub const PAST: usize = 8;
pub const FUTURE: usize = 6;
pub const DT: f32 = 0.1;
/// Caller-order index of the target.
pub const TARGET: usize = 1;
pub const EGO: usize = 2;

/// Two samples of three agents named `a`, `tar`, `ego`.
///
/// The target drives a gentle left turn while speeding up. Its last future
/// step is missing everywhere, and sample 1 misses one past point of the
/// target and the first point of `a`.
pub fn batch() -> AgentBatch {
    let samples = 2;
    let steps = PAST + FUTURE;
    let mut all = Array4::from_elem((samples, 3, steps, 2), f32::NAN);
    for i in 0..samples {
        let control = Array2::from_shape_fn((steps, 2), |(_, c)| if c == 0 { 0.5 } else { 0.05 });
        let track = integrate(control.view(), [0.0, 3.0 * i as f32], 0.1, 5.0 + i as f32, DT).unwrap();
        all.slice_mut(s![i, TARGET, .., ..]).assign(&track);
        for t in 0..steps {
            let t_f = t as f32;
            all[[i, 0, t, 0]] = 0.4 * t_f;
            all[[i, 0, t, 1]] = 2.0 + i as f32;
            all[[i, EGO, t, 0]] = 10.0 - 0.5 * t_f;
            all[[i, EGO, t, 1]] = 1.0;
        }
    }
    all.slice_mut(s![1, 0, 0, ..]).fill(f32::NAN);
    all.slice_mut(s![1, TARGET, 3, ..]).fill(f32::NAN);
    all.slice_mut(s![.., TARGET, steps - 1, ..]).fill(f32::NAN);

    let past = all.slice(s![.., .., ..PAST, ..]).to_owned();
    let future = all.slice(s![.., .., PAST.., ..]).to_owned();
    let context = SceneContext::new(Array2::from_elem((samples, 3), AgentType::Vehicle));
    AgentBatch::new(past, future, context, names(&["a", "tar", "ego"])).unwrap()
}

pub fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| (*n).to_owned()).collect()
}

pub fn limits() -> ControlLimits {
    ControlLimits { acceleration: 3.0, curvature: 0.2 }
}

pub fn config(iterations: usize) -> AttackConfig {
    let mut config = AttackConfig::new(DT);
    config.max_number_iterations = iterations;
    config.num_samples_perturb = 2;
    config
}

pub fn perturber(config: AttackConfig) -> Perturber {
    with_model(Box::new(ConstantVelocity), config)
}

pub fn with_model(model: Box<dyn Predictor>, config: AttackConfig) -> Perturber {
    Perturber::new(model, Box::new(FixedLimits(limits())), config).unwrap()
}

/// Bitwise equality, NaN included.
pub fn same_bits(a: &Array4<f32>, b: &Array4<f32>) -> bool {
    a.shape() == b.shape() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}

pub fn same_observability(a: &Array4<f32>, b: &Array4<f32>) -> bool {
    a.shape() == b.shape() && a.iter().zip(b).all(|(x, y)| x.is_finite() == y.is_finite())
}

/// One agent of a `[sample, agent, t, 2]` array.
pub fn agent(a: &Array4<f32>, index: usize) -> Array4<f32> {
    a.slice(s![.., index..=index, .., ..]).to_owned()
}
