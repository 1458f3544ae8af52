use attack::{AgentBatch, AttackConfig, Perturber};
use criterion::{criterion_group, criterion_main, Criterion};
use dynamics::{integrate, ControlLimits, FixedLimits};
use ml::{AgentType, ConstantVelocity, SceneContext};
use ndarray::{s, Array2, Array4};

fn synthetic_batch(samples: usize, agents: usize) -> AgentBatch {
    let (past, future) = (12, 8);
    let mut all = Array4::zeros((samples, agents, past + future, 2));
    for i in 0..samples {
        for a in 0..agents {
            let control = Array2::from_shape_fn((past + future, 2), |(t, c)| {
                if c == 0 {
                    0.3
                } else {
                    0.02 * (t % 5) as f32
                }
            });
            let origin = [a as f32 * 4.0, i as f32];
            let track = integrate(control.view(), origin, 0.2 * a as f32, 4.0, 0.1).unwrap();
            all.slice_mut(s![i, a, .., ..]).assign(&track);
        }
    }
    let mut names: Vec<String> = (0..agents).map(|a| format!("agent{a}")).collect();
    names[0] = "tar".to_owned();
    AgentBatch::new(
        all.slice(s![.., .., ..past, ..]).to_owned(),
        all.slice(s![.., .., past.., ..]).to_owned(),
        SceneContext::new(Array2::from_elem((samples, agents), AgentType::Vehicle)),
        names,
    )
    .unwrap()
}

fn bench_perturb_batch(c: &mut Criterion) {
    let batch = synthetic_batch(5, 4);
    let mut config = AttackConfig::new(0.1);
    config.max_number_iterations = 10;
    config.num_samples_perturb = 4;
    let limits = FixedLimits(ControlLimits { acceleration: 3.0, curvature: 0.2 });
    let perturber = Perturber::new(Box::new(ConstantVelocity), Box::new(limits), config).unwrap();
    c.bench_function("perturb_batch_5x4", |b| {
        b.iter(|| perturber.perturb_batch(&batch).unwrap());
    });
}

criterion_group!(benches, bench_perturb_batch);
criterion_main!(benches);
