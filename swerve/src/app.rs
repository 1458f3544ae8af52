//! Wires a scene file, a configuration and a reference model into one attack.

use crate::{Args, ModelKind};
use anyhow::{Context, Result};
use attack::{AttackConfig, Perturber};
use dynamics::ObservedLimits;
use ml::{ConstantVelocity, MlpPredictor, Predictor};
use scene::{ResultFile, SceneFile};
use std::fs;

const MLP_HIDDEN: usize = 32;

/// Loads everything, attacks the whole scene and writes the result.
///
/// # Errors
///
/// Returns any error from reading the inputs, the attack itself or writing
/// the output.
pub fn run(args: &Args) -> Result<()> {
    let text = fs::read_to_string(&args.config)
        .with_context(|| format!("reading config {}", args.config.display()))?;
    let config = AttackConfig::from_json(&text).with_context(|| format!("in {}", args.config.display()))?;
    let batch = SceneFile::load(&args.scene)?.into_batch()?;
    tracing::info!(
        samples = batch.num_samples(),
        agents = batch.num_agents(),
        past_steps = batch.past_steps(),
        future_steps = batch.future_steps(),
        "loaded scene"
    );

    let model: Box<dyn Predictor> = match args.model {
        ModelKind::ConstantVelocity => Box::new(ConstantVelocity),
        ModelKind::Mlp => Box::new(MlpPredictor::new(
            batch.past_steps(),
            batch.future_steps(),
            config.num_samples_perturb,
            MLP_HIDDEN,
            args.seed,
        )),
    };
    let perturber = Perturber::new(model, Box::new(ObservedLimits::default()), config)?;
    tracing::info!(method = %perturber.method_name(), "starting attack");

    let result = perturber.perturb_all(&batch)?;
    if let Some(loss) = result.report.final_loss.iter().copied().reduce(f32::min) {
        tracing::info!(best_loss = loss, "attack finished");
    }

    let file = ResultFile::new(&batch, result);
    match &args.output {
        Some(path) => {
            file.write(path)?;
            tracing::info!("wrote {}", path.display());
        }
        None => println!("{}", file.to_json()?),
    }
    Ok(())
}
