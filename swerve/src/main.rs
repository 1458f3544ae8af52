//! # swerve
//!
//! Runs one control-action perturbation attack over a scene file and writes
//! the perturbed scene as JSON.
//!
//! ```text
//! swerve --scene scene.json --config attack.json --model mlp --seed 7 --output out.json
//! ```

mod app;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Reference predictor to attack.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ModelKind {
    ConstantVelocity,
    Mlp,
}

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    /// Scene file with the recorded batch.
    #[arg(long)]
    pub scene: PathBuf,
    /// Attack configuration as JSON.
    #[arg(long)]
    pub config: PathBuf,
    #[arg(long, value_enum, default_value_t = ModelKind::ConstantVelocity)]
    pub model: ModelKind,
    /// Seed of the MLP weights.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
    /// Where to write the result; stdout when absent.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    app::run(&Args::parse())
}
