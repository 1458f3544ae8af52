#![deny(clippy::all, clippy::pedantic)]
#![allow(
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::many_single_char_names
)]
//! Scene files describe one batch of recorded traffic as JSON:
//!
//! ```json
//! {
//!   "agent_names": ["tar", "ego", "a"],
//!   "agent_types": ["V", "V", "P"],
//!   "samples": [
//!     {
//!       "past":   [[[0.0, 0.0], [0.5, 0.0]], [[3.0, 1.0], null], [[1.0, 4.0], [1.0, 3.6]]],
//!       "future": [[[1.0, 0.0]], [[3.0, 1.2]], [null]]
//!     }
//!   ]
//! }
//! ```
//!
//! Tracks are indexed `[agent][timestep]`; `null` marks a missing point and
//! short tracks are padded with missing points. Results are written back in
//! the same layout.

use anyhow::{anyhow, bail, Context, Result};
use attack::{AgentBatch, AttackReport, PerturbedBatch};
use ml::{AgentType, LaneGraph, SceneContext};
use ndarray::{Array2, Array3, Array4};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// `[agent][timestep]` positions, `None` where unobserved.
pub type Tracks = Vec<Vec<Option<[f32; 2]>>>;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SceneFile {
    pub agent_names: Vec<String>,
    /// Single-letter type codes, one per agent. Missing entries read as vehicles.
    #[serde(default)]
    pub agent_types: Vec<String>,
    pub samples: Vec<SampleDef>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SampleDef {
    pub past: Tracks,
    pub future: Tracks,
    /// `[agent][feature]`
    #[serde(default)]
    pub features: Option<Vec<Vec<f32>>>,
    /// Lane centerlines of this sample.
    #[serde(default)]
    pub lanes: Option<Vec<Vec<[f32; 2]>>>,
}

impl SceneFile {
    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading scene {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing scene {}", path.display()))
    }

    /// Packs the samples into arrays, padding every track to the longest one.
    pub fn into_batch(self) -> Result<AgentBatch> {
        let agents = self.agent_names.len();
        let samples = self.samples.len();
        if samples == 0 {
            bail!("scene has no samples");
        }
        for (s, sample) in self.samples.iter().enumerate() {
            if sample.past.len() != agents || sample.future.len() != agents {
                bail!(
                    "sample {s} has {} past and {} future tracks for {agents} agents",
                    sample.past.len(),
                    sample.future.len()
                );
            }
        }
        let longest = |pick: fn(&SampleDef) -> &Tracks| {
            self.samples.iter().flat_map(|s| pick(s).iter().map(Vec::len)).max().unwrap_or(0)
        };
        let past = pack(&self.samples, |s| &s.past, longest(|s| &s.past));
        let future = pack(&self.samples, |s| &s.future, longest(|s| &s.future));

        let types: Vec<AgentType> = (0..agents)
            .map(|a| self.agent_types.get(a).map_or(AgentType::Vehicle, |code| AgentType::from_code(code)))
            .collect();
        let mut context = SceneContext::new(Array2::from_shape_fn((samples, agents), |(_, a)| types[a]));
        context.features = features(&self.samples, agents)?;
        if self.samples.iter().any(|s| s.lanes.is_some()) {
            context.graphs = Some(
                self.samples
                    .iter()
                    .map(|s| LaneGraph { centerlines: s.lanes.clone().unwrap_or_default() })
                    .collect(),
            );
        }
        Ok(AgentBatch::new(past, future, context, self.agent_names)?)
    }
}

fn pack(samples: &[SampleDef], pick: impl Fn(&SampleDef) -> &Tracks, steps: usize) -> Array4<f32> {
    let agents = samples.first().map_or(0, |s| pick(s).len());
    let mut out = Array4::from_elem((samples.len(), agents, steps, 2), f32::NAN);
    for (s, sample) in samples.iter().enumerate() {
        for (a, track) in pick(sample).iter().enumerate() {
            for (t, point) in track.iter().enumerate() {
                if let Some([x, y]) = point {
                    out[[s, a, t, 0]] = *x;
                    out[[s, a, t, 1]] = *y;
                }
            }
        }
    }
    out
}

fn features(samples: &[SampleDef], agents: usize) -> Result<Option<Array3<f32>>> {
    let Some(width) = samples.iter().find_map(|s| s.features.as_ref()).and_then(|f| f.first()).map(Vec::len) else {
        return Ok(None);
    };
    let mut out = Array3::zeros((samples.len(), agents, width));
    for (s, sample) in samples.iter().enumerate() {
        let rows = sample.features.as_ref().ok_or_else(|| anyhow!("sample {s} has no features"))?;
        if rows.len() != agents || rows.iter().any(|r| r.len() != width) {
            bail!("sample {s} features are not {agents} x {width}");
        }
        for (a, row) in rows.iter().enumerate() {
            for (f, v) in row.iter().enumerate() {
                out[[s, a, f]] = *v;
            }
        }
    }
    Ok(Some(out))
}

/// `[sample][agent][timestep]` tracks of a position array.
pub fn tracks(positions: &Array4<f32>) -> Vec<Tracks> {
    positions
        .outer_iter()
        .map(|sample| {
            sample
                .outer_iter()
                .map(|track| {
                    track
                        .outer_iter()
                        .map(|p| (p[0].is_finite() && p[1].is_finite()).then_some([p[0], p[1]]))
                        .collect()
                })
                .collect()
        })
        .collect()
}

/// What a run writes out.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultFile {
    pub method: String,
    pub agent_names: Vec<String>,
    /// Perturbed past per sample.
    pub past: Vec<Tracks>,
    /// Future selected by the return policy, per sample.
    pub future: Vec<Tracks>,
    pub report: AttackReport,
}

impl ResultFile {
    pub fn new(batch: &AgentBatch, result: PerturbedBatch) -> Self {
        Self {
            method: result.report.method.clone(),
            agent_names: batch.agent_names.clone(),
            past: tracks(&result.past),
            future: tracks(&result.future),
            report: result.report,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?).with_context(|| format!("writing result {}", path.display()))
    }
}
