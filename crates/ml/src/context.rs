//! Per-agent side information forwarded to prediction models.

use ndarray::{Array2, Array3, ArrayD, Axis};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Vehicle,
    Pedestrian,
    Motorcycle,
    Bicycle,
    Other,
    /// Padding slot with no agent behind it.
    #[default]
    Missing,
}

impl AgentType {
    /// Single-letter code used in dataset dumps (`V`, `P`, `M`, `B`).
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "V" => Self::Vehicle,
            "P" => Self::Pedestrian,
            "M" => Self::Motorcycle,
            "B" => Self::Bicycle,
            "" => Self::Missing,
            _ => Self::Other,
        }
    }
}

/// Lane centerlines of one sample, as polylines in scene coordinates.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LaneGraph {
    pub centerlines: Vec<Vec<[f32; 2]>>,
}

/// Everything a model may look at besides past positions.
///
/// All per-agent arrays carry the agent on axis 1 so that they can be
/// reordered together with the positions.
#[derive(Clone, Debug, Default)]
pub struct SceneContext {
    /// `[sample, agent]`
    pub agent_types: Array2<AgentType>,
    /// `[sample, agent, feature]`
    pub features: Option<Array3<f32>>,
    /// `[sample, agent]`
    pub categories: Option<Array2<i32>>,
    /// `[sample, agent, ...]`
    pub images: Option<ArrayD<f32>>,
    /// `[sample, agent]` metres per pixel.
    pub image_scale: Option<Array2<f32>>,
    /// One lane graph per sample.
    pub graphs: Option<Vec<LaneGraph>>,
}

impl SceneContext {
    #[must_use]
    pub fn new(agent_types: Array2<AgentType>) -> Self {
        Self { agent_types, ..Self::default() }
    }

    pub fn num_agents(&self) -> usize {
        self.agent_types.ncols()
    }

    /// Copy with the agent axis of every array taken in `order`.
    #[must_use]
    pub fn select_agents(&self, order: &[usize]) -> Self {
        Self {
            agent_types: self.agent_types.select(Axis(1), order),
            features: self.features.as_ref().map(|a| a.select(Axis(1), order)),
            categories: self.categories.as_ref().map(|a| a.select(Axis(1), order)),
            images: self.images.as_ref().map(|a| a.select(Axis(1), order)),
            image_scale: self.image_scale.as_ref().map(|a| a.select(Axis(1), order)),
            graphs: self.graphs.clone(),
        }
    }
}
