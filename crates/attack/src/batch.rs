use crate::error::BatchError;
use crate::report::AttackReport;
use ml::SceneContext;
use ndarray::{s, Array4};

/// One batch of recorded scenes in the caller's agent order.
///
/// Positions are `[sample, agent, t, 2]` with NaN for unobserved points.
#[derive(Clone, Debug)]
pub struct AgentBatch {
    pub past: Array4<f32>,
    pub future: Array4<f32>,
    pub context: SceneContext,
    /// One name per agent; `tar` marks the target and `ego` the reference agent.
    pub agent_names: Vec<String>,
}

impl AgentBatch {
    /// # Errors
    /// Returns [`BatchError`] if the positions or any context array disagree
    /// on samples or agents, or the name list does not cover every agent.
    pub fn new(
        past: Array4<f32>,
        future: Array4<f32>,
        context: SceneContext,
        agent_names: Vec<String>,
    ) -> Result<Self, BatchError> {
        let batch = Self { past, future, context, agent_names };
        batch.check()?;
        Ok(batch)
    }

    /// # Errors
    /// See [`AgentBatch::new`].
    pub fn check(&self) -> Result<(), BatchError> {
        let (samples, agents, _, dims) = self.past.dim();
        if dims != 2 {
            return Err(BatchError::Shape { what: "past", expected: vec![samples, agents, self.past_steps(), 2], got: self.past.shape().to_vec() });
        }
        let (fs, fa, ft, fd) = self.future.dim();
        if (fs, fa, fd) != (samples, agents, 2) {
            return Err(BatchError::Shape { what: "future", expected: vec![samples, agents, ft, 2], got: self.future.shape().to_vec() });
        }
        if self.context.agent_types.dim() != (samples, agents) {
            return Err(BatchError::Shape {
                what: "agent types",
                expected: vec![samples, agents],
                got: self.context.agent_types.shape().to_vec(),
            });
        }
        self.check_context(samples, agents)?;
        if self.agent_names.len() != agents {
            return Err(BatchError::AgentNames { expected: agents, got: self.agent_names.len() });
        }
        Ok(())
    }

    /// Every optional per-agent array must lead with `[samples, agents]`.
    fn check_context(&self, samples: usize, agents: usize) -> Result<(), BatchError> {
        let ctx = &self.context;
        let leading = [
            ("features", ctx.features.as_ref().map(|a| a.shape())),
            ("categories", ctx.categories.as_ref().map(|a| a.shape())),
            ("images", ctx.images.as_ref().map(|a| a.shape())),
            ("image scale", ctx.image_scale.as_ref().map(|a| a.shape())),
        ];
        for (what, shape) in leading {
            let Some(shape) = shape else { continue };
            if shape.len() < 2 || shape[..2] != [samples, agents] {
                let mut expected = vec![samples, agents];
                expected.extend(shape.iter().skip(2));
                return Err(BatchError::Shape { what, expected, got: shape.to_vec() });
            }
        }
        if let Some(graphs) = &ctx.graphs {
            if graphs.len() != samples {
                return Err(BatchError::Shape { what: "graphs", expected: vec![samples], got: vec![graphs.len()] });
            }
        }
        Ok(())
    }

    pub fn num_samples(&self) -> usize {
        self.past.shape()[0]
    }

    pub fn num_agents(&self) -> usize {
        self.past.shape()[1]
    }

    pub fn past_steps(&self) -> usize {
        self.past.shape()[2]
    }

    pub fn future_steps(&self) -> usize {
        self.future.shape()[2]
    }

    /// Samples `start..end` as their own batch.
    #[must_use]
    pub fn slice_samples(&self, start: usize, end: usize) -> Self {
        let pick = |a: &Array4<f32>| a.slice(s![start..end, .., .., ..]).to_owned();
        let rows: Vec<usize> = (start..end).collect();
        let context = SceneContext {
            agent_types: self.context.agent_types.select(ndarray::Axis(0), &rows),
            features: self.context.features.as_ref().map(|a| a.select(ndarray::Axis(0), &rows)),
            categories: self.context.categories.as_ref().map(|a| a.select(ndarray::Axis(0), &rows)),
            images: self.context.images.as_ref().map(|a| a.select(ndarray::Axis(0), &rows)),
            image_scale: self.context.image_scale.as_ref().map(|a| a.select(ndarray::Axis(0), &rows)),
            graphs: self.context.graphs.as_ref().map(|g| g.iter().skip(start).take(end - start).cloned().collect()),
        };
        Self { past: pick(&self.past), future: pick(&self.future), context, agent_names: self.agent_names.clone() }
    }
}

/// Result of one attack, in the caller's agent order.
#[derive(Clone, Debug)]
pub struct PerturbedBatch {
    pub past: Array4<f32>,
    /// The future selected by the configured return policy.
    pub future: Array4<f32>,
    pub report: AttackReport,
}
