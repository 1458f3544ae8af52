use crate::graph::Node;

/// Sink for the operations executed on [`crate::Tensor`]s.
///
/// An operation is only recorded when the recorder tracks gradients and at
/// least one of its inputs requires a gradient.
pub trait Recorder {
    fn record(&mut self, node: Node);
    fn tracks_grad(&self) -> bool;
}
