//! Error types shared by the graph and the scheduler.

use thiserror::Error;

use crate::graph::NodeId;
use crate::scheduler::ContextKind;

/// Errors surfaced by the evaluation core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// No node is registered under this identifier.
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    /// A node with this identifier already exists.
    #[error("node {0} already exists")]
    DuplicateNode(NodeId),

    /// The node has no settable value (it is not a leaf).
    #[error("node {0} is not a value node")]
    NotSettable(NodeId),

    /// Adding the edge would make the graph cyclic.
    #[error("edge {dependency} -> {dependent} would create a cycle")]
    CycleDetected { dependency: NodeId, dependent: NodeId },

    /// The dependent reads this node as an input, so the edge must stay.
    #[error("node {dependent} reads {dependency} as an input")]
    RequiredInput { dependency: NodeId, dependent: NodeId },

    /// No completed render pass has published a value for this node.
    #[error("node {0} has no settled value")]
    NotSettled(NodeId),

    /// A recognized configuration key carried an unusable value.
    #[error("invalid config key `{key}`: {reason}")]
    InvalidConfig { key: String, reason: String },

    /// The target execution context is detached or gone; the request was dropped.
    #[error("{0} context is unavailable")]
    SchedulingUnavailable(ContextKind),

    /// One of the node's inputs failed to evaluate.
    #[error("node {node} failed to evaluate: {source}")]
    Evaluation {
        node: NodeId,
        #[source]
        source: Box<GraphError>,
    },

    /// The node's compute function reported a failure.
    #[error("node {node} compute failed: {message}")]
    Compute { node: NodeId, message: String },
}

impl GraphError {
    /// Wrap an input failure as an evaluation failure of `node`.
    pub(crate) fn evaluation(node: NodeId, source: GraphError) -> Self {
        Self::Evaluation {
            node,
            source: Box::new(source),
        }
    }

    /// The innermost error, following evaluation chains.
    pub fn root_cause(&self) -> &GraphError {
        match self {
            Self::Evaluation { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GraphError>;
