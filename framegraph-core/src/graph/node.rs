//! Graph Nodes
//!
//! This module defines the node record that lives in the dependency graph
//! and the closed set of node variants it can hold.

use std::fmt;

use indexmap::IndexSet;

use super::derived::DerivedNode;
use super::leaf::ValueNode;
use super::value::Value;
use crate::error::{GraphError, Result};

/// Stable identifier for a node, assigned by the graph owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Dirty state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    /// The memoized value equals what `evaluate` would return now.
    Clean,

    /// The memoized value is stale or was never computed.
    Dirty,
}

/// The variant-specific part of a node.
#[derive(Debug)]
pub enum NodeKind {
    /// A settable leaf.
    Value(ValueNode),

    /// A value computed from upstream nodes.
    Derived(DerivedNode),
}

impl NodeKind {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Value(_) => "value",
            NodeKind::Derived(_) => "derived",
        }
    }
}

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    /// Identifier assigned at creation.
    id: NodeId,

    /// What this node computes.
    kind: NodeKind,

    /// Current dirty state.
    state: DirtyState,

    /// Last memoized result. Only meaningful while `state` is clean.
    memoized: Value,

    /// Nodes this node reads from.
    dependencies: IndexSet<NodeId>,

    /// Nodes that must be invalidated when this node's value changes.
    dependents: IndexSet<NodeId>,

    /// How many times `evaluate` actually ran.
    evaluations: u64,

    /// How many invalidation signals this node received.
    invalidations: u64,
}

impl Node {
    /// Create a node holding `kind`.
    ///
    /// A leaf with a configured value starts clean with that value memoized;
    /// everything else starts dirty.
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        let (state, memoized) = match &kind {
            NodeKind::Value(leaf) if leaf.is_configured() => (DirtyState::Clean, leaf.evaluate()),
            _ => (DirtyState::Dirty, Value::Unset),
        };

        Self {
            id,
            kind,
            state,
            memoized,
            dependencies: IndexSet::new(),
            dependents: IndexSet::new(),
            evaluations: 0,
            invalidations: 0,
        }
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the node's variant.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }

    /// Get the current dirty state.
    pub fn dirty_state(&self) -> DirtyState {
        self.state
    }

    /// Check whether the memoized value is valid.
    pub fn is_clean(&self) -> bool {
        self.state == DirtyState::Clean
    }

    /// The memoized value if the node is clean.
    pub fn memoized(&self) -> Option<Value> {
        self.is_clean().then_some(self.memoized)
    }

    /// Number of times `evaluate` ran.
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    /// Number of invalidation signals received.
    pub fn invalidations(&self) -> u64 {
        self.invalidations
    }

    /// Compute the node's value from the current values of its inputs.
    ///
    /// `inputs` is ordered like [`Node::inputs`]. Only the evaluation
    /// counter is touched; memoizing is up to the caller.
    pub fn evaluate(&mut self, inputs: &[Value]) -> Result<Value> {
        self.evaluations += 1;
        match &self.kind {
            NodeKind::Value(leaf) => Ok(leaf.evaluate()),
            NodeKind::Derived(derived) => derived
                .compute(inputs)
                .map_err(|message| GraphError::Compute { node: self.id, message }),
        }
    }

    /// Ordered inputs consumed by `evaluate`.
    pub fn inputs(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Value(_) => &[],
            NodeKind::Derived(derived) => derived.inputs(),
        }
    }

    /// Store `value` as the memoized result and mark the node clean.
    pub(crate) fn memoize(&mut self, value: Value) {
        self.memoized = value;
        self.state = DirtyState::Clean;
    }

    /// Receive an invalidation signal.
    ///
    /// Returns `true` if the node went from clean to dirty. Invalidating a
    /// dirty node only counts the signal.
    pub(crate) fn invalidate(&mut self) -> bool {
        self.invalidations += 1;
        let was_clean = self.is_clean();
        self.state = DirtyState::Dirty;
        was_clean
    }

    pub(crate) fn add_dependency(&mut self, node_id: NodeId) {
        self.dependencies.insert(node_id);
    }

    pub(crate) fn remove_dependency(&mut self, node_id: NodeId) {
        self.dependencies.shift_remove(&node_id);
    }

    /// Nodes this node reads from.
    pub fn dependencies(&self) -> &IndexSet<NodeId> {
        &self.dependencies
    }

    pub(crate) fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    pub(crate) fn remove_dependent(&mut self, node_id: NodeId) {
        self.dependents.shift_remove(&node_id);
    }

    /// Nodes invalidated when this node changes.
    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;

    fn leaf(id: u64, config: Option<&NodeConfig>) -> Node {
        let leaf = ValueNode::from_config(config).unwrap();
        Node::new(NodeId::from(id), NodeKind::Value(leaf))
    }

    #[test]
    fn unconfigured_leaf_starts_dirty_and_unset() {
        let mut node = leaf(1, None);
        assert_eq!(node.dirty_state(), DirtyState::Dirty);
        assert_eq!(node.memoized(), None);
        assert_eq!(node.evaluate(&[]).unwrap(), Value::Unset);
    }

    #[test]
    fn configured_leaf_starts_clean() {
        let config = NodeConfig::new().with("value", 3.5);
        let node = leaf(1, Some(&config));
        assert!(node.is_clean());
        assert_eq!(node.memoized(), Some(Value::Number(3.5)));
        assert_eq!(node.evaluations(), 0);
    }

    #[test]
    fn derived_node_starts_dirty() {
        let derived = DerivedNode::infallible([NodeId::from(1)], |args| args[0]);
        let node = Node::new(NodeId::from(2), NodeKind::Derived(derived));
        assert_eq!(node.dirty_state(), DirtyState::Dirty);
        assert_eq!(node.inputs(), &[NodeId::from(1)]);
    }

    #[test]
    fn dirty_state_transitions() {
        let mut node = leaf(1, None);

        node.memoize(Value::Number(1.0));
        assert_eq!(node.dirty_state(), DirtyState::Clean);

        assert!(node.invalidate());
        assert_eq!(node.dirty_state(), DirtyState::Dirty);

        // Already dirty: counted, no transition.
        assert!(!node.invalidate());
        assert_eq!(node.invalidations(), 2);
    }

    #[test]
    fn compute_failures_name_the_node() {
        let derived = DerivedNode::new(Vec::<NodeId>::new(), |_| Err::<Value, _>("division by zero"));
        let mut node = Node::new(NodeId::from(9), NodeKind::Derived(derived));
        let err = node.evaluate(&[]).unwrap_err();
        assert_eq!(
            err,
            GraphError::Compute {
                node: NodeId::from(9),
                message: "division by zero".into()
            }
        );
    }

    #[test]
    fn dependency_management() {
        let mut node = leaf(1, None);
        let dep1 = NodeId::from(10);
        let dep2 = NodeId::from(11);

        node.add_dependent(dep1);
        node.add_dependent(dep2);
        node.add_dependent(dep1);
        assert_eq!(node.dependents().len(), 2);

        node.remove_dependent(dep1);
        assert!(!node.dependents().contains(&dep1));
        assert!(node.dependents().contains(&dep2));
    }
}
