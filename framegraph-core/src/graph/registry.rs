//! Node Registry
//!
//! The graph owns every node and is the only place nodes are mutated. It
//! maps stable identifiers to nodes, records dependency edges and drives
//! evaluation.
//!
//! # Evaluation
//!
//! Evaluation is pull-based:
//!
//! 1. A write to a leaf memoizes the new value and invalidates every
//!    dependent, transitively. Nothing is recomputed at this point.
//! 2. Reading a dirty node first evaluates every dirty node it reads from,
//!    inputs before the nodes that read them, then evaluates and memoizes.
//! 3. [`NodeGraph::settle`] does the same for every dirty node so a frame
//!    ends with the whole graph clean.
//!
//! Invalidation stops at nodes that are already dirty: their dependents are
//! dirty as well, so walking further would change nothing.
//!
//! Every id a derived node lists as an input is backed by an edge while a
//! node with that id exists. Removing the input drops the edge; creating a
//! node under that id again restores it.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use super::derived::DerivedNode;
use super::leaf::ValueNode;
use super::node::{Node, NodeId, NodeKind};
use super::value::Value;
use crate::config::NodeConfig;
use crate::error::{GraphError, Result};

/// Outcome of a [`NodeGraph::settle`] walk.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Settlement {
    /// Nodes that were dirty when the walk began, with their new values,
    /// in the order they were settled.
    pub recomputed: Vec<(NodeId, Value)>,

    /// Nodes that failed to evaluate. They stay dirty.
    pub failures: Vec<GraphError>,
}

impl Settlement {
    /// Returns `true` if nothing was dirty.
    pub fn is_empty(&self) -> bool {
        self.recomputed.is_empty() && self.failures.is_empty()
    }
}

/// Registry of nodes and their dependency edges.
#[derive(Debug, Default)]
pub struct NodeGraph {
    /// All nodes, indexed by ID, in creation order.
    nodes: IndexMap<NodeId, Node>,

    /// Nodes created, memoized or removed since the last `take_changes`.
    changed: IndexSet<NodeId>,
}

impl NodeGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a settable leaf node.
    ///
    /// See [`ValueNode::from_config`] for the recognized keys.
    pub fn create_value_node(&mut self, id: NodeId, config: Option<&NodeConfig>) -> Result<NodeId> {
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateNode(id));
        }
        let leaf = ValueNode::from_config(config)?;
        let readers = self.readers_of(id);
        self.insert(Node::new(id, NodeKind::Value(leaf)));
        self.relink(id, readers);
        Ok(id)
    }

    /// Create a derived node and register it as a dependent of each input.
    pub fn create_derived_node(&mut self, id: NodeId, derived: DerivedNode) -> Result<NodeId> {
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateNode(id));
        }
        if let Some(missing) = derived.inputs().iter().find(|input| !self.nodes.contains_key(*input)) {
            return Err(GraphError::NodeNotFound(*missing));
        }

        let readers = self.readers_of(id);
        for &reader in &readers {
            if let Some(&input) = derived.inputs().iter().find(|input| self.reaches(reader, **input)) {
                return Err(GraphError::CycleDetected { dependency: input, dependent: id });
            }
        }

        let inputs: SmallVec<[NodeId; 4]> = derived.inputs().iter().copied().collect();
        self.insert(Node::new(id, NodeKind::Derived(derived)));
        for input in inputs {
            self.link(input, id);
        }
        self.relink(id, readers);
        Ok(id)
    }

    fn insert(&mut self, node: Node) {
        debug!(node = %node.id(), kind = node.kind().name(), clean = node.is_clean(), "created node");
        self.changed.insert(node.id());
        self.nodes.insert(node.id(), node);
    }

    /// Derived nodes that list `id` as an input.
    fn readers_of(&self, id: NodeId) -> SmallVec<[NodeId; 4]> {
        self.nodes
            .values()
            .filter(|node| node.inputs().contains(&id))
            .map(Node::id)
            .collect()
    }

    /// Restore the edges from a re-created node to the nodes still reading it.
    fn relink(&mut self, id: NodeId, readers: SmallVec<[NodeId; 4]>) {
        for reader in readers {
            trace!(node = %id, reader = %reader, "restored input edge");
            self.link(id, reader);
            self.invalidate(reader);
        }
    }

    /// Remove a node.
    ///
    /// Edges from its inputs are dropped and its former dependents are
    /// invalidated. A derived node that still lists the removed node as an
    /// input fails with [`GraphError::NodeNotFound`] on its next evaluation.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node> {
        let node = self.nodes.shift_remove(&id).ok_or(GraphError::NodeNotFound(id))?;
        self.changed.insert(id);

        for dep_id in node.dependencies() {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.remove_dependent(id);
            }
        }
        for dependent_id in node.dependents() {
            if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                dependent.remove_dependency(id);
            }
            self.invalidate(*dependent_id);
        }

        debug!(node = %id, dependents = node.dependents().len(), "removed node");
        Ok(node)
    }

    /// Look up a node.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or(GraphError::NodeNotFound(id))
    }

    /// Returns `true` if a node is registered under `id`.
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// All node IDs in creation order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Get the total number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Declare that `dependent` depends on `dependency`.
    ///
    /// The dependent is invalidated so it picks up the new input on its
    /// next read.
    pub fn connect(&mut self, dependency: NodeId, dependent: NodeId) -> Result<()> {
        self.node(dependency)?;
        self.node(dependent)?;
        if dependency == dependent || self.reaches(dependent, dependency) {
            return Err(GraphError::CycleDetected { dependency, dependent });
        }

        self.link(dependency, dependent);
        self.invalidate(dependent);
        Ok(())
    }

    /// Remove a dependency edge. Unknown edges are ignored.
    ///
    /// Edges backing one of the dependent's inputs cannot be removed: the
    /// dependent would stop hearing about changes it reads.
    pub fn disconnect(&mut self, dependency: NodeId, dependent: NodeId) -> Result<()> {
        if self.node(dependent)?.inputs().contains(&dependency) {
            return Err(GraphError::RequiredInput { dependency, dependent });
        }
        self.nodes
            .get_mut(&dependency)
            .ok_or(GraphError::NodeNotFound(dependency))?
            .remove_dependent(dependent);
        self.nodes
            .get_mut(&dependent)
            .ok_or(GraphError::NodeNotFound(dependent))?
            .remove_dependency(dependency);
        Ok(())
    }

    fn link(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.add_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.add_dependency(dependency);
        }
    }

    /// Whether `to` is reachable from `from` along dependent edges.
    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([from]);

        while let Some(node_id) = queue.pop_front() {
            if node_id == to {
                return true;
            }
            if !visited.insert(node_id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&node_id) {
                queue.extend(node.dependents().iter().copied());
            }
        }
        false
    }

    /// Overwrite a leaf's value and memoize it.
    ///
    /// All dependents are invalidated before this returns.
    pub fn set_value(&mut self, id: NodeId, value: impl Into<Value>) -> Result<()> {
        if let NodeKind::Derived(_) = self.node(id)?.kind() {
            return Err(GraphError::NotSettable(id));
        }
        self.force_update_memoized_value(id, value.into())
    }

    /// Memoize `value` on `id`, mark it clean and invalidate its dependents.
    ///
    /// A leaf stores `value` as well, so its memo and its evaluation agree.
    /// Dependents are only marked dirty; they recompute on their next read.
    pub(crate) fn force_update_memoized_value(&mut self, id: NodeId, value: Value) -> Result<()> {
        let node = self.nodes.get_mut(&id).ok_or(GraphError::NodeNotFound(id))?;
        if let NodeKind::Value(leaf) = node.kind_mut() {
            leaf.set(value);
        }
        node.memoize(value);
        self.changed.insert(id);
        trace!(node = %id, %value, "memoized");

        let dependents: SmallVec<[NodeId; 8]> = node.dependents().iter().copied().collect();
        for dependent in dependents {
            self.invalidate(dependent);
        }
        Ok(())
    }

    /// Deliver one invalidation signal to `id` and, if it was clean,
    /// propagate dirtiness to everything downstream of it.
    fn invalidate(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        if !node.invalidate() {
            return;
        }
        trace!(node = %id, "marked dirty");

        let mut queue: VecDeque<NodeId> = node.dependents().iter().copied().collect();
        while let Some(node_id) = queue.pop_front() {
            if let Some(node) = self.nodes.get_mut(&node_id) {
                if node.invalidate() {
                    trace!(node = %node_id, "marked dirty");
                    queue.extend(node.dependents().iter().copied());
                }
            }
        }
    }

    /// Read a node's value, evaluating and memoizing it first if dirty.
    ///
    /// Fails if the node, or any node it reads from, is missing or fails to
    /// compute. Nothing is substituted for a failed input.
    pub fn value(&mut self, id: NodeId) -> Result<Value> {
        if let Some(value) = self.node(id)?.memoized() {
            return Ok(value);
        }

        let order = self.evaluation_order([id]);
        let mut failed = HashMap::new();
        for node_id in order {
            if let Err(err) = self.recompute(node_id, &failed) {
                failed.insert(node_id, err);
            }
        }

        match failed.remove(&id) {
            Some(err) => Err(err),
            None => self.peek(id)?.ok_or(GraphError::NodeNotFound(id)),
        }
    }

    /// Evaluate one dirty node whose inputs have already been visited.
    fn recompute(&mut self, id: NodeId, failed: &HashMap<NodeId, GraphError>) -> Result<Value> {
        let node = self.node(id)?;
        let mut args: SmallVec<[Value; 4]> = SmallVec::with_capacity(node.inputs().len());
        for input in node.inputs() {
            if let Some(err) = failed.get(input) {
                return Err(GraphError::evaluation(id, err.root_cause().clone()));
            }
            let value = self
                .nodes
                .get(input)
                .and_then(Node::memoized)
                .ok_or_else(|| GraphError::evaluation(id, GraphError::NodeNotFound(*input)))?;
            args.push(value);
        }

        let node = self.nodes.get_mut(&id).ok_or(GraphError::NodeNotFound(id))?;
        let value = node.evaluate(&args)?;
        self.force_update_memoized_value(id, value)?;
        Ok(value)
    }

    /// Memoized value of a clean node, `None` if the node is dirty.
    ///
    /// Unlike [`NodeGraph::value`] this never evaluates.
    pub fn peek(&self, id: NodeId) -> Result<Option<Value>> {
        Ok(self.node(id)?.memoized())
    }

    /// IDs of all dirty nodes, in creation order.
    pub fn dirty_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|node| !node.is_clean())
            .map(Node::id)
            .collect()
    }

    /// Drain the IDs of nodes created, memoized or removed since the last
    /// call, in the order they first changed.
    pub fn take_changes(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.changed).into_iter().collect()
    }

    /// Evaluate every dirty node so the graph ends up clean.
    ///
    /// Nodes are visited in dependency order. A node that fails stays dirty
    /// and its error is collected; the walk continues with the rest.
    pub fn settle(&mut self) -> Settlement {
        let order = self.evaluation_order(self.dirty_nodes());
        let mut failed = HashMap::new();
        let mut settlement = Settlement::default();

        for id in order {
            match self.recompute(id, &failed) {
                Ok(value) => settlement.recomputed.push((id, value)),
                Err(err) => {
                    warn!(node = %id, error = %err, "node failed to evaluate");
                    settlement.failures.push(err.clone());
                    failed.insert(id, err);
                }
            }
        }

        debug!(
            recomputed = settlement.recomputed.len(),
            failed = settlement.failures.len(),
            "settled graph"
        );
        settlement
    }

    /// The dirty nodes `roots` read from, directly or transitively, and the
    /// dirty roots themselves, ordered so every node follows its inputs.
    ///
    /// Iterative depth-first walk over inputs; clean and missing nodes end
    /// the walk along their branch.
    fn evaluation_order(&self, roots: impl IntoIterator<Item = NodeId>) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<(NodeId, bool)> = Vec::new();

        for root in roots {
            stack.push((root, false));
            while let Some((id, inputs_done)) = stack.pop() {
                if inputs_done {
                    order.push(id);
                    continue;
                }
                if !visited.insert(id) {
                    continue;
                }
                let Some(node) = self.nodes.get(&id) else {
                    continue;
                };
                if node.is_clean() {
                    continue;
                }
                stack.push((id, true));
                // Reversed so inputs are visited in declaration order.
                for input in node.inputs().iter().rev() {
                    if !visited.contains(input) {
                        stack.push((*input, false));
                    }
                }
            }
        }
        order
    }
}
