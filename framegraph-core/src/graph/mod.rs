//! Dependency Graph
//!
//! This module implements the node graph: memoized, lazily recomputed
//! values connected by dependency edges.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes hold a memoized value and a clean/dirty state
//! - Edges represent dependencies: if A depends on B, there is an edge from B to A
//!
//! When a leaf is written, every node downstream of it is marked dirty.
//! Dirty nodes recompute the next time they are read; writes never trigger
//! recomputation directly.
//!
//! # Node Variants
//!
//! Node types form a closed set ([`NodeKind`]): settable leaves
//! ([`ValueNode`]) and values derived from other nodes ([`DerivedNode`]).
//!
//! # Ownership
//!
//! The [`NodeGraph`] owns every node. Callers refer to nodes by [`NodeId`]
//! only, so all mutation goes through the graph.

mod derived;
mod leaf;
mod node;
mod registry;
mod value;

pub use derived::DerivedNode;
pub use leaf::ValueNode;
pub use node::{DirtyState, Node, NodeId, NodeKind};
pub use registry::{NodeGraph, Settlement};
pub use value::Value;
