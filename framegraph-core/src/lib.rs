//! Framegraph Core
//!
//! This crate provides the evaluation core of a cross-thread reactive value
//! graph. It implements:
//!
//! - Lazy, memoized nodes connected by dependency edges
//! - Invalidation-only change propagation (recompute on next read)
//! - A scheduler that coalesces work requests between a control context
//!   and a render context, so the graph is evaluated once per frame no
//!   matter how many updates arrived
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Nodes, node variants and the registry that owns them
//! - `scheduler`: Coalesced dispatch between the two execution contexts
//! - `runtime`: Wiring of graph and scheduler into per-frame passes
//! - `config`: Node construction configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use framegraph_core::{ContextKind, FrameGraph, ManualContext, NodeGraph, NodeId, Scheduler};
//!
//! let scheduler = Scheduler::new();
//! let render = ManualContext::new();
//! scheduler.attach(ContextKind::Render, render.clone());
//!
//! let mut graph = NodeGraph::new();
//! graph.create_value_node(NodeId::from(1), None)?;
//! let frames = FrameGraph::new(scheduler, graph);
//!
//! // Many writes, one render pass.
//! frames.set_value(NodeId::from(1), 1.0)?;
//! frames.set_value(NodeId::from(1), 2.0)?;
//! render.run_pending();
//!
//! assert_eq!(frames.settled(NodeId::from(1))?, 2.0.into());
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod runtime;
pub mod scheduler;

pub use config::NodeConfig;
pub use error::{GraphError, Result};
pub use graph::{DerivedNode, DirtyState, Node, NodeGraph, NodeId, NodeKind, Settlement, Value, ValueNode};
pub use runtime::{FrameGraph, FrameReport};
pub use scheduler::{
    ContextKind, Dispatch, ExecutionContext, HostClosed, ManualContext, Scheduled, Scheduler,
    TokioContext, WeakScheduler,
};
