//! Derived Nodes
//!
//! A derived node computes its value from the current values of an ordered
//! list of upstream nodes. Concrete node catalogs (arithmetic, conditional,
//! ...) are built by handing a compute function to [`DerivedNode::new`].

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use super::node::NodeId;
use super::value::Value;

type ComputeFn = dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync;

/// A node whose value is a pure function of its inputs.
#[derive(Clone)]
pub struct DerivedNode {
    inputs: SmallVec<[NodeId; 4]>,
    compute: Arc<ComputeFn>,
}

impl DerivedNode {
    /// Create a derived node reading `inputs`, in order.
    ///
    /// `compute` receives one value per input. An `Err` becomes a
    /// [`GraphError::Compute`](crate::GraphError::Compute) for this node.
    pub fn new<I, F, E>(inputs: I, compute: F) -> Self
    where
        I: IntoIterator<Item = NodeId>,
        F: Fn(&[Value]) -> Result<Value, E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        Self {
            inputs: inputs.into_iter().collect(),
            compute: Arc::new(move |args: &[Value]| compute(args).map_err(|e| e.to_string())),
        }
    }

    /// Create a derived node whose compute function cannot fail.
    pub fn infallible<I, F>(inputs: I, compute: F) -> Self
    where
        I: IntoIterator<Item = NodeId>,
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Self::new(inputs, move |args: &[Value]| Ok::<_, std::convert::Infallible>(compute(args)))
    }

    /// Ordered inputs.
    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    pub(crate) fn compute(&self, args: &[Value]) -> Result<Value, String> {
        (self.compute)(args)
    }
}

impl fmt::Debug for DerivedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedNode")
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}
