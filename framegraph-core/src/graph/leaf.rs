//! Value Nodes
//!
//! The settable leaf: the write entry point for externally driven state.

use super::value::Value;
use crate::config::NodeConfig;
use crate::error::Result;

/// A node holding an externally settable scalar.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueNode {
    value: Value,
}

impl ValueNode {
    /// Create a leaf from an optional configuration.
    ///
    /// `{"value": n}` sets the initial value; without it the leaf is unset.
    pub fn from_config(config: Option<&NodeConfig>) -> Result<Self> {
        let value = match config {
            Some(config) => Value::from(config.initial_value()?),
            None => Value::Unset,
        };
        Ok(Self { value })
    }

    /// Create a leaf holding `value`.
    pub fn with_value(value: impl Into<Value>) -> Self {
        Self { value: value.into() }
    }

    /// Whether a value was configured at construction or set since.
    pub fn is_configured(&self) -> bool {
        !self.value.is_unset()
    }

    /// Overwrite the stored value.
    ///
    /// Memoizing and invalidating dependents is the graph's job, see
    /// [`NodeGraph::set_value`](super::NodeGraph::set_value).
    pub(crate) fn set(&mut self, value: Value) {
        self.value = value;
    }

    /// The stored value. No side effects.
    pub fn evaluate(&self) -> Value {
        self.value
    }
}
