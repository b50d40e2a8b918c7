//! Node Values
//!
//! The result type produced by every node in the graph.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The value held or produced by a node.
///
/// `Unset` means "no value configured" and is deliberately distinct from
/// `Number(0.0)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// No value has been configured.
    #[default]
    Unset,

    /// A scalar number.
    Number(f64),
}

impl Value {
    /// Returns `true` if no value is configured.
    pub fn is_unset(&self) -> bool {
        matches!(self, Value::Unset)
    }

    /// The numeric payload, if any.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Unset => None,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<Option<f64>> for Value {
    fn from(n: Option<f64>) -> Self {
        n.map_or(Value::Unset, Value::Number)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unset => f.write_str("unset"),
            Value::Number(n) => write!(f, "{n}"),
        }
    }
}
