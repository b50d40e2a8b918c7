//! Node Configuration
//!
//! Nodes are created with an optional string-keyed mapping supplied by the
//! graph owner. Parsing of whatever declarative source produced the mapping
//! is the owner's business; this module only interprets the keys a node type
//! recognizes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{GraphError, Result};

/// Key holding the initial value of a leaf node.
pub const VALUE_KEY: &str = "value";

/// Construction-time configuration for a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeConfig {
    entries: Map<String, JsonValue>,
}

impl NodeConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Raw lookup.
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.entries.get(key)
    }

    /// Read a numeric key.
    ///
    /// Absent keys and explicit `null` yield `Ok(None)`. Any other
    /// non-numeric value is an [`GraphError::InvalidConfig`].
    pub fn number(&self, key: &str) -> Result<Option<f64>> {
        match self.entries.get(key) {
            None | Some(JsonValue::Null) => Ok(None),
            Some(JsonValue::Number(n)) => n.as_f64().map(Some).ok_or_else(|| {
                GraphError::InvalidConfig {
                    key: key.to_owned(),
                    reason: format!("{n} is not representable as f64"),
                }
            }),
            Some(other) => Err(GraphError::InvalidConfig {
                key: key.to_owned(),
                reason: format!("expected a number, got {other}"),
            }),
        }
    }

    /// The initial value for a leaf node, if configured.
    pub fn initial_value(&self) -> Result<Option<f64>> {
        self.number(VALUE_KEY)
    }
}

impl From<Map<String, JsonValue>> for NodeConfig {
    fn from(entries: Map<String, JsonValue>) -> Self {
        Self { entries }
    }
}
