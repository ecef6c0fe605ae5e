//! Node descriptors
//!
//! A descriptor is the static metadata of a node type: its identifier,
//! label, port layout and default settings. Factories hand it to the
//! registry, and the workflow uses its port layout when a node is created.

use serde::{Deserialize, Serialize};

use crate::types::{PortDefinition, PortType};

/// Category for grouping node types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    /// Produces data without inputs
    Source,
    /// Transforms input data
    Transform,
    /// Flow control and utilities
    Control,
    /// Nodes used to exercise the engine in tests
    Testing,
    /// Stand-in for a node type that cannot be instantiated
    Placeholder,
}

/// Complete metadata for a node type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    /// Unique type identifier (e.g., "math")
    pub node_type: String,
    /// Category for grouping
    pub category: NodeCategory,
    /// Human-readable label
    pub label: String,
    /// Description of what the node does
    pub description: String,
    /// Input port definitions
    pub inputs: Vec<PortDefinition>,
    /// Output port definitions
    pub outputs: Vec<PortDefinition>,
    /// Settings a freshly created node starts with
    #[serde(default)]
    pub default_settings: serde_json::Value,
}

impl NodeDescriptor {
    /// Create a descriptor without ports
    pub fn new(
        node_type: impl Into<String>,
        category: NodeCategory,
        label: impl Into<String>,
    ) -> Self {
        Self {
            node_type: node_type.into(),
            category,
            label: label.into(),
            description: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            default_settings: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Append a required input port
    pub fn with_input(mut self, name: impl Into<String>, port_type: PortType) -> Self {
        self.inputs.push(PortDefinition::required(name, port_type));
        self
    }

    /// Append an optional input port
    pub fn with_optional_input(mut self, name: impl Into<String>, port_type: PortType) -> Self {
        self.inputs.push(PortDefinition::optional(name, port_type));
        self
    }

    /// Append an output port
    pub fn with_output(mut self, name: impl Into<String>, port_type: PortType) -> Self {
        self.outputs.push(PortDefinition::optional(name, port_type));
        self
    }

    pub fn with_default_settings(mut self, settings: serde_json::Value) -> Self {
        self.default_settings = settings;
        self
    }
}
