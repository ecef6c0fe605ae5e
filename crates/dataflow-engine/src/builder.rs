//! Fluent builder for workflow snapshots
//!
//! Builds the same structure the persistence layer writes, so a workflow
//! can be assembled in code and opened through the normal load path.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::connection::{Connection, PortHost};
use crate::constants::snapshot::FORMAT_VERSION;
use crate::persist::{NativeSnapshot, NodeContent, NodeSnapshot, ProjectSnapshot, SavedState, WorkflowSnapshot};
use crate::types::{PortDefinition, PortType};
use crate::values::ExternalValue;
use crate::workflow::WorkflowKind;

/// Fluent builder for workflow snapshots
///
/// # Example
///
/// ```ignore
/// let snapshot = WorkflowBuilder::new("pipeline")
///     .add_node(1, "constant")
///     .with_settings(serde_json::json!({"value": 2}))
///     .add_node(2, "math")
///     .connect(1, 0, 2, 0)
///     .build_project();
/// ```
pub struct WorkflowBuilder {
    name: String,
    kind: WorkflowKind,
    inputs: Vec<PortDefinition>,
    outputs: Vec<PortDefinition>,
    nodes: Vec<NodeSnapshot>,
    connections: Vec<Connection>,
    values: BTreeMap<String, ExternalValue>,
}

impl WorkflowBuilder {
    /// Start a top-level workflow
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_kind(name, WorkflowKind::Project)
    }

    /// Start a metanode
    pub fn metanode(name: impl Into<String>) -> Self {
        Self::with_kind(name, WorkflowKind::Metanode)
    }

    /// Start a component
    pub fn component(name: impl Into<String>) -> Self {
        Self::with_kind(name, WorkflowKind::Component)
    }

    fn with_kind(name: impl Into<String>, kind: WorkflowKind) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            nodes: Vec::new(),
            connections: Vec::new(),
            values: BTreeMap::new(),
        }
    }

    /// Add a boundary input port
    pub fn with_input(mut self, name: impl Into<String>, port_type: PortType) -> Self {
        self.inputs.push(PortDefinition::required(name, port_type));
        self
    }

    /// Add a boundary output port
    pub fn with_output(mut self, name: impl Into<String>, port_type: PortType) -> Self {
        self.outputs.push(PortDefinition::required(name, port_type));
        self
    }

    /// Add a leaf node at `index`
    ///
    /// Settings default to the node type's defaults when the project opens.
    pub fn add_node(mut self, index: u32, node_type: impl Into<String>) -> Self {
        let node_type = node_type.into();
        self.nodes.push(NodeSnapshot {
            index,
            name: node_type.clone(),
            content: NodeContent::Native(NativeSnapshot {
                node_type,
                settings: serde_json::Value::Null,
                inputs: Vec::new(),
                outputs: Vec::new(),
                state: SavedState::Idle,
                message: None,
                output_specs: Vec::new(),
                output_values: Vec::new(),
                internals: None,
            }),
        });
        self
    }

    /// Set settings on the most recently added leaf
    ///
    /// Must be called immediately after `add_node`.
    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        if let Some(NodeContent::Native(native)) = self.nodes.last_mut().map(|n| &mut n.content) {
            native.settings = settings;
        }
        self
    }

    /// Record the port layout of the most recently added leaf
    ///
    /// Only used when the node type cannot be instantiated on load.
    pub fn with_ports(mut self, inputs: Vec<PortDefinition>, outputs: Vec<PortDefinition>) -> Self {
        if let Some(NodeContent::Native(native)) = self.nodes.last_mut().map(|n| &mut n.content) {
            native.inputs = inputs;
            native.outputs = outputs;
        }
        self
    }

    /// Rename the most recently added node
    pub fn named(mut self, name: impl Into<String>) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.name = name.into();
        }
        self
    }

    /// Nest a metanode or component at `index`
    pub fn add_workflow(mut self, index: u32, workflow: WorkflowSnapshot) -> Self {
        self.nodes.push(NodeSnapshot {
            index,
            name: workflow.name.clone(),
            content: NodeContent::Workflow(workflow),
        });
        self
    }

    /// Connect two children
    pub fn connect(mut self, source: u32, source_port: usize, dest: u32, dest_port: usize) -> Self {
        self.connections
            .push(Connection::between(source, source_port, dest, dest_port));
        self
    }

    /// Connect boundary input `port` to a child
    pub fn connect_input(mut self, port: usize, dest: u32, dest_port: usize) -> Self {
        self.connections.push(Connection::new(
            PortHost::Boundary,
            port,
            PortHost::Node(dest),
            dest_port,
        ));
        self
    }

    /// Connect a child to boundary output `port`
    pub fn connect_output(mut self, source: u32, source_port: usize, port: usize) -> Self {
        self.connections.push(Connection::new(
            PortHost::Node(source),
            source_port,
            PortHost::Boundary,
            port,
        ));
        self
    }

    /// Set an external value stored with the project
    pub fn with_value(mut self, name: impl Into<String>, value: ExternalValue) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Build the workflow snapshot without validation
    pub fn build(self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            name: self.name,
            kind: self.kind,
            inputs: self.inputs,
            outputs: self.outputs,
            nodes: self.nodes,
            connections: self.connections,
        }
    }

    /// Build a project snapshot with a fresh instance id
    pub fn build_project(mut self) -> ProjectSnapshot {
        let values = std::mem::take(&mut self.values);
        ProjectSnapshot {
            format_version: FORMAT_VERSION,
            instance_id: Uuid::new_v4(),
            external_values: values,
            workflow: self.build(),
        }
    }
}
