//! Container variants
//!
//! Every child of a workflow is either a leaf node holding a model or a
//! nested workflow (metanode or component). Workflows dispatch on
//! [`NodeContainer`] instead of sharing a class hierarchy.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::model::NodeModel;
use crate::state::NodeState;
use crate::types::{NodeId, NodeMessage, PortDefinition, PortSpec, PortValue};
use crate::workflow::{WorkflowKind, WorkflowManager};

/// Externally visible variant of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    /// Leaf node backed by a model
    Native,
    /// Nested workflow whose outputs are resolved port by port
    Metanode,
    /// Encapsulated workflow whose outputs appear all at once
    Component,
    /// Top-level workflow owned by the engine
    Project,
}

impl From<WorkflowKind> for ContainerKind {
    fn from(kind: WorkflowKind) -> Self {
        match kind {
            WorkflowKind::Project => ContainerKind::Project,
            WorkflowKind::Metanode => ContainerKind::Metanode,
            WorkflowKind::Component => ContainerKind::Component,
        }
    }
}

/// Read-only view of one container
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub id: NodeId,
    pub name: String,
    pub kind: ContainerKind,
    /// Model type for leaf nodes
    pub node_type: Option<String>,
    pub state: NodeState,
    pub message: Option<NodeMessage>,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
    /// Whether the leaf is an inert placeholder
    pub placeholder: bool,
}

/// Handle on a queued or running unit of work
#[derive(Clone)]
pub(crate) struct Job {
    pub id: u64,
    pub cancel: CancellationToken,
}

/// Leaf node state owned by its workflow
pub(crate) struct NativeNode {
    pub node_type: String,
    pub name: String,
    pub model: Arc<dyn NodeModel>,
    pub settings: serde_json::Value,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
    pub state: NodeState,
    pub message: Option<NodeMessage>,
    pub output_specs: Vec<Option<PortSpec>>,
    pub output_values: Vec<Option<PortValue>>,
    pub job: Option<Job>,
    pub placeholder: bool,
}

impl NativeNode {
    pub fn new(
        node_type: String,
        name: String,
        model: Arc<dyn NodeModel>,
        settings: serde_json::Value,
        inputs: Vec<PortDefinition>,
        outputs: Vec<PortDefinition>,
    ) -> Self {
        let output_count = outputs.len();
        Self {
            node_type,
            name,
            model,
            settings,
            inputs,
            outputs,
            state: NodeState::Idle,
            message: None,
            output_specs: vec![None; output_count],
            output_values: vec![None; output_count],
            job: None,
            placeholder: false,
        }
    }

    /// Move to `next`, logging transitions outside the lifecycle graph
    pub fn set_state(&mut self, id: &NodeId, next: NodeState) {
        if !self.state.can_transition_to(next) {
            log::warn!("Node {}: unexpected transition {} -> {}", id, self.state, next);
        }
        if self.state != next {
            log::debug!("Node {}: {} -> {}", id, self.state, next);
        }
        self.state = next;
    }

    /// Drop specs and values
    pub fn clear_outputs(&mut self) {
        let count = self.outputs.len();
        self.output_specs = vec![None; count];
        self.output_values = vec![None; count];
    }

    /// Drop values but keep the configured specs
    pub fn clear_values(&mut self) {
        self.output_values = vec![None; self.outputs.len()];
    }

    pub fn info(&self, id: NodeId) -> NodeInfo {
        NodeInfo {
            id,
            name: self.name.clone(),
            kind: ContainerKind::Native,
            node_type: Some(self.node_type.clone()),
            state: self.state,
            message: self.message.clone(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            placeholder: self.placeholder,
        }
    }
}

/// A direct child of a workflow
pub(crate) enum NodeContainer {
    Native(NativeNode),
    Workflow(Arc<WorkflowManager>),
}

impl NodeContainer {
    pub fn as_native(&self) -> Option<&NativeNode> {
        match self {
            NodeContainer::Native(node) => Some(node),
            NodeContainer::Workflow(_) => None,
        }
    }

    pub fn as_native_mut(&mut self) -> Option<&mut NativeNode> {
        match self {
            NodeContainer::Native(node) => Some(node),
            NodeContainer::Workflow(_) => None,
        }
    }

    pub fn as_workflow(&self) -> Option<&Arc<WorkflowManager>> {
        match self {
            NodeContainer::Native(_) => None,
            NodeContainer::Workflow(wfm) => Some(wfm),
        }
    }
}
