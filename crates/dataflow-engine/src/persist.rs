//! Saving and loading projects
//!
//! A project is written as one JSON document describing the container
//! tree: kinds, names, boundary ports, leaf types and settings, the saved
//! state with output specs and values, model internals and connections.
//!
//! Loading never gives up on a readable snapshot. Problems inside the tree
//! become diagnostics: node types that cannot be created are replaced by
//! placeholders, broken connections are dropped, and executed nodes whose
//! inputs did not survive are reset. Only an unreadable file, malformed
//! JSON or an unsupported format version fail the load.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::connection::Connection;
use crate::constants::snapshot::{FILE_NAME, FORMAT_VERSION};
use crate::container::{NativeNode, NodeContainer};
use crate::error::{EngineError, Result};
use crate::state::NodeState;
use crate::types::{NodeId, NodeMessage, PortDefinition, PortSpec, PortValue};
use crate::validation::{accepted_connections, validate_project, ValidationError};
use crate::values::ExternalValue;
use crate::workflow::{native_from, EngineShared, ProjectContext, WorkflowKind, WorkflowManager};

/// A saved project
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    pub format_version: u32,
    pub instance_id: Uuid,
    #[serde(default)]
    pub external_values: BTreeMap<String, ExternalValue>,
    pub workflow: WorkflowSnapshot,
}

/// A saved workflow level
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSnapshot {
    pub name: String,
    pub kind: WorkflowKind,
    #[serde(default)]
    pub inputs: Vec<PortDefinition>,
    #[serde(default)]
    pub outputs: Vec<PortDefinition>,
    #[serde(default)]
    pub nodes: Vec<NodeSnapshot>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

/// A saved child of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub index: u32,
    pub name: String,
    pub content: NodeContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "container", rename_all = "snake_case")]
pub enum NodeContent {
    Native(NativeSnapshot),
    Workflow(WorkflowSnapshot),
}

/// A saved leaf
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeSnapshot {
    pub node_type: String,
    #[serde(default)]
    pub settings: serde_json::Value,
    /// Port layout at save time, used if the type cannot be created on load
    #[serde(default)]
    pub inputs: Vec<PortDefinition>,
    #[serde(default)]
    pub outputs: Vec<PortDefinition>,
    pub state: SavedState,
    #[serde(default)]
    pub message: Option<NodeMessage>,
    #[serde(default)]
    pub output_specs: Vec<Option<PortSpec>>,
    #[serde(default)]
    pub output_values: Vec<Option<PortValue>>,
    #[serde(default)]
    pub internals: Option<serde_json::Value>,
}

/// Lifecycle state as persisted
///
/// Marked, queued and executing nodes are saved as configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SavedState {
    Idle,
    Configured,
    Executed,
}

impl From<NodeState> for SavedState {
    fn from(state: NodeState) -> Self {
        match state {
            NodeState::Executed => SavedState::Executed,
            NodeState::Idle | NodeState::UnconfiguredMarked => SavedState::Idle,
            NodeState::Configured
            | NodeState::ConfiguredMarked
            | NodeState::Queued
            | NodeState::Executing => SavedState::Configured,
        }
    }
}

/// Overall outcome of a load
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Ok,
    Warning,
    Error,
}

/// One load diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadMessage {
    pub status: LoadStatus,
    /// Node or workflow the diagnostic is about
    pub node_id: Option<NodeId>,
    pub message: String,
}

impl LoadMessage {
    pub fn new(status: LoadStatus, node_id: Option<NodeId>, message: impl Into<String>) -> Self {
        Self {
            status,
            node_id,
            message: message.into(),
        }
    }
}

impl fmt::Display for LoadMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            Some(id) => write!(f, "[{:?}] {}: {}", self.status, id, self.message),
            None => write!(f, "[{:?}] {}", self.status, self.message),
        }
    }
}

/// A loaded project with its diagnostics
pub struct LoadResult {
    pub project: Arc<WorkflowManager>,
    /// `Ok` or `Warning`; error-level problems fail the load instead
    pub status: LoadStatus,
    pub diagnostics: Vec<LoadMessage>,
}

impl LoadResult {
    pub fn warnings(&self) -> impl Iterator<Item = &LoadMessage> {
        self.diagnostics.iter().filter(|d| d.status == LoadStatus::Warning)
    }
}

impl fmt::Debug for LoadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadResult")
            .field("project", self.project.id())
            .field("status", &self.status)
            .field("diagnostics", &self.diagnostics)
            .finish()
    }
}

/// Snapshot file for `path`: the path itself, or the default file in a directory
pub fn snapshot_file(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(FILE_NAME)
    } else {
        path.to_path_buf()
    }
}

// ---- saving ------------------------------------------------------------

impl WorkflowManager {
    /// Snapshot of this workflow and everything below it
    ///
    /// Taken under the lock chain, so it never observes a half-applied
    /// edit or completion.
    pub fn to_snapshot(&self) -> WorkflowSnapshot {
        self.with_lock(|| self.snapshot_level())
    }

    /// Snapshot of the project this workflow belongs to
    pub fn to_project_snapshot(self: &Arc<Self>) -> ProjectSnapshot {
        let root = self.project_root();
        root.with_lock(|| ProjectSnapshot {
            format_version: FORMAT_VERSION,
            instance_id: root.instance_id(),
            external_values: root.external_values().snapshot(),
            workflow: root.snapshot_level(),
        })
    }

    /// Write the enclosing project to `path` (a file or a directory)
    ///
    /// The lock is held while serializing and writing, so concurrent
    /// edits and completions wait for the save.
    pub fn save(self: &Arc<Self>, path: &Path) -> Result<PathBuf> {
        let root = self.project_root();
        let file = snapshot_file(path);
        root.with_lock(|| -> Result<()> {
            let snapshot = root.to_project_snapshot();
            let json = serde_json::to_string_pretty(&snapshot)?;
            if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| EngineError::Persistence(format!("{}: {}", parent.display(), e)))?;
            }
            std::fs::write(&file, json)
                .map_err(|e| EngineError::Persistence(format!("{}: {}", file.display(), e)))
        })?;
        log::info!("Saved project {} to {}", root.id(), file.display());
        Ok(file)
    }

    fn project_root(self: &Arc<Self>) -> Arc<WorkflowManager> {
        let mut current = Arc::clone(self);
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    fn snapshot_level(&self) -> WorkflowSnapshot {
        let mut nested = Vec::new();
        let (name, inputs, outputs, mut nodes, connections) = self.read(|s| {
            let mut nodes = Vec::new();
            for (index, child) in &s.children {
                match child {
                    NodeContainer::Native(node) => nodes.push(NodeSnapshot {
                        index: *index,
                        name: node.name.clone(),
                        content: NodeContent::Native(native_snapshot(node)),
                    }),
                    NodeContainer::Workflow(wfm) => nested.push((*index, Arc::clone(wfm))),
                }
            }
            (
                s.name.clone(),
                s.inputs.clone(),
                s.outputs.clone(),
                nodes,
                s.graph.iter().copied().collect::<Vec<_>>(),
            )
        });
        for (index, wfm) in nested {
            let snapshot = wfm.snapshot_level();
            nodes.push(NodeSnapshot {
                index,
                name: snapshot.name.clone(),
                content: NodeContent::Workflow(snapshot),
            });
        }
        nodes.sort_by_key(|n| n.index);
        WorkflowSnapshot {
            name,
            kind: self.kind(),
            inputs,
            outputs,
            nodes,
            connections,
        }
    }
}

fn native_snapshot(node: &NativeNode) -> NativeSnapshot {
    let state = SavedState::from(node.state);
    let executed = state == SavedState::Executed;
    NativeSnapshot {
        node_type: node.node_type.clone(),
        settings: node.settings.clone(),
        inputs: node.inputs.clone(),
        outputs: node.outputs.clone(),
        state,
        message: node.message.clone().filter(|_| executed),
        output_specs: if state == SavedState::Idle {
            Vec::new()
        } else {
            node.output_specs.clone()
        },
        output_values: if executed { node.output_values.clone() } else { Vec::new() },
        internals: if executed { node.model.save_internals() } else { None },
    }
}

// ---- loading -----------------------------------------------------------

/// Read and open a snapshot file
pub(crate) fn load_file(engine: &Arc<EngineShared>, id: NodeId, path: &Path) -> Result<LoadResult> {
    let file = snapshot_file(path);
    let text = std::fs::read_to_string(&file).map_err(|e| {
        load_error(format!("Cannot read {}: {}", file.display(), e))
    })?;
    let snapshot: ProjectSnapshot = serde_json::from_str(&text)
        .map_err(|e| load_error(format!("Malformed snapshot {}: {}", file.display(), e)))?;
    let result = open_snapshot(engine, id, snapshot)?;
    log::info!(
        "Loaded project {} from {} ({:?}, {} diagnostic(s))",
        result.project.id(),
        file.display(),
        result.status,
        result.diagnostics.len()
    );
    Ok(result)
}

fn load_error(message: String) -> EngineError {
    EngineError::Load {
        diagnostics: vec![LoadMessage::new(LoadStatus::Error, None, message)],
    }
}

/// Build a live project from a snapshot
pub(crate) fn open_snapshot(
    engine: &Arc<EngineShared>,
    id: NodeId,
    snapshot: ProjectSnapshot,
) -> Result<LoadResult> {
    let fatal: Vec<LoadMessage> = validate_project(&snapshot)
        .into_iter()
        .filter(|issue| issue.status() == LoadStatus::Error)
        .map(|issue| LoadMessage::new(issue.status(), None, issue.to_string()))
        .collect();
    if !fatal.is_empty() {
        return Err(EngineError::Load { diagnostics: fatal });
    }

    let ProjectSnapshot {
        instance_id,
        external_values,
        workflow,
        ..
    } = snapshot;
    let context = Arc::new(ProjectContext::new(Arc::clone(engine), instance_id));
    context.values.restore(external_values);
    let project = WorkflowManager::new_project(id, workflow.name.clone(), context);

    let mut loader = Loader {
        engine,
        diagnostics: Vec::new(),
    };
    project.with_lock(|| {
        loader.fill(&project, &workflow);
        for id in project.reset_inconsistent_leaves() {
            loader.warn(
                Some(id),
                "Node was saved as executed but its inputs were not; reset",
            );
        }
        project.configure_all();
    });

    let diagnostics = loader.diagnostics;
    for diagnostic in &diagnostics {
        log::warn!("{}", diagnostic);
    }
    let status = diagnostics
        .iter()
        .map(|d| d.status)
        .max()
        .unwrap_or(LoadStatus::Ok);
    Ok(LoadResult {
        project,
        status,
        diagnostics,
    })
}

struct Loader<'a> {
    engine: &'a Arc<EngineShared>,
    diagnostics: Vec<LoadMessage>,
}

impl Loader<'_> {
    fn warn(&mut self, node_id: Option<NodeId>, message: impl Into<String>) {
        self.diagnostics
            .push(LoadMessage::new(LoadStatus::Warning, node_id, message));
    }

    /// Populate `wfm` from one snapshot level; callers hold the lock chain
    fn fill(&mut self, wfm: &Arc<WorkflowManager>, snapshot: &WorkflowSnapshot) {
        let mut seen = HashSet::new();
        for node in &snapshot.nodes {
            if !seen.insert(node.index) {
                let issue = ValidationError::DuplicateNodeIndex {
                    workflow: snapshot.name.clone(),
                    index: node.index,
                };
                self.warn(Some(wfm.id().clone()), issue.to_string());
                continue;
            }
            match &node.content {
                NodeContent::Native(native) => self.load_native(wfm, node, native),
                NodeContent::Workflow(nested) => {
                    let kind = match nested.kind {
                        WorkflowKind::Project => {
                            self.warn(
                                Some(wfm.id().child(node.index)),
                                "Nested project loaded as a metanode",
                            );
                            WorkflowKind::Metanode
                        }
                        kind => kind,
                    };
                    let child = wfm.new_child(
                        node.index,
                        kind,
                        node.name.clone(),
                        nested.inputs.clone(),
                        nested.outputs.clone(),
                    );
                    wfm.insert_child(node.index, NodeContainer::Workflow(Arc::clone(&child)));
                    self.fill(&child, nested);
                }
            }
        }

        let mut issues = Vec::new();
        for connection in accepted_connections(snapshot, &mut issues) {
            let added = wfm.validate_connection(&connection).and_then(|()| {
                wfm.write(|s| s.graph.add(connection))
                    .map_err(|e| EngineError::InvalidConnection(e.to_string()))
            });
            if let Err(err) = added {
                self.warn(
                    Some(wfm.id().clone()),
                    format!("Connection {} dropped: {}", connection, err),
                );
            }
        }
        for issue in issues {
            self.warn(Some(wfm.id().clone()), issue.to_string());
        }
    }

    fn load_native(&mut self, wfm: &Arc<WorkflowManager>, node: &NodeSnapshot, native: &NativeSnapshot) {
        let id = wfm.id().child(node.index);
        let created = self.engine.registry.instantiate_or_placeholder(
            &native.node_type,
            self.engine.filter.as_ref(),
            native.inputs.clone(),
            native.outputs.clone(),
        );
        if let Some(reason) = &created.placeholder {
            self.warn(Some(id.clone()), format!("{}; placeholder inserted", reason));
        }
        let settings = (!native.settings.is_null()).then(|| native.settings.clone());
        let mut leaf = native_from(&native.node_type, created, settings);
        leaf.name = node.name.clone();

        if native.state == SavedState::Executed && !leaf.placeholder {
            if let Err(reason) = restore_executed(&mut leaf, native) {
                self.warn(Some(id), format!("{}; node reset", reason));
            }
        }
        wfm.insert_child(node.index, NodeContainer::Native(leaf));
    }
}

/// Put a leaf back into its executed state
///
/// Runs the model's `load_internals` while the project lock is held.
fn restore_executed(leaf: &mut NativeNode, saved: &NativeSnapshot) -> std::result::Result<(), String> {
    let count = leaf.outputs.len();
    if saved.output_values.len() != count || saved.output_values.iter().any(Option::is_none) {
        return Err("Saved output values do not match the node's outputs".to_string());
    }
    if let Some(internals) = &saved.internals {
        leaf.model
            .load_internals(internals)
            .map_err(|e| format!("Could not restore internal state: {}", e.user_message()))?;
    }
    let mut specs = saved.output_specs.clone();
    specs.resize(count, None);
    leaf.output_specs = specs;
    leaf.output_values = saved.output_values.clone();
    leaf.message = saved.message.clone();
    leaf.state = NodeState::Executed;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saved_state_collapses_transient_states() {
        assert_eq!(SavedState::from(NodeState::Executing), SavedState::Configured);
        assert_eq!(SavedState::from(NodeState::Queued), SavedState::Configured);
        assert_eq!(SavedState::from(NodeState::UnconfiguredMarked), SavedState::Idle);
        assert_eq!(SavedState::from(NodeState::Executed), SavedState::Executed);
    }

    #[test]
    fn test_load_status_ordering() {
        assert!(LoadStatus::Ok < LoadStatus::Warning);
        assert!(LoadStatus::Warning < LoadStatus::Error);
    }

    #[test]
    fn test_snapshot_json_shape() {
        let snapshot = crate::builder::WorkflowBuilder::new("wf")
            .add_node(1, "constant")
            .build_project();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["formatVersion"], FORMAT_VERSION);
        assert_eq!(json["workflow"]["kind"], "project");
        assert_eq!(json["workflow"]["nodes"][0]["content"]["container"], "native");
        assert_eq!(json["workflow"]["nodes"][0]["content"]["nodeType"], "constant");

        let back: ProjectSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back.instance_id, snapshot.instance_id);
    }

    #[test]
    fn test_snapshot_file_for_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(snapshot_file(dir.path()), dir.path().join(FILE_NAME));
        let file = dir.path().join("custom.json");
        assert_eq!(snapshot_file(&file), file);
    }
}
