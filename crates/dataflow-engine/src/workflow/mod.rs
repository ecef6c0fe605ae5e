//! Workflow containers
//!
//! A [`WorkflowManager`] owns the direct children of one containment level
//! (leaf nodes and nested workflows), the connections among them and its
//! boundary ports. Projects, metanodes and components are all workflow
//! managers distinguished by [`WorkflowKind`].
//!
//! # Locking
//!
//! Each workflow has one re-entrant lock. Every mutating operation takes
//! the locks of all ancestors from the project root down to the target
//! before touching anything ([`WorkflowManager::with_lock`]), so two
//! threads always acquire locks in the same order. Read-only queries only
//! take the lock of the workflow they read.
//!
//! State changes are buffered while the locks are held. When the outermost
//! locked section of a project ends, the buffered leaf events and any
//! changed aggregate workflow states are handed to the event dispatcher
//! and the execution monitor is notified.

mod edit;
mod flat;
mod ports;
mod propagation;
mod scheduler;

pub use edit::ReplaceNodeResult;
pub use ports::{PortChange, PortDescriptor};

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::connection::{Connection, ConnectionGraph, PortHost};
use crate::constants::messages;
use crate::container::{ContainerKind, NativeNode, NodeContainer, NodeInfo};
use crate::error::{EngineError, Result};
use crate::events::{EventDispatcher, ListenerId, NodeStateEvent, NodeStateListener};
use crate::monitor::ExecutionMonitor;
use crate::pool::WorkerPool;
use crate::registry::{NodeRegistry, NodeTypeFilter};
use crate::state::{aggregate_state, NodeState};
use crate::types::{MessageKind, NodeId, NodeMessage, PortDefinition, PortSpec, PortValue};
use crate::values::ExternalValues;

pub(crate) use edit::native_from;

/// Variant of a workflow container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    /// Top-level workflow owned by the engine
    Project,
    /// Nested workflow; outputs resolve port by port
    Metanode,
    /// Encapsulated workflow; outputs appear once every inner node executed
    Component,
}

/// Engine-wide collaborators shared by every project
pub(crate) struct EngineShared {
    pub registry: Arc<NodeRegistry>,
    pub filter: Arc<dyn NodeTypeFilter>,
    pub pool: WorkerPool,
    pub dispatcher: EventDispatcher,
}

/// Per-project state shared by every workflow in the project
pub(crate) struct ProjectContext {
    pub engine: Arc<EngineShared>,
    pub values: Arc<ExternalValues>,
    pub monitor: ExecutionMonitor,
    pub instance_id: Uuid,
    pending: Mutex<Vec<NodeStateEvent>>,
    next_job: AtomicU64,
}

impl ProjectContext {
    pub fn new(engine: Arc<EngineShared>, instance_id: Uuid) -> Self {
        Self {
            engine,
            values: Arc::new(ExternalValues::new()),
            monitor: ExecutionMonitor::new(),
            instance_id,
            pending: Mutex::new(Vec::new()),
            next_job: AtomicU64::new(1),
        }
    }

    pub fn next_job_id(&self) -> u64 {
        self.next_job.fetch_add(1, Ordering::Relaxed)
    }

    fn push_event(&self, event: NodeStateEvent) {
        self.pending.lock().push(event);
    }
}

/// Mutable contents of a workflow, guarded by its lock
pub(crate) struct WorkflowState {
    pub name: String,
    pub children: BTreeMap<u32, NodeContainer>,
    pub next_index: u32,
    pub graph: ConnectionGraph,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
}

impl WorkflowState {
    fn new(name: String, inputs: Vec<PortDefinition>, outputs: Vec<PortDefinition>) -> Self {
        Self {
            name,
            children: BTreeMap::new(),
            next_index: 1,
            graph: ConnectionGraph::new(),
            inputs,
            outputs,
        }
    }

    pub fn allocate_index(&mut self) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    /// Input and output port definitions of a child
    pub fn child_ports(&self, index: u32) -> Option<(Vec<PortDefinition>, Vec<PortDefinition>)> {
        match self.children.get(&index)? {
            NodeContainer::Native(node) => Some((node.inputs.clone(), node.outputs.clone())),
            // Nested workflows are read through their own lock
            NodeContainer::Workflow(_) => None,
        }
    }

    /// Local children upstream of the output bar, `None` if no output is fed
    fn upstream_of_outputs(&self) -> Option<BTreeSet<u32>> {
        let feeding = self.graph.incoming_all(PortHost::Boundary);
        if feeding.is_empty() {
            return None;
        }
        let mut upstream = BTreeSet::new();
        let mut queue: VecDeque<u32> = feeding.iter().filter_map(|c| c.source.node_index()).collect();
        while let Some(index) = queue.pop_front() {
            if upstream.insert(index) {
                queue.extend(self.graph.predecessors(index));
            }
        }
        Some(upstream)
    }
}

/// A project, metanode or component
pub struct WorkflowManager {
    id: NodeId,
    kind: WorkflowKind,
    parent: Weak<WorkflowManager>,
    project: Arc<ProjectContext>,
    inner: ReentrantMutex<RefCell<WorkflowState>>,
    /// Nesting depth of locked sections; only used on the project root
    lock_depth: AtomicUsize,
    /// Last aggregate state and message handed to listeners
    reported: Mutex<Option<(NodeState, Option<NodeMessage>)>>,
}

/// Flushes buffered events when the outermost locked section ends
struct LockedSection<'a> {
    root: &'a WorkflowManager,
}

impl<'a> LockedSection<'a> {
    fn enter(root: &'a WorkflowManager) -> Self {
        root.lock_depth.fetch_add(1, Ordering::SeqCst);
        Self { root }
    }
}

impl Drop for LockedSection<'_> {
    fn drop(&mut self) {
        if self.root.lock_depth.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.root.flush_events();
        }
    }
}

impl WorkflowManager {
    pub(crate) fn new_project(id: NodeId, name: impl Into<String>, project: Arc<ProjectContext>) -> Arc<Self> {
        Arc::new(Self {
            id,
            kind: WorkflowKind::Project,
            parent: Weak::new(),
            project,
            inner: ReentrantMutex::new(RefCell::new(WorkflowState::new(
                name.into(),
                Vec::new(),
                Vec::new(),
            ))),
            lock_depth: AtomicUsize::new(0),
            reported: Mutex::new(None),
        })
    }

    /// Create a nested workflow as child `index`; the caller inserts it
    pub(crate) fn new_child(
        self: &Arc<Self>,
        index: u32,
        kind: WorkflowKind,
        name: impl Into<String>,
        inputs: Vec<PortDefinition>,
        outputs: Vec<PortDefinition>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: self.id.child(index),
            kind,
            parent: Arc::downgrade(self),
            project: Arc::clone(&self.project),
            inner: ReentrantMutex::new(RefCell::new(WorkflowState::new(name.into(), inputs, outputs))),
            lock_depth: AtomicUsize::new(0),
            reported: Mutex::new(None),
        })
    }

    // ---- locking -------------------------------------------------------

    /// Ancestors from the project root down to the parent
    fn ancestors(&self) -> Vec<Arc<WorkflowManager>> {
        let mut chain = Vec::new();
        let mut current = self.parent.upgrade();
        while let Some(wfm) = current {
            current = wfm.parent.upgrade();
            chain.push(wfm);
        }
        chain.reverse();
        chain
    }

    /// Run `f` holding the locks from the project root down to `self`
    pub(crate) fn with_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let chain = self.ancestors();
        let _chain_guards: Vec<_> = chain.iter().map(|wfm| wfm.inner.lock()).collect();
        let _guard = self.inner.lock();
        let root = chain.first().map(Arc::as_ref).unwrap_or(self);
        let _section = LockedSection::enter(root);
        f()
    }

    /// Borrow the state under this workflow's own lock
    ///
    /// `f` must not call back into any workflow.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&WorkflowState) -> R) -> R {
        let guard = self.inner.lock();
        let state = guard.borrow();
        f(&state)
    }

    /// Mutably borrow the state; callers hold the lock chain
    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut WorkflowState) -> R) -> R {
        let guard = self.inner.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    fn flush_events(&self) {
        let mut events = std::mem::take(&mut *self.project.pending.lock());
        self.collect_aggregate_events(&mut events);
        if !events.is_empty() {
            self.project.engine.dispatcher.publish(events);
        }
        self.project.monitor.notify();
    }

    fn collect_aggregate_events(&self, events: &mut Vec<NodeStateEvent>) {
        let current = self.aggregate();
        {
            let mut reported = self.reported.lock();
            if reported.as_ref() != Some(&current) {
                events.push(NodeStateEvent::new(self.id.clone(), current.0, current.1.clone()));
                *reported = Some(current);
            }
        }
        for child in self.child_workflows() {
            child.collect_aggregate_events(events);
        }
    }

    // ---- leaf access ---------------------------------------------------

    pub(crate) fn with_native<R>(&self, index: u32, f: impl FnOnce(&NativeNode) -> R) -> Option<R> {
        self.read(|s| s.children.get(&index).and_then(NodeContainer::as_native).map(f))
    }

    /// Mutate a leaf, recording an event if its state or message changed
    pub(crate) fn update_leaf<R>(
        &self,
        index: u32,
        f: impl FnOnce(&NodeId, &mut NativeNode) -> R,
    ) -> Option<R> {
        let id = self.id.child(index);
        let (result, event) = self.write(|s| {
            let node = s.children.get_mut(&index)?.as_native_mut()?;
            let before = (node.state, node.message.clone());
            let result = f(&id, node);
            let event = if before.0 != node.state || before.1 != node.message {
                Some(NodeStateEvent::new(id.clone(), node.state, node.message.clone()))
            } else {
                None
            };
            Some((result, event))
        })?;
        if let Some(event) = event {
            self.project.push_event(event);
        }
        Some(result)
    }

    pub(crate) fn child_workflow(&self, index: u32) -> Option<Arc<WorkflowManager>> {
        self.read(|s| s.children.get(&index).and_then(NodeContainer::as_workflow).cloned())
    }

    fn child_workflows(&self) -> Vec<Arc<WorkflowManager>> {
        self.read(|s| {
            s.children
                .values()
                .filter_map(NodeContainer::as_workflow)
                .cloned()
                .collect()
        })
    }

    /// Port definitions of child `index`, whatever its variant
    pub(crate) fn ports_of(&self, index: u32) -> Option<(Vec<PortDefinition>, Vec<PortDefinition>)> {
        if let Some(child) = self.child_workflow(index) {
            return Some(child.read(|s| (s.inputs.clone(), s.outputs.clone())));
        }
        self.read(|s| s.child_ports(index))
    }

    pub(crate) fn project_context(&self) -> &Arc<ProjectContext> {
        &self.project
    }

    // ---- identity and structure ---------------------------------------

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn kind(&self) -> WorkflowKind {
        self.kind
    }

    pub fn name(&self) -> String {
        self.read(|s| s.name.clone())
    }

    /// Enclosing workflow, `None` for a project
    pub fn parent(&self) -> Option<Arc<WorkflowManager>> {
        self.parent.upgrade()
    }

    /// Identifier of this project instance, kept across save and load
    pub fn instance_id(&self) -> Uuid {
        self.project.instance_id
    }

    /// Local indices of the direct children
    pub fn node_indices(&self) -> Vec<u32> {
        self.read(|s| s.children.keys().copied().collect())
    }

    /// Ids of the direct children
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.node_indices().into_iter().map(|i| self.id.child(i)).collect()
    }

    pub fn contains(&self, index: u32) -> bool {
        self.read(|s| s.children.contains_key(&index))
    }

    pub fn input_ports(&self) -> Vec<PortDefinition> {
        self.read(|s| s.inputs.clone())
    }

    pub fn output_ports(&self) -> Vec<PortDefinition> {
        self.read(|s| s.outputs.clone())
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.read(|s| s.graph.iter().copied().collect())
    }

    /// Nested workflow at `index`
    pub fn workflow(&self, index: u32) -> Result<Arc<WorkflowManager>> {
        self.child_workflow(index)
            .ok_or_else(|| EngineError::NodeNotFound(self.id.child(index)))
    }

    /// Locate the workflow that directly contains `id`
    pub fn find(self: &Arc<Self>, id: &NodeId) -> Option<(Arc<WorkflowManager>, u32)> {
        if !id.is_descendant_of(&self.id) || id.depth() <= self.id.depth() {
            return None;
        }
        let mut current = Arc::clone(self);
        let path = &id.path()[self.id.depth()..];
        for (position, index) in path.iter().enumerate() {
            if position == path.len() - 1 {
                return current.contains(*index).then_some((current, *index));
            }
            current = current.child_workflow(*index)?;
        }
        None
    }

    // ---- queries -------------------------------------------------------

    pub fn node_info(&self, index: u32) -> Result<NodeInfo> {
        if let Some(child) = self.child_workflow(index) {
            return Ok(child.info());
        }
        self.with_native(index, |n| n.info(self.id.child(index)))
            .ok_or_else(|| EngineError::NodeNotFound(self.id.child(index)))
    }

    pub fn node_state(&self, index: u32) -> Result<NodeState> {
        Ok(self.node_info(index)?.state)
    }

    pub fn node_message(&self, index: u32) -> Result<Option<NodeMessage>> {
        Ok(self.node_info(index)?.message)
    }

    pub fn node_settings(&self, index: u32) -> Result<serde_json::Value> {
        self.with_native(index, |n| n.settings.clone())
            .ok_or_else(|| EngineError::NodeNotFound(self.id.child(index)))
    }

    /// Aggregate view of this workflow
    pub fn info(&self) -> NodeInfo {
        let (state, message) = self.aggregate();
        self.read(|s| NodeInfo {
            id: self.id.clone(),
            name: s.name.clone(),
            kind: ContainerKind::from(self.kind),
            node_type: None,
            state,
            message,
            inputs: s.inputs.clone(),
            outputs: s.outputs.clone(),
            placeholder: false,
        })
    }

    /// Aggregate state of this workflow
    pub fn state(&self) -> NodeState {
        self.aggregate().0
    }

    /// Summary of descendant diagnostics, if any
    pub fn message(&self) -> Option<NodeMessage> {
        self.aggregate().1
    }

    /// Value on output `port` of child `index`, available once it executed
    pub fn output_value(self: &Arc<Self>, index: u32, port: usize) -> Option<PortValue> {
        self.resolve_source(PortHost::Node(index), port).value()
    }

    /// Spec on output `port` of child `index`, available once configured
    pub fn output_spec(self: &Arc<Self>, index: u32, port: usize) -> Option<PortSpec> {
        self.resolve_source(PortHost::Node(index), port).spec()
    }

    /// Whether any leaf in this workflow is marked, queued or executing
    pub fn is_in_execution(&self) -> bool {
        self.leaf_states().iter().any(|(_, state, _)| state.is_in_execution())
    }

    /// Block until nothing in this workflow is in execution
    ///
    /// Returns false if `timeout` passed first.
    pub fn wait_while_in_execution(&self, timeout: Duration) -> bool {
        self.project
            .monitor
            .wait_until(timeout, || !self.is_in_execution())
    }

    /// External values of the project this workflow belongs to
    pub fn external_values(&self) -> Arc<ExternalValues> {
        Arc::clone(&self.project.values)
    }

    /// Register a listener for events of this workflow and its descendants
    pub fn add_state_listener(&self, listener: Arc<dyn NodeStateListener>) -> ListenerId {
        self.project
            .engine
            .dispatcher
            .add_listener(Some(self.id.clone()), listener)
    }

    pub fn remove_state_listener(&self, id: ListenerId) -> bool {
        self.project.engine.dispatcher.remove_listener(id)
    }

    // ---- aggregation ---------------------------------------------------

    /// `(id, state, message)` of every leaf below this workflow
    pub(crate) fn leaf_states(&self) -> Vec<(NodeId, NodeState, Option<NodeMessage>)> {
        let mut result = Vec::new();
        let mut nested = Vec::new();
        self.read(|s| {
            for (index, child) in &s.children {
                match child {
                    NodeContainer::Native(node) => {
                        result.push((self.id.child(*index), node.state, node.message.clone()))
                    }
                    NodeContainer::Workflow(wfm) => nested.push(Arc::clone(wfm)),
                }
            }
        });
        for wfm in nested {
            result.extend(wfm.leaf_states());
        }
        result
    }

    pub(crate) fn aggregate(&self) -> (NodeState, Option<NodeMessage>) {
        let relevant_children = match self.kind {
            WorkflowKind::Metanode => self.read(|s| s.upstream_of_outputs()),
            WorkflowKind::Project | WorkflowKind::Component => None,
        };

        let mut leaves = Vec::new();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for (id, state, message) in self.leaf_states() {
            let child_index = id.path()[self.id.depth()];
            let relevant = relevant_children
                .as_ref()
                .map_or(true, |set| set.contains(&child_index));
            leaves.push((state, relevant));
            if let Some(message) = message {
                match message.kind {
                    MessageKind::Error => errors.push((id, message.text)),
                    MessageKind::Warning => warnings.push((id, message.text)),
                }
            }
        }

        // Name the failing leaf rather than the leaves it blocked
        let first_error = errors
            .into_iter()
            .min_by(|(a_id, a_text), (b_id, b_text)| {
                let a_blocked = a_text.starts_with(messages::BLOCKED_BY_FAILURE);
                let b_blocked = b_text.starts_with(messages::BLOCKED_BY_FAILURE);
                a_blocked.cmp(&b_blocked).then_with(|| a_id.cmp(b_id))
            });
        let first_warning = warnings.into_iter().min_by(|a, b| a.0.cmp(&b.0));

        let message = match (first_error, first_warning) {
            (Some((id, text)), _) => Some(NodeMessage::warning(format!("Error in node {}: {}", id, text))),
            (None, Some((id, text))) => Some(NodeMessage::warning(format!("Warning in node {}: {}", id, text))),
            (None, None) => None,
        };
        (aggregate_state(&leaves), message)
    }
}

impl std::fmt::Debug for WorkflowManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowManager")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
