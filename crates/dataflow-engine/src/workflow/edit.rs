//! Structural edits: adding, removing and rewiring children
//!
//! Every edit validates first and is rejected without side effects when a
//! leaf it would reset is marked, queued or executing. Leaves behind a
//! changed input are reset, the edit is applied, then they are configured
//! again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::flat::{downstream_closure, LeafRef};
use super::propagation::{configure_downstream, configure_leaves, ensure_not_in_execution, reset_leaves};
use super::{WorkflowKind, WorkflowManager};
use crate::connection::{Connection, PortHost};
use crate::container::{NativeNode, NodeContainer};
use crate::error::{EngineError, Result};
use crate::registry::Instantiated;
use crate::types::PortDefinition;

impl WorkflowManager {
    /// Add a leaf of `node_type` with its default settings
    pub fn add_node(self: &Arc<Self>, node_type: &str) -> Result<u32> {
        self.add_node_with_settings(node_type, None)
    }

    /// Add a leaf of `node_type`, optionally overriding its settings
    ///
    /// A type rejected by the engine's filter is added as a placeholder.
    pub fn add_node_with_settings(
        self: &Arc<Self>,
        node_type: &str,
        settings: Option<serde_json::Value>,
    ) -> Result<u32> {
        let created = self.instantiate(node_type)?;
        self.with_lock(|| {
            let node = native_from(node_type, created, settings);
            let index = self.write(|s| {
                let index = s.allocate_index();
                s.children.insert(index, NodeContainer::Native(node));
                index
            });
            log::debug!("Added {} node {}", node_type, self.id().child(index));
            self.configure_leaf(index);
            Ok(index)
        })
    }

    /// Add an empty metanode with the given boundary ports
    pub fn add_metanode(
        self: &Arc<Self>,
        name: &str,
        inputs: Vec<PortDefinition>,
        outputs: Vec<PortDefinition>,
    ) -> u32 {
        self.add_workflow(WorkflowKind::Metanode, name, inputs, outputs)
    }

    /// Add an empty component with the given boundary ports
    pub fn add_component(
        self: &Arc<Self>,
        name: &str,
        inputs: Vec<PortDefinition>,
        outputs: Vec<PortDefinition>,
    ) -> u32 {
        self.add_workflow(WorkflowKind::Component, name, inputs, outputs)
    }

    fn add_workflow(
        self: &Arc<Self>,
        kind: WorkflowKind,
        name: &str,
        inputs: Vec<PortDefinition>,
        outputs: Vec<PortDefinition>,
    ) -> u32 {
        self.with_lock(|| {
            let index = self.write(|s| s.allocate_index());
            let child = self.new_child(index, kind, name, inputs, outputs);
            self.insert_child(index, NodeContainer::Workflow(child));
            log::debug!("Added {:?} {}", kind, self.id().child(index));
            index
        })
    }

    /// Insert a child at a fixed index, keeping later allocations above it
    pub(crate) fn insert_child(&self, index: u32, child: NodeContainer) {
        self.write(|s| {
            s.next_index = s.next_index.max(index + 1);
            s.children.insert(index, child);
        });
    }

    /// Remove child `index` with its connections
    ///
    /// Leaves that consumed its outputs are reset and reconfigured.
    pub fn remove_node(self: &Arc<Self>, index: u32) -> Result<()> {
        self.with_lock(|| {
            let consumers = self.check_remove_node(index)?;
            reset_leaves(&downstream_closure(&consumers, true));
            self.write(|s| {
                s.graph.remove_node(index);
                s.children.remove(&index);
            });
            log::debug!("Removed node {}", self.id().child(index));
            configure_downstream(&consumers);
            Ok(())
        })
    }

    /// Whether [`Self::remove_node`] would be accepted
    pub fn can_remove_node(self: &Arc<Self>, index: u32) -> bool {
        self.with_lock(|| self.check_remove_node(index).is_ok())
    }

    fn check_remove_node(self: &Arc<Self>, index: u32) -> Result<Vec<LeafRef>> {
        let own = self.start_leaves(index)?;
        ensure_not_in_execution(&own, "remove node")?;
        let consumers = self.consumers_of(PortHost::Node(index), None);
        ensure_not_in_execution(&downstream_closure(&consumers, true), "remove node")?;
        Ok(consumers)
    }

    /// Connect output `source_port` of `source` to input `dest_port` of `dest`
    ///
    /// [`PortHost::Boundary`] as source is this workflow's input bar, as
    /// destination its output bar.
    pub fn add_connection(
        self: &Arc<Self>,
        source: PortHost,
        source_port: usize,
        dest: PortHost,
        dest_port: usize,
    ) -> Result<()> {
        let connection = Connection::new(source, source_port, dest, dest_port);
        self.with_lock(|| {
            let starts = self.check_add_connection(&connection)?;
            reset_leaves(&downstream_closure(&starts, true));
            self.write(|s| s.graph.add(connection))
                .map_err(|e| EngineError::InvalidConnection(e.to_string()))?;
            log::debug!("Connected {} in {}", connection, self.id());
            configure_downstream(&starts);
            Ok(())
        })
    }

    /// Whether [`Self::add_connection`] would be accepted
    pub fn can_add_connection(
        self: &Arc<Self>,
        source: PortHost,
        source_port: usize,
        dest: PortHost,
        dest_port: usize,
    ) -> bool {
        let connection = Connection::new(source, source_port, dest, dest_port);
        self.with_lock(|| self.check_add_connection(&connection).is_ok())
    }

    fn check_add_connection(self: &Arc<Self>, connection: &Connection) -> Result<Vec<LeafRef>> {
        self.validate_connection(connection)?;
        let starts = self.leaves_behind(connection.dest, connection.dest_port);
        ensure_not_in_execution(&downstream_closure(&starts, true), "add connection")?;
        Ok(starts)
    }

    /// Check endpoints, port ranges, type compatibility and graph rules
    pub(crate) fn validate_connection(&self, connection: &Connection) -> Result<()> {
        let source = self.source_port(connection.source, connection.source_port)?;
        let dest = self.dest_port(connection.dest, connection.dest_port)?;
        if !source.port_type.is_compatible_with(&dest.port_type) {
            return Err(EngineError::InvalidConnection(format!(
                "{} output '{}' ({:?}) cannot feed input '{}' ({:?})",
                connection.source, source.name, source.port_type, dest.name, dest.port_type
            )));
        }
        self.read(|s| s.graph.check(connection))
            .map_err(|e| EngineError::InvalidConnection(e.to_string()))
    }

    pub(crate) fn source_port(&self, host: PortHost, port: usize) -> Result<PortDefinition> {
        let ports = match host {
            PortHost::Boundary => self.input_ports(),
            PortHost::Node(index) => self.ports_of(index).ok_or_else(|| self.not_found(index))?.1,
        };
        ports.get(port).cloned().ok_or_else(|| {
            EngineError::InvalidConnection(format!("{} has no output port {}", host, port))
        })
    }

    pub(crate) fn dest_port(&self, host: PortHost, port: usize) -> Result<PortDefinition> {
        let ports = match host {
            PortHost::Boundary => self.output_ports(),
            PortHost::Node(index) => self.ports_of(index).ok_or_else(|| self.not_found(index))?.0,
        };
        ports.get(port).cloned().ok_or_else(|| {
            EngineError::InvalidConnection(format!("{} has no input port {}", host, port))
        })
    }

    /// Remove the connection feeding input `dest_port` of `dest`
    pub fn remove_connection(self: &Arc<Self>, dest: PortHost, dest_port: usize) -> Result<Connection> {
        self.with_lock(|| {
            let starts = self.check_remove_connection(dest, dest_port)?;
            reset_leaves(&downstream_closure(&starts, true));
            let removed = self
                .write(|s| s.graph.remove(dest, dest_port))
                .ok_or_else(|| no_connection(dest, dest_port))?;
            log::debug!("Disconnected {} in {}", removed, self.id());
            configure_downstream(&starts);
            Ok(removed)
        })
    }

    /// Whether [`Self::remove_connection`] would be accepted
    pub fn can_remove_connection(self: &Arc<Self>, dest: PortHost, dest_port: usize) -> bool {
        self.with_lock(|| self.check_remove_connection(dest, dest_port).is_ok())
    }

    fn check_remove_connection(self: &Arc<Self>, dest: PortHost, dest_port: usize) -> Result<Vec<LeafRef>> {
        if self.read(|s| s.graph.incoming(dest, dest_port).is_none()) {
            return Err(no_connection(dest, dest_port));
        }
        let starts = self.leaves_behind(dest, dest_port);
        ensure_not_in_execution(&downstream_closure(&starts, true), "remove connection")?;
        Ok(starts)
    }

    /// Replace the settings of leaf `index`, then reset and reconfigure it
    pub fn set_node_settings(self: &Arc<Self>, index: u32, settings: serde_json::Value) -> Result<()> {
        self.with_lock(|| {
            let leaf = self.native_leaf(index)?;
            let starts = [leaf];
            ensure_not_in_execution(&downstream_closure(&starts, true), "change settings")?;
            reset_leaves(&downstream_closure(&starts, true));
            self.update_leaf(index, |_, node| node.settings = settings);
            configure_downstream(&starts);
            Ok(())
        })
    }

    /// Swap leaf `index` for a fresh node of `node_type`
    ///
    /// Connections whose ports no longer exist or whose types no longer
    /// match are dropped. The returned [`ReplaceNodeResult`] lists them and
    /// can restore the previous node.
    pub fn replace_node(self: &Arc<Self>, index: u32, node_type: &str) -> Result<ReplaceNodeResult> {
        let created = self.instantiate(node_type)?;
        self.with_lock(|| {
            self.check_replace_node(index)?;
            let (previous_type, previous_settings) = self
                .with_native(index, |n| (n.node_type.clone(), n.settings.clone()))
                .ok_or_else(|| self.not_found(index))?;
            let dropped = self.swap_node(index, node_type, created, None)?;
            Ok(ReplaceNodeResult {
                workflow: Arc::clone(self),
                index,
                node_type: node_type.to_string(),
                previous_type,
                previous_settings,
                dropped,
                undone: AtomicBool::new(false),
            })
        })
    }

    /// Put a new leaf at `index`, keeping its name and compatible connections
    fn swap_node(
        self: &Arc<Self>,
        index: u32,
        node_type: &str,
        created: Instantiated,
        settings: Option<serde_json::Value>,
    ) -> Result<Vec<Connection>> {
        let starts = self.check_replace_node(index)?;
        // Consumers of dropped outputs fall out of the closure once rewired
        let affected = downstream_closure(&starts, false);
        reset_leaves(&downstream_closure(&starts, true));

        let name = self.with_native(index, |n| n.name.clone()).unwrap_or_default();
        let mut node = native_from(node_type, created, settings);
        node.name = name;
        let (inputs, outputs) = (node.inputs.clone(), node.outputs.clone());
        let parent_inputs = self.input_ports();
        let parent_outputs = self.output_ports();
        let ports_of = |host: PortHost| -> Option<(Vec<PortDefinition>, Vec<PortDefinition>)> {
            match host {
                PortHost::Node(i) if i == index => Some((inputs.clone(), outputs.clone())),
                PortHost::Node(i) => self.ports_of(i),
                PortHost::Boundary => Some((parent_outputs.clone(), parent_inputs.clone())),
            }
        };
        // Resolve every port type before taking the write borrow
        let existing = self.connections();
        let keep: Vec<bool> = existing
            .iter()
            .map(|c| {
                let source = ports_of(c.source).and_then(|(_, out)| out.get(c.source_port).cloned());
                let dest = ports_of(c.dest).and_then(|(inp, _)| inp.get(c.dest_port).cloned());
                matches!((source, dest), (Some(s), Some(d)) if s.port_type.is_compatible_with(&d.port_type))
            })
            .collect();

        let dropped = self.write(|s| {
            let mut position = 0;
            let dropped = s.graph.remap(|c| {
                let kept = keep.get(position).copied().unwrap_or(false);
                position += 1;
                kept.then_some(*c)
            });
            s.children.insert(index, NodeContainer::Native(node));
            dropped
        });
        log::debug!(
            "Replaced node {} with {} ({} connection(s) dropped)",
            self.id().child(index),
            node_type,
            dropped.len()
        );
        configure_leaves(affected);
        Ok(dropped)
    }

    /// Whether [`Self::replace_node`] would be accepted
    pub fn can_replace_node(self: &Arc<Self>, index: u32) -> bool {
        self.with_lock(|| self.check_replace_node(index).is_ok())
    }

    fn check_replace_node(self: &Arc<Self>, index: u32) -> Result<Vec<LeafRef>> {
        let leaf = self.native_leaf(index)?;
        let starts = vec![leaf];
        ensure_not_in_execution(&downstream_closure(&starts, true), "replace node")?;
        Ok(starts)
    }

    /// Rename child `index`, leaf or nested workflow
    pub fn rename_node(self: &Arc<Self>, index: u32, name: &str) -> Result<()> {
        self.with_lock(|| {
            if let Some(child) = self.child_workflow(index) {
                child.write(|s| s.name = name.to_string());
                return Ok(());
            }
            self.update_leaf(index, |_, node| node.name = name.to_string())
                .ok_or_else(|| self.not_found(index))
        })
    }

    fn instantiate(&self, node_type: &str) -> Result<Instantiated> {
        let engine = &self.project_context().engine;
        engine.registry.instantiate(node_type, engine.filter.as_ref())
    }

    fn native_leaf(self: &Arc<Self>, index: u32) -> Result<LeafRef> {
        if self.with_native(index, |_| ()).is_some() {
            return Ok(LeafRef::new(self, index));
        }
        if self.contains(index) {
            return Err(EngineError::rejected(format!(
                "Node {} is not a native node",
                self.id().child(index)
            )));
        }
        Err(self.not_found(index))
    }

    pub(crate) fn not_found(&self, index: u32) -> EngineError {
        EngineError::NodeNotFound(self.id().child(index))
    }
}

/// Build a leaf from a freshly instantiated model
pub(crate) fn native_from(
    node_type: &str,
    created: Instantiated,
    settings: Option<serde_json::Value>,
) -> NativeNode {
    let Instantiated {
        descriptor,
        model,
        placeholder,
    } = created;
    let settings = settings.unwrap_or(descriptor.default_settings);
    let mut node = NativeNode::new(
        node_type.to_string(),
        descriptor.label,
        model,
        settings,
        descriptor.inputs,
        descriptor.outputs,
    );
    node.placeholder = placeholder.is_some();
    node
}

/// Outcome of [`WorkflowManager::replace_node`]
#[derive(Debug)]
pub struct ReplaceNodeResult {
    workflow: Arc<WorkflowManager>,
    index: u32,
    node_type: String,
    previous_type: String,
    previous_settings: serde_json::Value,
    dropped: Vec<Connection>,
    undone: AtomicBool,
}

impl ReplaceNodeResult {
    /// Local index of the replaced leaf
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Type the leaf had before the replacement
    pub fn previous_type(&self) -> &str {
        &self.previous_type
    }

    /// Connections removed because the new node could not keep them
    pub fn dropped_connections(&self) -> &[Connection] {
        &self.dropped
    }

    /// Whether [`Self::undo`] would be accepted
    pub fn can_undo(&self) -> bool {
        let wfm = &self.workflow;
        wfm.with_lock(|| self.check_undo().is_ok() && wfm.check_replace_node(self.index).is_ok())
    }

    fn check_undo(&self) -> Result<()> {
        let id = self.workflow.id().child(self.index);
        if self.undone.load(Ordering::SeqCst) {
            return Err(EngineError::rejected(format!("Replacement of node {} was already undone", id)));
        }
        let current = self.workflow.with_native(self.index, |n| n.node_type.clone());
        if current.as_deref() != Some(self.node_type.as_str()) {
            return Err(EngineError::rejected(format!(
                "Node {} changed since it was replaced",
                id
            )));
        }
        Ok(())
    }

    /// Restore the previous node type, its settings and the dropped connections
    ///
    /// The restored node is a fresh instance; its execution state is not
    /// brought back. Each dropped connection is validated again and the
    /// first one that no longer fits fails the undo.
    pub fn undo(&self) -> Result<()> {
        let wfm = &self.workflow;
        let created = wfm.instantiate(&self.previous_type)?;
        wfm.with_lock(|| {
            self.check_undo()?;
            wfm.swap_node(
                self.index,
                &self.previous_type,
                created,
                Some(self.previous_settings.clone()),
            )?;
            self.undone.store(true, Ordering::SeqCst);
            for c in &self.dropped {
                wfm.add_connection(c.source, c.source_port, c.dest, c.dest_port)?;
            }
            log::debug!(
                "Restored node {} as {}",
                wfm.id().child(self.index),
                self.previous_type
            );
            Ok(())
        })
    }
}

fn no_connection(dest: PortHost, port: usize) -> EngineError {
    EngineError::InvalidConnection(format!("No connection into port {} of {}", port, dest))
}
