//! Flattened view of the leaf graph
//!
//! Propagation and scheduling only ever move data between leaf nodes.
//! Metanode and component boundaries are looked through: data entering a
//! nested workflow continues at the leaves behind its input bar, data
//! reaching an output bar continues at the consumers in the parent.
//! Components add one rule: their outputs are only available once every
//! leaf inside them has executed, so consumers of a component depend on
//! all of its leaves.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use super::{WorkflowKind, WorkflowManager};
use crate::connection::PortHost;
use crate::state::NodeState;
use crate::types::{NodeId, PortSpec, PortValue};

/// A leaf node addressed through the workflow that owns it
#[derive(Clone)]
pub(crate) struct LeafRef {
    pub wfm: Arc<WorkflowManager>,
    pub index: u32,
}

impl LeafRef {
    pub fn new(wfm: &Arc<WorkflowManager>, index: u32) -> Self {
        Self {
            wfm: Arc::clone(wfm),
            index,
        }
    }

    pub fn id(&self) -> NodeId {
        self.wfm.id().child(self.index)
    }

    pub fn state(&self) -> Option<NodeState> {
        self.wfm.with_native(self.index, |n| n.state)
    }
}

/// Where the data on one input port comes from
#[derive(Default)]
pub(crate) struct Resolved {
    /// Producing leaf and its output port
    pub leaf: Option<(LeafRef, usize)>,
    /// Components the data leaves through on its way
    pub components: Vec<Arc<WorkflowManager>>,
}

impl Resolved {
    pub fn spec(&self) -> Option<PortSpec> {
        let (leaf, port) = self.leaf.as_ref()?;
        leaf.wfm
            .with_native(leaf.index, |n| {
                if n.state.has_configuration() {
                    n.output_specs.get(*port).cloned().flatten()
                } else {
                    None
                }
            })
            .flatten()
    }

    pub fn value(&self) -> Option<PortValue> {
        let (leaf, port) = self.leaf.as_ref()?;
        if !self.components.iter().all(|c| c.state() == NodeState::Executed) {
            return None;
        }
        leaf.wfm
            .with_native(leaf.index, |n| {
                if n.state.is_executed() {
                    n.output_values.get(*port).cloned().flatten()
                } else {
                    None
                }
            })
            .flatten()
    }
}

impl WorkflowManager {
    /// Every leaf below this workflow, own leaves before nested ones
    pub(crate) fn all_leaves(self: &Arc<Self>) -> Vec<LeafRef> {
        let mut leaves = Vec::new();
        let mut nested = Vec::new();
        self.read(|s| {
            for (index, child) in &s.children {
                match child.as_workflow() {
                    Some(wfm) => nested.push((*index, Arc::clone(wfm))),
                    None => leaves.push(*index),
                }
            }
        });
        let mut result: Vec<LeafRef> = leaves.into_iter().map(|i| LeafRef::new(self, i)).collect();
        for (_, wfm) in nested {
            result.extend(wfm.all_leaves());
        }
        result
    }

    /// Leaves that directly receive data leaving `source` (all ports if `None`)
    pub(crate) fn consumers_of(self: &Arc<Self>, source: PortHost, port: Option<usize>) -> Vec<LeafRef> {
        let connections = self.read(|s| match port {
            Some(port) => s.graph.outgoing_from_port(source, port),
            None => s.graph.outgoing(source),
        });
        let mut result = Vec::new();
        for connection in connections {
            result.extend(self.leaves_behind(connection.dest, connection.dest_port));
        }
        dedup(result)
    }

    /// Leaves receiving data that arrives at input `port` of `dest`
    ///
    /// `dest` is a child (its input port) or the boundary (output bar).
    pub(crate) fn leaves_behind(self: &Arc<Self>, dest: PortHost, port: usize) -> Vec<LeafRef> {
        match dest {
            PortHost::Node(index) => match self.child_workflow(index) {
                Some(child) => child.consumers_of(PortHost::Boundary, Some(port)),
                None => vec![LeafRef::new(self, index)],
            },
            PortHost::Boundary => match self.parent() {
                Some(parent) => parent.consumers_of(PortHost::Node(self.id().index()), Some(port)),
                None => Vec::new(),
            },
        }
    }

    /// Resolve the leaf output connected to input `port` of `dest`
    pub(crate) fn resolve_input(self: &Arc<Self>, dest: PortHost, port: usize) -> Resolved {
        match self.read(|s| s.graph.incoming(dest, port).copied()) {
            Some(connection) => self.resolve_source(connection.source, connection.source_port),
            None => Resolved::default(),
        }
    }

    /// Resolve the leaf output behind output `port` of `source`
    pub(crate) fn resolve_source(self: &Arc<Self>, source: PortHost, port: usize) -> Resolved {
        match source {
            PortHost::Node(index) => match self.child_workflow(index) {
                Some(child) => {
                    let mut resolved = child.resolve_input(PortHost::Boundary, port);
                    if child.kind() == WorkflowKind::Component {
                        resolved.components.push(child);
                    }
                    resolved
                }
                None if self.contains(index) => Resolved {
                    leaf: Some((LeafRef::new(self, index), port)),
                    components: Vec::new(),
                },
                None => Resolved::default(),
            },
            PortHost::Boundary => match self.parent() {
                Some(parent) => parent.resolve_input(PortHost::Node(self.id().index()), port),
                None => Resolved::default(),
            },
        }
    }

    /// Whether input `port` of child `index` has a connection at this level
    pub(crate) fn is_input_connected(&self, index: u32, port: usize) -> bool {
        self.read(|s| s.graph.incoming(PortHost::Node(index), port).is_some())
    }

    /// Components enclosing this workflow, innermost first, including itself
    fn enclosing_components(self: &Arc<Self>) -> Vec<Arc<WorkflowManager>> {
        let mut result = Vec::new();
        let mut current = Some(Arc::clone(self));
        while let Some(wfm) = current {
            if wfm.kind() == WorkflowKind::Component {
                result.push(Arc::clone(&wfm));
            }
            current = wfm.parent();
        }
        result
    }
}

/// Leaves whose inputs depend on `leaf`
///
/// Direct consumers, plus the consumers of every component enclosing the
/// leaf, since a component's outputs wait for all of its leaves.
pub(crate) fn dependents(leaf: &LeafRef) -> Vec<LeafRef> {
    let mut result = leaf.wfm.consumers_of(PortHost::Node(leaf.index), None);
    for component in leaf.wfm.enclosing_components() {
        if let Some(parent) = component.parent() {
            result.extend(parent.consumers_of(PortHost::Node(component.id().index()), None));
        }
    }
    dedup(result)
}

/// Leaves `leaf` needs executed before it can run
pub(crate) fn dependencies(leaf: &LeafRef) -> Vec<LeafRef> {
    let input_count = leaf.wfm.with_native(leaf.index, |n| n.inputs.len()).unwrap_or(0);
    let mut result = Vec::new();
    for port in 0..input_count {
        let resolved = leaf.wfm.resolve_input(PortHost::Node(leaf.index), port);
        if let Some((source, _)) = resolved.leaf {
            result.push(source);
        }
        for component in resolved.components {
            result.extend(component.all_leaves());
        }
    }
    dedup(result)
}

/// Whether every connected input of the leaf has a value
pub(crate) fn inputs_available(leaf: &LeafRef) -> bool {
    let input_count = leaf.wfm.with_native(leaf.index, |n| n.inputs.len()).unwrap_or(0);
    (0..input_count).all(|port| {
        !leaf.wfm.is_input_connected(leaf.index, port)
            || leaf
                .wfm
                .resolve_input(PortHost::Node(leaf.index), port)
                .value()
                .is_some()
    })
}

/// Breadth-first closure of `starts` and their dependents
///
/// With `stop_at_idle`, leaves other than the starts that are already idle
/// are included but not expanded further.
pub(crate) fn downstream_closure(starts: &[LeafRef], stop_at_idle: bool) -> Vec<LeafRef> {
    let start_ids: HashSet<NodeId> = starts.iter().map(LeafRef::id).collect();
    let mut visited = HashSet::new();
    let mut result = Vec::new();
    let mut queue: VecDeque<LeafRef> = starts.iter().cloned().collect();
    while let Some(leaf) = queue.pop_front() {
        let id = leaf.id();
        if !visited.insert(id.clone()) {
            continue;
        }
        let expand = !stop_at_idle
            || start_ids.contains(&id)
            || leaf.state() != Some(NodeState::Idle);
        if expand {
            queue.extend(dependents(&leaf));
        }
        result.push(leaf);
    }
    result
}

/// Order leaves so every leaf follows the leaves it depends on
///
/// Kahn's algorithm over the dependencies inside the set; ties resolve by
/// node id.
pub(crate) fn order_leaves(leaves: Vec<LeafRef>) -> Vec<LeafRef> {
    let by_id: BTreeMap<NodeId, LeafRef> = leaves.into_iter().map(|l| (l.id(), l)).collect();
    let mut in_degree: BTreeMap<NodeId, usize> = by_id.keys().map(|id| (id.clone(), 0)).collect();
    let mut successors: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();

    for (id, leaf) in &by_id {
        for dependency in dependencies(leaf) {
            let dependency_id = dependency.id();
            if by_id.contains_key(&dependency_id) {
                *in_degree.entry(id.clone()).or_default() += 1;
                successors.entry(dependency_id).or_default().push(id.clone());
            }
        }
    }

    let mut ready: BTreeSet<NodeId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| id.clone())
        .collect();
    let mut ordered = Vec::with_capacity(by_id.len());
    let mut emitted = HashSet::new();
    while let Some(id) = ready.pop_first() {
        for successor in successors.get(&id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(successor) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(successor.clone());
                }
            }
        }
        emitted.insert(id.clone());
        if let Some(leaf) = by_id.get(&id) {
            ordered.push(leaf.clone());
        }
    }

    // Leftovers only appear if the graph is inconsistent; keep them last
    for (id, leaf) in &by_id {
        if !emitted.contains(id) {
            log::warn!("Leaf {} is part of a dependency cycle", id);
            ordered.push(leaf.clone());
        }
    }
    ordered
}

fn dedup(leaves: Vec<LeafRef>) -> Vec<LeafRef> {
    let mut seen = HashSet::new();
    leaves.into_iter().filter(|l| seen.insert(l.id())).collect()
}
