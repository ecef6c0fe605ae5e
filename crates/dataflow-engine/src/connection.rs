//! Connections and the per-workflow connection graph
//!
//! A connection joins an output port to an input port within one
//! containment level. The workflow's own boundary appears as
//! [`PortHost::Boundary`]: as a source it is the input bar (data entering
//! the workflow), as a destination it is the output bar.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Owner of a connection endpoint within one workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortHost {
    /// The workflow's own input bar (as source) or output bar (as destination)
    Boundary,
    /// A direct child, by local index
    Node(u32),
}

impl PortHost {
    pub fn node_index(&self) -> Option<u32> {
        match self {
            PortHost::Boundary => None,
            PortHost::Node(index) => Some(*index),
        }
    }
}

impl fmt::Display for PortHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortHost::Boundary => f.write_str("boundary"),
            PortHost::Node(index) => write!(f, "node {}", index),
        }
    }
}

/// Directed edge from an output port to an input port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub source: PortHost,
    pub source_port: usize,
    pub dest: PortHost,
    pub dest_port: usize,
}

impl Connection {
    pub fn new(source: PortHost, source_port: usize, dest: PortHost, dest_port: usize) -> Self {
        Self {
            source,
            source_port,
            dest,
            dest_port,
        }
    }

    /// Connection between two child nodes
    pub fn between(source: u32, source_port: usize, dest: u32, dest_port: usize) -> Self {
        Self::new(PortHost::Node(source), source_port, PortHost::Node(dest), dest_port)
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.source, self.source_port, self.dest, self.dest_port
        )
    }
}

/// Reason a connection could not be added to the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Destination port already has an incoming connection
    PortOccupied { dest: PortHost, port: usize },
    /// Source and destination are the same node
    SelfLoop(u32),
    /// The connection would close a cycle
    CycleDetected,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PortOccupied { dest, port } => {
                write!(f, "Input port {} of {} is already connected", port, dest)
            }
            Self::SelfLoop(index) => write!(f, "Node {} cannot be connected to itself", index),
            Self::CycleDetected => write!(f, "Connection would create a cycle"),
        }
    }
}

impl std::error::Error for GraphError {}

/// Connections among the direct children of one workflow
#[derive(Debug, Clone, Default)]
pub struct ConnectionGraph {
    connections: Vec<Connection>,
}

impl ConnectionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    /// Check whether `connection` can be added
    pub fn check(&self, connection: &Connection) -> Result<(), GraphError> {
        if self.incoming(connection.dest, connection.dest_port).is_some() {
            return Err(GraphError::PortOccupied {
                dest: connection.dest,
                port: connection.dest_port,
            });
        }
        if let (PortHost::Node(source), PortHost::Node(dest)) = (connection.source, connection.dest) {
            if source == dest {
                return Err(GraphError::SelfLoop(source));
            }
            if self.reaches(dest, source) {
                return Err(GraphError::CycleDetected);
            }
        }
        Ok(())
    }

    /// Add a connection after validating it
    pub fn add(&mut self, connection: Connection) -> Result<(), GraphError> {
        self.check(&connection)?;
        self.connections.push(connection);
        Ok(())
    }

    /// The connection feeding `port` of `dest`, if any
    pub fn incoming(&self, dest: PortHost, port: usize) -> Option<&Connection> {
        self.connections
            .iter()
            .find(|c| c.dest == dest && c.dest_port == port)
    }

    /// All connections into `dest`, sorted by destination port
    pub fn incoming_all(&self, dest: PortHost) -> Vec<Connection> {
        let mut result: Vec<Connection> = self
            .connections
            .iter()
            .filter(|c| c.dest == dest)
            .copied()
            .collect();
        result.sort_by_key(|c| c.dest_port);
        result
    }

    /// All connections leaving `source`
    pub fn outgoing(&self, source: PortHost) -> Vec<Connection> {
        self.connections
            .iter()
            .filter(|c| c.source == source)
            .copied()
            .collect()
    }

    /// Connections leaving `port` of `source`
    pub fn outgoing_from_port(&self, source: PortHost, port: usize) -> Vec<Connection> {
        self.connections
            .iter()
            .filter(|c| c.source == source && c.source_port == port)
            .copied()
            .collect()
    }

    /// Remove the connection feeding `port` of `dest`
    pub fn remove(&mut self, dest: PortHost, port: usize) -> Option<Connection> {
        let position = self
            .connections
            .iter()
            .position(|c| c.dest == dest && c.dest_port == port)?;
        Some(self.connections.remove(position))
    }

    /// Remove every connection touching node `index`
    pub fn remove_node(&mut self, index: u32) -> Vec<Connection> {
        let host = PortHost::Node(index);
        let (removed, kept): (Vec<Connection>, Vec<Connection>) = self
            .connections
            .drain(..)
            .partition(|c| c.source == host || c.dest == host);
        self.connections = kept;
        removed
    }

    /// Rewrite or drop connections; `f` returns the replacement or `None`
    ///
    /// Returns the dropped connections.
    pub fn remap<F>(&mut self, mut f: F) -> Vec<Connection>
    where
        F: FnMut(&Connection) -> Option<Connection>,
    {
        let mut dropped = Vec::new();
        let mut kept = Vec::with_capacity(self.connections.len());
        for connection in self.connections.drain(..) {
            match f(&connection) {
                Some(replacement) => kept.push(replacement),
                None => dropped.push(connection),
            }
        }
        self.connections = kept;
        dropped
    }

    /// Direct node successors of node `index`
    pub fn successors(&self, index: u32) -> BTreeSet<u32> {
        self.connections
            .iter()
            .filter(|c| c.source == PortHost::Node(index))
            .filter_map(|c| c.dest.node_index())
            .collect()
    }

    /// Direct node predecessors of node `index`
    pub fn predecessors(&self, index: u32) -> BTreeSet<u32> {
        self.connections
            .iter()
            .filter(|c| c.dest == PortHost::Node(index))
            .filter_map(|c| c.source.node_index())
            .collect()
    }

    /// Whether `to` is reachable from `from` following node-to-node edges
    pub fn reaches(&self, from: u32, to: u32) -> bool {
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            if current == to {
                return true;
            }
            if visited.insert(current) {
                queue.extend(self.successors(current));
            }
        }
        false
    }

    /// Order `nodes` so every node comes after its predecessors
    ///
    /// Uses Kahn's algorithm restricted to `nodes`; ties resolve by index.
    /// Returns `None` if the subgraph has a cycle.
    pub fn topological_order(&self, nodes: &BTreeSet<u32>) -> Option<Vec<u32>> {
        let mut in_degree: BTreeMap<u32, usize> = nodes.iter().map(|n| (*n, 0)).collect();
        for connection in &self.connections {
            if let (PortHost::Node(source), PortHost::Node(dest)) = (connection.source, connection.dest) {
                if nodes.contains(&source) && nodes.contains(&dest) {
                    *in_degree.entry(dest).or_default() += 1;
                }
            }
        }

        let mut ready: BTreeSet<u32> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(node, _)| *node)
            .collect();
        let mut order = Vec::with_capacity(nodes.len());

        while let Some(node) = ready.pop_first() {
            order.push(node);
            for connection in self.outgoing(PortHost::Node(node)) {
                if let PortHost::Node(dest) = connection.dest {
                    if let Some(degree) = in_degree.get_mut(&dest) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(dest);
                        }
                    }
                }
            }
        }

        if order.len() == nodes.len() {
            Some(order)
        } else {
            None
        }
    }
}
