//! Structural validation of workflow snapshots
//!
//! Runs before a snapshot is turned into live workflows. Every problem is
//! reported, not just the first. Connections that fail a check are left
//! out of the loaded workflow; only an unsupported format version stops a
//! load entirely.

use std::collections::HashSet;

use crate::connection::{Connection, ConnectionGraph, GraphError, PortHost};
use crate::constants::snapshot::FORMAT_VERSION;
use crate::persist::{LoadStatus, NodeContent, ProjectSnapshot, WorkflowSnapshot};

/// Validation error with location context
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Snapshot was written by an incompatible engine version
    UnsupportedFormatVersion { found: u32 },
    /// Two nodes in one workflow share an index
    DuplicateNodeIndex { workflow: String, index: u32 },
    /// A connection references a node that does not exist
    UnknownNode {
        workflow: String,
        connection: Connection,
        index: u32,
    },
    /// Two connections feed the same input port
    PortOccupied {
        workflow: String,
        connection: Connection,
    },
    /// A connection joins a node to itself
    SelfLoop {
        workflow: String,
        connection: Connection,
    },
    /// A connection would close a cycle
    CycleDetected {
        workflow: String,
        connection: Connection,
    },
}

impl ValidationError {
    /// How serious this problem is for a load
    pub fn status(&self) -> LoadStatus {
        match self {
            Self::UnsupportedFormatVersion { .. } => LoadStatus::Error,
            _ => LoadStatus::Warning,
        }
    }

    /// The connection this problem drops, if any
    pub fn connection(&self) -> Option<&Connection> {
        match self {
            Self::UnknownNode { connection, .. }
            | Self::PortOccupied { connection, .. }
            | Self::SelfLoop { connection, .. }
            | Self::CycleDetected { connection, .. } => Some(connection),
            Self::UnsupportedFormatVersion { .. } | Self::DuplicateNodeIndex { .. } => None,
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedFormatVersion { found } => write!(
                f,
                "Unsupported snapshot format version {} (expected {})",
                found, FORMAT_VERSION
            ),
            Self::DuplicateNodeIndex { workflow, index } => {
                write!(f, "Workflow '{}' contains node {} twice; later copy ignored", workflow, index)
            }
            Self::UnknownNode {
                workflow,
                connection,
                index,
            } => write!(
                f,
                "Connection {} in '{}' references unknown node {}; dropped",
                connection, workflow, index
            ),
            Self::PortOccupied {
                workflow,
                connection,
            } => write!(
                f,
                "Connection {} in '{}' targets an input that is already connected; dropped",
                connection, workflow
            ),
            Self::SelfLoop {
                workflow,
                connection,
            } => write!(f, "Connection {} in '{}' is a self loop; dropped", connection, workflow),
            Self::CycleDetected {
                workflow,
                connection,
            } => write!(
                f,
                "Connection {} in '{}' would create a cycle; dropped",
                connection, workflow
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a whole project snapshot, nested workflows included
pub fn validate_project(snapshot: &ProjectSnapshot) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if snapshot.format_version != FORMAT_VERSION {
        errors.push(ValidationError::UnsupportedFormatVersion {
            found: snapshot.format_version,
        });
        return errors;
    }
    validate_tree(&snapshot.workflow, &mut errors);
    errors
}

fn validate_tree(snapshot: &WorkflowSnapshot, errors: &mut Vec<ValidationError>) {
    errors.extend(validate_workflow(snapshot));
    for node in &snapshot.nodes {
        if let NodeContent::Workflow(nested) = &node.content {
            validate_tree(nested, errors);
        }
    }
}

/// Validate one workflow level of a snapshot
pub fn validate_workflow(snapshot: &WorkflowSnapshot) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    check_node_indices(snapshot, &mut errors);
    accepted_connections(snapshot, &mut errors);
    errors
}

fn check_node_indices(snapshot: &WorkflowSnapshot, errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    for node in &snapshot.nodes {
        if !seen.insert(node.index) {
            errors.push(ValidationError::DuplicateNodeIndex {
                workflow: snapshot.name.clone(),
                index: node.index,
            });
        }
    }
}

/// Connections of one level that pass the structural checks, in order
///
/// Rejected connections are reported into `errors`.
pub(crate) fn accepted_connections(
    snapshot: &WorkflowSnapshot,
    errors: &mut Vec<ValidationError>,
) -> Vec<Connection> {
    let indices: HashSet<u32> = snapshot.nodes.iter().map(|n| n.index).collect();
    let workflow = || snapshot.name.clone();
    let mut graph = ConnectionGraph::new();

    for connection in &snapshot.connections {
        let missing = [connection.source, connection.dest]
            .into_iter()
            .filter_map(|host| match host {
                PortHost::Node(index) if !indices.contains(&index) => Some(index),
                _ => None,
            })
            .next();
        if let Some(index) = missing {
            errors.push(ValidationError::UnknownNode {
                workflow: workflow(),
                connection: *connection,
                index,
            });
            continue;
        }
        if let Err(err) = graph.add(*connection) {
            errors.push(match err {
                GraphError::PortOccupied { .. } => ValidationError::PortOccupied {
                    workflow: workflow(),
                    connection: *connection,
                },
                GraphError::SelfLoop(_) => ValidationError::SelfLoop {
                    workflow: workflow(),
                    connection: *connection,
                },
                GraphError::CycleDetected => ValidationError::CycleDetected {
                    workflow: workflow(),
                    connection: *connection,
                },
            });
        }
    }
    graph.iter().copied().collect()
}
