//! Boundary port reconfiguration of metanodes and components

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::flat::{downstream_closure, LeafRef};
use super::propagation::{configure_downstream, ensure_not_in_execution, reset_leaves};
use super::WorkflowManager;
use crate::connection::{Connection, PortHost};
use crate::error::{EngineError, Result};
use crate::types::{NodeId, PortDefinition};

/// One port in a new boundary layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDescriptor {
    /// Position of this port before the change, `None` for a new port
    pub original_index: Option<usize>,
    pub definition: PortDefinition,
}

impl PortDescriptor {
    /// Keep the port currently at `index`
    pub fn keep(index: usize, definition: PortDefinition) -> Self {
        Self {
            original_index: Some(index),
            definition,
        }
    }

    /// Add a new, unconnected port
    pub fn added(definition: PortDefinition) -> Self {
        Self {
            original_index: None,
            definition,
        }
    }

    /// Descriptors keeping every port of `ports` in place
    pub fn keep_all(ports: &[PortDefinition]) -> Vec<Self> {
        ports
            .iter()
            .enumerate()
            .map(|(index, definition)| Self::keep(index, definition.clone()))
            .collect()
    }
}

/// Outcome of [`WorkflowManager::change_boundary_ports`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortChange {
    /// Connections removed from the enclosing workflow
    pub dropped_outer: Vec<Connection>,
    /// Connections removed inside the reconfigured workflow
    pub dropped_inner: Vec<Connection>,
    /// Leaves that were reset because they lost an input
    pub reset_nodes: Vec<NodeId>,
}

impl PortChange {
    pub fn dropped_count(&self) -> usize {
        self.dropped_outer.len() + self.dropped_inner.len()
    }
}

/// New position of every old port that is kept
fn port_mapping(descriptors: &[PortDescriptor], old_len: usize, side: &str) -> Result<Vec<Option<usize>>> {
    let mut mapping = vec![None; old_len];
    let mut seen = HashSet::new();
    for (position, descriptor) in descriptors.iter().enumerate() {
        let Some(original) = descriptor.original_index else {
            continue;
        };
        if original >= old_len {
            return Err(EngineError::rejected(format!(
                "{} port {} does not exist",
                side, original
            )));
        }
        if !seen.insert(original) {
            return Err(EngineError::rejected(format!(
                "{} port {} is referenced twice",
                side, original
            )));
        }
        mapping[original] = Some(position);
    }
    Ok(mapping)
}

fn remapped(mapping: &[Option<usize>], port: usize) -> Option<usize> {
    mapping.get(port).copied().flatten()
}

impl WorkflowManager {
    /// Rebuild the boundary ports of nested workflow `index`
    ///
    /// Connections on kept ports follow them to their new positions;
    /// connections on removed ports, or on ports whose new type no longer
    /// fits, are dropped. Leaves that lose an input are reset together with
    /// their downstream and then configured again. Nothing changes if the
    /// workflow or any leaf to reset is in execution, or if a descriptor
    /// names a missing or repeated port.
    pub fn change_boundary_ports(
        self: &Arc<Self>,
        index: u32,
        inputs: Vec<PortDescriptor>,
        outputs: Vec<PortDescriptor>,
    ) -> Result<PortChange> {
        self.with_lock(|| {
            let child = self.workflow(index)?;
            if child.is_in_execution() {
                return Err(EngineError::rejected(format!(
                    "Cannot change ports of {}: it is in execution",
                    child.id()
                )));
            }

            let input_map = port_mapping(&inputs, child.input_ports().len(), "Input")?;
            let output_map = port_mapping(&outputs, child.output_ports().len(), "Output")?;
            let new_inputs: Vec<PortDefinition> = inputs.into_iter().map(|d| d.definition).collect();
            let new_outputs: Vec<PortDefinition> = outputs.into_iter().map(|d| d.definition).collect();

            // Outer connections touching the child
            let here = PortHost::Node(index);
            let outer_plan: Vec<Option<Connection>> = self
                .connections()
                .iter()
                .map(|c| {
                    let mut next = *c;
                    if c.dest == here {
                        next.dest_port = remapped(&input_map, c.dest_port)?;
                    }
                    if c.source == here {
                        next.source_port = remapped(&output_map, c.source_port)?;
                    }
                    let source = if next.source == here {
                        new_outputs.get(next.source_port).cloned()
                    } else {
                        self.source_port(next.source, next.source_port).ok()
                    };
                    let dest = if next.dest == here {
                        new_inputs.get(next.dest_port).cloned()
                    } else {
                        self.dest_port(next.dest, next.dest_port).ok()
                    };
                    fits(source, dest).then_some(next)
                })
                .collect();

            // Inner connections touching the boundary
            let inner_plan: Vec<Option<Connection>> = child
                .connections()
                .iter()
                .map(|c| {
                    let mut next = *c;
                    if c.source == PortHost::Boundary {
                        next.source_port = remapped(&input_map, c.source_port)?;
                    }
                    if c.dest == PortHost::Boundary {
                        next.dest_port = remapped(&output_map, c.dest_port)?;
                    }
                    let source = match next.source {
                        PortHost::Boundary => new_inputs.get(next.source_port).cloned(),
                        host => child.source_port(host, next.source_port).ok(),
                    };
                    let dest = match next.dest {
                        PortHost::Boundary => new_outputs.get(next.dest_port).cloned(),
                        host => child.dest_port(host, next.dest_port).ok(),
                    };
                    fits(source, dest).then_some(next)
                })
                .collect();

            // Leaves behind every dropped connection, resolved on the old layout
            let mut roots: Vec<LeafRef> = Vec::new();
            for (connection, plan) in self.connections().iter().zip(&outer_plan) {
                if plan.is_none() {
                    roots.extend(self.leaves_behind(connection.dest, connection.dest_port));
                }
            }
            for (connection, plan) in child.connections().iter().zip(&inner_plan) {
                if plan.is_none() {
                    roots.extend(child.leaves_behind(connection.dest, connection.dest_port));
                }
            }
            let reset = downstream_closure(&roots, true);
            ensure_not_in_execution(&reset, "change ports")?;

            reset_leaves(&reset);
            let dropped_outer = self.write(|s| apply_plan(&mut s.graph, &outer_plan));
            let dropped_inner = child.write(|s| {
                s.inputs = new_inputs;
                s.outputs = new_outputs;
                apply_plan(&mut s.graph, &inner_plan)
            });
            configure_downstream(&roots);

            let change = PortChange {
                dropped_outer,
                dropped_inner,
                reset_nodes: reset.iter().map(LeafRef::id).collect(),
            };
            log::debug!(
                "Changed ports of {}: {} connection(s) dropped, {} node(s) reset",
                child.id(),
                change.dropped_count(),
                change.reset_nodes.len()
            );
            Ok(change)
        })
    }
}

fn fits(source: Option<PortDefinition>, dest: Option<PortDefinition>) -> bool {
    matches!((source, dest), (Some(s), Some(d)) if s.port_type.is_compatible_with(&d.port_type))
}

fn apply_plan(graph: &mut crate::connection::ConnectionGraph, plan: &[Option<Connection>]) -> Vec<Connection> {
    let mut position = 0;
    graph.remap(|_| {
        let next = plan.get(position).copied().flatten();
        position += 1;
        next
    })
}
