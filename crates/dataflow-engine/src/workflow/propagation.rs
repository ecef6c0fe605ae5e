//! Reset and configure propagation
//!
//! Resets travel strictly downstream and stop at leaves that are already
//! idle. Configuration travels downstream in dependency order; a leaf
//! whose inputs lack specs is left idle without asking its model, so a
//! failed configure never pushes anything further.

use std::sync::Arc;

use super::flat::{downstream_closure, inputs_available, order_leaves, LeafRef};
use super::WorkflowManager;
use crate::connection::PortHost;
use crate::error::{EngineError, Result};
use crate::model::ConfigureContext;
use crate::state::NodeState;
use crate::types::{NodeId, NodeMessage};

impl WorkflowManager {
    /// Configure leaf `index` from the specs on its inputs
    ///
    /// Returns whether the leaf holds a valid configuration afterwards.
    /// Queued, executing and executed leaves are left alone.
    pub(crate) fn configure_leaf(self: &Arc<Self>, index: u32) -> bool {
        let Some((model, settings, inputs, state)) = self.with_native(index, |n| {
            (Arc::clone(&n.model), n.settings.clone(), n.inputs.clone(), n.state)
        }) else {
            return false;
        };
        if state.is_executing() || state.is_executed() {
            return state.is_executed();
        }
        let marked = state.is_marked();

        let mut specs = Vec::with_capacity(inputs.len());
        let mut missing = false;
        for (port, definition) in inputs.iter().enumerate() {
            if self.is_input_connected(index, port) {
                let spec = self.resolve_input(PortHost::Node(index), port).spec();
                missing |= spec.is_none();
                specs.push(spec);
            } else {
                missing |= definition.required;
                specs.push(None);
            }
        }

        if missing {
            self.update_leaf(index, |id, node| {
                node.clear_outputs();
                node.message = None;
                let next = if marked { NodeState::UnconfiguredMarked } else { NodeState::Idle };
                node.set_state(id, next);
            });
            return false;
        }

        let id = self.id().child(index);
        let values = self.external_values();
        let ctx = ConfigureContext::new(&id, &settings, &specs, &values);
        let result = model.configure(&ctx);
        let warning = ctx.take_warning();

        match result {
            Ok(mut output_specs) => {
                self.update_leaf(index, |id, node| {
                    output_specs.resize(node.outputs.len(), None);
                    node.output_specs = output_specs;
                    node.message = warning.map(NodeMessage::warning);
                    let next = if marked { NodeState::ConfiguredMarked } else { NodeState::Configured };
                    node.set_state(id, next);
                });
                true
            }
            Err(err) => {
                log::debug!("Node {} failed to configure: {}", id, err);
                self.update_leaf(index, |id, node| {
                    node.clear_outputs();
                    node.message = Some(NodeMessage::error(err.user_message()));
                    let next = if marked { NodeState::UnconfiguredMarked } else { NodeState::Idle };
                    node.set_state(id, next);
                });
                false
            }
        }
    }

    /// Leaves a reset or reconfigure of child `index` starts from
    pub(crate) fn start_leaves(self: &Arc<Self>, index: u32) -> Result<Vec<LeafRef>> {
        if let Some(child) = self.child_workflow(index) {
            return Ok(child.all_leaves());
        }
        if self.contains(index) {
            Ok(vec![LeafRef::new(self, index)])
        } else {
            Err(EngineError::NodeNotFound(self.id().child(index)))
        }
    }

    /// Reset child `index` and everything downstream of it to idle
    ///
    /// Rejected without side effects while any affected leaf is in
    /// execution. Resetting twice in a row is the same as resetting once.
    pub fn reset_node(self: &Arc<Self>, index: u32) -> Result<()> {
        self.with_lock(|| {
            let starts = self.start_leaves(index)?;
            let affected = downstream_closure(&starts, true);
            ensure_not_in_execution(&affected, "reset")?;
            reset_leaves(&affected);
            Ok(())
        })
    }

    /// Reset child `index` and its downstream, then configure them again
    pub fn reset_and_configure_node(self: &Arc<Self>, index: u32) -> Result<()> {
        self.with_lock(|| {
            let starts = self.start_leaves(index)?;
            let affected = downstream_closure(&starts, false);
            ensure_not_in_execution(&affected, "reset")?;
            reset_leaves(&downstream_closure(&starts, true));
            configure_leaves(affected);
            Ok(())
        })
    }

    /// Whether [`Self::reset_node`] would be accepted
    pub fn can_reset_node(self: &Arc<Self>, index: u32) -> bool {
        self.with_lock(|| match self.start_leaves(index) {
            Ok(starts) => ensure_not_in_execution(&downstream_closure(&starts, true), "reset").is_ok(),
            Err(_) => false,
        })
    }

    /// Reset every leaf in this workflow and downstream of it, then reconfigure
    pub fn reset_all(self: &Arc<Self>) -> Result<()> {
        self.with_lock(|| {
            let starts = self.all_leaves();
            let affected = downstream_closure(&starts, false);
            ensure_not_in_execution(&affected, "reset")?;
            reset_leaves(&affected);
            configure_leaves(affected);
            Ok(())
        })
    }

    /// Reset executed leaves that miss an input value, with their downstream
    ///
    /// Returns the ids of the leaves found inconsistent.
    pub(crate) fn reset_inconsistent_leaves(self: &Arc<Self>) -> Vec<NodeId> {
        let mut found = Vec::new();
        for leaf in order_leaves(self.all_leaves()) {
            if leaf.state() == Some(NodeState::Executed) && !inputs_available(&leaf) {
                found.push(leaf.id());
                reset_leaves(&downstream_closure(std::slice::from_ref(&leaf), true));
            }
        }
        found
    }

    /// Configure every leaf that is not executed or in execution
    pub fn configure_all(self: &Arc<Self>) {
        self.with_lock(|| configure_leaves(self.all_leaves()));
    }
}

/// Fail with `EditRejected` if any leaf is marked, queued or executing
pub(crate) fn ensure_not_in_execution(leaves: &[LeafRef], operation: &str) -> Result<()> {
    for leaf in leaves {
        if let Some(state) = leaf.state() {
            if state.is_in_execution() {
                return Err(EngineError::rejected(format!(
                    "Cannot {}: node {} is {}",
                    operation,
                    leaf.id(),
                    state
                )));
            }
        }
    }
    Ok(())
}

/// Drop outputs and model state of each leaf and move it to idle
pub(crate) fn reset_leaves(leaves: &[LeafRef]) {
    for leaf in leaves {
        let model = leaf.wfm.update_leaf(leaf.index, |id, node| {
            node.clear_outputs();
            node.message = None;
            node.job = None;
            node.set_state(id, NodeState::Idle);
            Arc::clone(&node.model)
        });
        if let Some(model) = model {
            model.reset();
        }
    }
}

/// Configure leaves in dependency order, skipping those in execution
pub(crate) fn configure_leaves(leaves: Vec<LeafRef>) {
    for leaf in order_leaves(leaves) {
        let eligible = leaf
            .state()
            .is_some_and(|s| !s.is_in_execution() && !s.is_executed());
        if eligible {
            leaf.wfm.configure_leaf(leaf.index);
        }
    }
}

/// Configure the leaves behind `starts` and everything downstream
pub(crate) fn configure_downstream(starts: &[LeafRef]) {
    configure_leaves(downstream_closure(starts, false));
}
