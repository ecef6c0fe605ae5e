//! Marking, dispatch and completion of node executions
//!
//! `execute_*` marks the closure of not-yet-executed leaves the targets
//! depend on and dispatches every marked leaf whose inputs are available.
//! Each dispatched leaf becomes one unit of work on the worker pool; the
//! unit runs the model without holding any lock and re-acquires the lock
//! chain to publish its result, after which the leaf's dependents are
//! checked and dispatched in turn.

use std::collections::{HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::flat::{dependencies, dependents, inputs_available, order_leaves, LeafRef};
use super::WorkflowManager;
use crate::connection::PortHost;
use crate::constants::messages;
use crate::container::Job;
use crate::error::{EngineError, Result};
use crate::model::{ExecutionContext, NodeModel};
use crate::state::NodeState;
use crate::types::{NodeId, NodeMessage, PortValue};

impl WorkflowManager {
    /// Execute the given children and everything they depend on
    ///
    /// Returns once the closure is marked and ready leaves are dispatched;
    /// use [`Self::wait_while_in_execution`] to wait for completion.
    pub fn execute_up_to_here(self: &Arc<Self>, indices: &[u32]) -> Result<()> {
        self.with_lock(|| {
            let mut targets = Vec::new();
            for index in indices {
                targets.extend(self.start_leaves(*index)?);
            }
            self.mark_and_dispatch(targets);
            Ok(())
        })
    }

    /// Execute every leaf in this workflow
    pub fn execute_all(self: &Arc<Self>) {
        self.with_lock(|| {
            let targets = self.all_leaves();
            self.mark_and_dispatch(targets);
        });
    }

    /// Execute the given children and block until execution stops
    ///
    /// Returns `Ok(false)` if `timeout` passed first.
    pub fn execute_and_wait(self: &Arc<Self>, indices: &[u32], timeout: Duration) -> Result<bool> {
        self.execute_up_to_here(indices)?;
        Ok(self.wait_while_in_execution(timeout))
    }

    /// Execute everything and block until execution stops
    ///
    /// Returns false if `timeout` passed first.
    pub fn execute_all_and_wait(self: &Arc<Self>, timeout: Duration) -> bool {
        self.execute_all();
        self.wait_while_in_execution(timeout)
    }

    /// Cancel execution of child `index` (every leaf inside a nested workflow)
    ///
    /// Marked and queued leaves are demoted immediately, running leaves are
    /// asked to stop. Marked leaves downstream of cancelled ones are
    /// unmarked.
    pub fn cancel(self: &Arc<Self>, index: u32) -> Result<()> {
        self.with_lock(|| {
            for leaf in self.start_leaves(index)? {
                cancel_leaf(&leaf);
            }
            Ok(())
        })
    }

    /// Cancel every leaf in this workflow
    pub fn cancel_all(self: &Arc<Self>) {
        self.with_lock(|| {
            for leaf in self.all_leaves() {
                cancel_leaf(&leaf);
            }
        });
    }

    fn mark_and_dispatch(self: &Arc<Self>, targets: Vec<LeafRef>) {
        let closure = collect_for_execution(&targets);
        log::debug!("Marking {} node(s) for execution in {}", closure.len(), self.id());
        for leaf in &closure {
            leaf.wfm.update_leaf(leaf.index, |id, node| {
                let next = node.state.marked();
                node.set_state(id, next);
            });
        }
        for leaf in &closure {
            check_ready(leaf);
        }
    }

    /// Worker side of one unit of work
    fn run_job(
        self: Arc<Self>,
        index: u32,
        job_id: u64,
        model: Arc<dyn NodeModel>,
        inputs: Vec<Option<PortValue>>,
        ctx: ExecutionContext,
    ) {
        let started = self.with_lock(|| {
            self.update_leaf(index, |id, node| {
                let current = node.job.as_ref().map(|j| j.id) == Some(job_id);
                if current && node.state == NodeState::Queued && !ctx.is_canceled() {
                    node.set_state(id, NodeState::Executing);
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false)
        });
        if !started {
            return;
        }

        log::debug!("Executing node {}", ctx.node_id());
        let result = catch_unwind(AssertUnwindSafe(|| model.execute(&inputs, &ctx)))
            .unwrap_or_else(|panic| {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                log::warn!("Node {} panicked: {}", ctx.node_id(), detail);
                Err(EngineError::failed(format!("Node panicked: {}", detail)))
            });

        self.with_lock(|| self.finish_job(index, job_id, result, &ctx));
    }

    fn finish_job(
        self: &Arc<Self>,
        index: u32,
        job_id: u64,
        result: Result<Vec<PortValue>>,
        ctx: &ExecutionContext,
    ) {
        let leaf = LeafRef::new(self, index);
        let current = self
            .with_native(index, |n| {
                n.state == NodeState::Executing && n.job.as_ref().map(|j| j.id) == Some(job_id)
            })
            .unwrap_or(false);
        if !current {
            log::debug!("Discarding stale result for node {}", leaf.id());
            return;
        }

        let canceled = ctx.is_canceled() || matches!(result, Err(EngineError::Cancelled));
        match result {
            _ if canceled => {
                log::debug!("Node {} canceled", leaf.id());
                self.update_leaf(index, |id, node| {
                    node.job = None;
                    node.clear_values();
                    node.message = Some(NodeMessage::warning(messages::EXECUTION_CANCELED));
                    node.set_state(id, NodeState::Configured);
                });
                demote_marked_dependents(&leaf, None);
            }
            Ok(mut values) => {
                let warning = ctx.take_warning();
                self.update_leaf(index, |id, node| {
                    values.resize(node.outputs.len(), PortValue::Null);
                    node.output_values = values.into_iter().map(Some).collect();
                    node.job = None;
                    node.message = warning.map(NodeMessage::warning);
                    node.set_state(id, NodeState::Executed);
                });
                log::debug!("Node {} executed", leaf.id());
                for dependent in dependents(&leaf) {
                    let state = dependent.state();
                    if matches!(state, Some(NodeState::Idle | NodeState::UnconfiguredMarked)) {
                        dependent.wfm.configure_leaf(dependent.index);
                    }
                    check_ready(&dependent);
                }
            }
            Err(err) => {
                let text = err.user_message();
                log::debug!("Node {} failed: {}", leaf.id(), text);
                self.update_leaf(index, |id, node| {
                    node.job = None;
                    node.clear_values();
                    node.message = Some(NodeMessage::error(text.clone()));
                    node.set_state(id, NodeState::Configured);
                });
                demote_marked_dependents(&leaf, Some(&text));
            }
        }
    }
}

/// Not-executed leaves the targets depend on, targets included, in order
pub(crate) fn collect_for_execution(targets: &[LeafRef]) -> Vec<LeafRef> {
    let mut visited = HashSet::new();
    let mut closure = Vec::new();
    let mut queue: VecDeque<LeafRef> = targets.iter().cloned().collect();
    while let Some(leaf) = queue.pop_front() {
        if !visited.insert(leaf.id()) {
            continue;
        }
        match leaf.state() {
            Some(NodeState::Executed) | None => continue,
            Some(_) => {}
        }
        queue.extend(dependencies(&leaf));
        closure.push(leaf);
    }
    order_leaves(closure)
}

/// Dispatch a marked leaf if everything it depends on has executed
fn check_ready(leaf: &LeafRef) {
    let Some(state) = leaf.state() else {
        return;
    };
    if !state.is_marked() {
        return;
    }
    let waiting = dependencies(leaf).iter().any(|d| d.state() != Some(NodeState::Executed));
    if waiting || !inputs_available(leaf) {
        return;
    }
    if state == NodeState::UnconfiguredMarked && !leaf.wfm.configure_leaf(leaf.index) {
        let text = leaf
            .wfm
            .with_native(leaf.index, |n| n.message.clone())
            .flatten()
            .map(|m| m.text)
            .unwrap_or_else(|| "Node could not be configured".to_string());
        leaf.wfm.update_leaf(leaf.index, |id, node| {
            node.message = Some(NodeMessage::error(text.clone()));
            let next = node.state.unmarked();
            node.set_state(id, next);
        });
        demote_marked_dependents(leaf, Some(&text));
        return;
    }
    dispatch(leaf);
}

/// Move a configured, marked leaf to queued and hand it to the pool
fn dispatch(leaf: &LeafRef) {
    let wfm = &leaf.wfm;
    let project = wfm.project_context();
    let input_count = wfm.with_native(leaf.index, |n| n.inputs.len()).unwrap_or(0);
    let inputs: Vec<Option<PortValue>> = (0..input_count)
        .map(|port| wfm.resolve_input(PortHost::Node(leaf.index), port).value())
        .collect();

    let job = Job {
        id: project.next_job_id(),
        cancel: CancellationToken::new(),
    };
    let Some((model, settings)) = wfm.update_leaf(leaf.index, |id, node| {
        node.job = Some(job.clone());
        node.message = None;
        node.set_state(id, NodeState::Queued);
        (Arc::clone(&node.model), node.settings.clone())
    }) else {
        return;
    };

    let ctx = ExecutionContext::new(
        leaf.id(),
        settings,
        Arc::clone(&project.values),
        job.cancel.clone(),
    )
    .with_progress_sender(project.engine.dispatcher.progress_sender());
    let owner = Arc::clone(wfm);
    let index = leaf.index;
    log::debug!("Queued node {} as job {}", leaf.id(), job.id);
    project
        .engine
        .pool
        .submit(move || owner.run_job(index, job.id, model, inputs, ctx));
}

/// Demote one leaf and the marked leaves depending on it
fn cancel_leaf(leaf: &LeafRef) {
    let Some(state) = leaf.state() else {
        return;
    };
    match state {
        NodeState::UnconfiguredMarked | NodeState::ConfiguredMarked | NodeState::Queued => {
            leaf.wfm.update_leaf(leaf.index, |id, node| {
                if let Some(job) = node.job.take() {
                    job.cancel.cancel();
                }
                let next = if node.state == NodeState::Queued {
                    NodeState::Configured
                } else {
                    node.state.unmarked()
                };
                node.set_state(id, next);
            });
        }
        NodeState::Executing => {
            // The worker demotes the leaf once the model returns
            leaf.wfm.with_native(leaf.index, |n| {
                if let Some(job) = &n.job {
                    job.cancel.cancel();
                }
            });
        }
        NodeState::Idle | NodeState::Configured | NodeState::Executed => return,
    }
    demote_marked_dependents(leaf, None);
}

/// Unmark every marked leaf downstream of `origin`
///
/// With a failure text, each demoted leaf records that it was blocked.
fn demote_marked_dependents(origin: &LeafRef, failure: Option<&str>) {
    let origin_id: NodeId = origin.id();
    let mut visited = HashSet::new();
    let mut queue: VecDeque<LeafRef> = dependents(origin).into_iter().collect();
    while let Some(leaf) = queue.pop_front() {
        if !visited.insert(leaf.id()) {
            continue;
        }
        if !leaf.state().is_some_and(|s| s.is_marked()) {
            continue;
        }
        leaf.wfm.update_leaf(leaf.index, |id, node| {
            let next = node.state.unmarked();
            node.set_state(id, next);
            if let Some(text) = failure {
                node.message = Some(NodeMessage::error(format!(
                    "{} {}: {}",
                    messages::BLOCKED_BY_FAILURE,
                    origin_id,
                    text
                )));
            }
        });
        queue.extend(dependents(&leaf));
    }
}
