//! Node lifecycle states and transition rules
//!
//! A leaf node moves forward along
//! `Idle -> Configured -> *Marked -> Queued -> Executing -> Executed`
//! and backwards to `Idle`/`Configured` through reset, cancellation or
//! failure. Workflow containers do not own a state; theirs is aggregated
//! from their leaves with [`aggregate_state`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// No valid configuration
    Idle,
    /// Configuration valid, not executed
    Configured,
    /// Part of a pending run, not yet configurable
    UnconfiguredMarked,
    /// Part of a pending run, configured and waiting for upstream
    ConfiguredMarked,
    /// Handed to the worker pool, not yet started
    Queued,
    /// Running on a worker
    Executing,
    /// Finished, outputs available
    Executed,
}

impl NodeState {
    /// Marked, queued or executing
    pub fn is_in_execution(&self) -> bool {
        matches!(
            self,
            NodeState::UnconfiguredMarked
                | NodeState::ConfiguredMarked
                | NodeState::Queued
                | NodeState::Executing
        )
    }

    /// Queued or executing on a worker
    pub fn is_executing(&self) -> bool {
        matches!(self, NodeState::Queued | NodeState::Executing)
    }

    pub fn is_marked(&self) -> bool {
        matches!(
            self,
            NodeState::UnconfiguredMarked | NodeState::ConfiguredMarked
        )
    }

    pub fn is_executed(&self) -> bool {
        matches!(self, NodeState::Executed)
    }

    /// Whether the node holds a valid configuration (output specs)
    pub fn has_configuration(&self) -> bool {
        !matches!(self, NodeState::Idle | NodeState::UnconfiguredMarked)
    }

    /// Check whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: NodeState) -> bool {
        use NodeState::*;

        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Idle, Configured)
                | (Idle, UnconfiguredMarked)
                | (Configured, Idle)
                | (Configured, ConfiguredMarked)
                | (UnconfiguredMarked, ConfiguredMarked)
                | (UnconfiguredMarked, Idle)
                | (ConfiguredMarked, Queued)
                | (ConfiguredMarked, Configured)
                | (ConfiguredMarked, Idle)
                | (Queued, Executing)
                | (Queued, Configured)
                | (Executing, Executed)
                | (Executing, Configured)
                | (Executed, Idle)
                | (Executed, Configured)
        )
    }

    /// State after marking for execution
    pub fn marked(&self) -> NodeState {
        match self {
            NodeState::Idle => NodeState::UnconfiguredMarked,
            NodeState::Configured => NodeState::ConfiguredMarked,
            other => *other,
        }
    }

    /// State after removing an execution mark
    pub fn unmarked(&self) -> NodeState {
        match self {
            NodeState::UnconfiguredMarked => NodeState::Idle,
            NodeState::ConfiguredMarked => NodeState::Configured,
            other => *other,
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NodeState::Idle => "IDLE",
            NodeState::Configured => "CONFIGURED",
            NodeState::UnconfiguredMarked => "UNCONFIGURED_MARKED",
            NodeState::ConfiguredMarked => "CONFIGURED_MARKED",
            NodeState::Queued => "QUEUED",
            NodeState::Executing => "EXECUTING",
            NodeState::Executed => "EXECUTED",
        };
        f.write_str(label)
    }
}

/// Aggregate the states of a workflow's leaves into one state
///
/// Each entry is a leaf state plus whether the leaf is relevant for the
/// executed check (it feeds a boundary output, or the workflow has no
/// connected outputs).
pub fn aggregate_state(leaves: &[(NodeState, bool)]) -> NodeState {
    if leaves.is_empty() {
        return NodeState::Idle;
    }
    if leaves.iter().any(|(s, _)| s.is_executing()) {
        return NodeState::Executing;
    }
    if leaves.iter().any(|(s, _)| *s == NodeState::UnconfiguredMarked) {
        return NodeState::UnconfiguredMarked;
    }
    if leaves.iter().any(|(s, _)| *s == NodeState::ConfiguredMarked) {
        return NodeState::ConfiguredMarked;
    }

    let mut relevant = leaves.iter().filter(|(_, r)| *r).map(|(s, _)| *s).peekable();
    if relevant.peek().is_none() {
        return NodeState::Configured;
    }
    let relevant: Vec<NodeState> = relevant.collect();
    if relevant.iter().all(|s| s.is_executed()) {
        NodeState::Executed
    } else if relevant.iter().any(|s| *s == NodeState::Idle) {
        NodeState::Idle
    } else {
        NodeState::Configured
    }
}
