//! Reset and configure propagation along connections

mod common;

use common::{engine, number, WAIT};
use dataflow_engine::{NodeState, PortHost, VecListener};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// a -> s1 <- b, s1 -> s2 <- b
fn diamond(project: &Arc<dataflow_engine::WorkflowManager>) -> (u32, u32, u32, u32) {
    let a = number(project, 1.0);
    let b = number(project, 2.0);
    let s1 = project.add_node("sum").unwrap();
    let s2 = project.add_node("sum").unwrap();
    project.add_connection(PortHost::Node(a), 0, PortHost::Node(s1), 0).unwrap();
    project.add_connection(PortHost::Node(b), 0, PortHost::Node(s1), 1).unwrap();
    project.add_connection(PortHost::Node(s1), 0, PortHost::Node(s2), 0).unwrap();
    project.add_connection(PortHost::Node(b), 0, PortHost::Node(s2), 1).unwrap();
    (a, b, s1, s2)
}

#[test]
fn test_reset_forces_downstream_idle() {
    let (engine, _probe) = engine();
    let project = engine.create_project("propagation");
    let (a, b, s1, s2) = diamond(&project);
    assert!(project.execute_all_and_wait(WAIT));
    assert_eq!(project.output_value(s2, 0), Some(json!(5.0)));

    project.reset_node(a).unwrap();
    assert_eq!(project.node_state(a).unwrap(), NodeState::Idle);
    assert_eq!(project.node_state(s1).unwrap(), NodeState::Idle);
    assert_eq!(project.node_state(s2).unwrap(), NodeState::Idle);
    // Not downstream of `a`
    assert_eq!(project.node_state(b).unwrap(), NodeState::Executed);
    assert_eq!(project.output_value(s2, 0), None);
}

#[test]
fn test_reset_is_idempotent() {
    let (engine, _probe) = engine();
    let project = engine.create_project("propagation");
    let (a, b, s1, s2) = diamond(&project);
    assert!(project.execute_all_and_wait(WAIT));

    project.reset_node(b).unwrap();
    let first: Vec<NodeState> = [a, b, s1, s2]
        .iter()
        .map(|i| project.node_state(*i).unwrap())
        .collect();
    project.reset_node(b).unwrap();
    let second: Vec<NodeState> = [a, b, s1, s2]
        .iter()
        .map(|i| project.node_state(*i).unwrap())
        .collect();
    assert_eq!(first, second);
    assert_eq!(
        first,
        vec![NodeState::Executed, NodeState::Idle, NodeState::Idle, NodeState::Idle]
    );
}

#[test]
fn test_reset_and_configure_restores_configured() {
    let (engine, _probe) = engine();
    let project = engine.create_project("propagation");
    let (a, _b, s1, s2) = diamond(&project);
    assert!(project.execute_all_and_wait(WAIT));

    project.reset_and_configure_node(a).unwrap();
    assert_eq!(project.node_state(a).unwrap(), NodeState::Configured);
    assert_eq!(project.node_state(s1).unwrap(), NodeState::Configured);
    assert_eq!(project.node_state(s2).unwrap(), NodeState::Configured);
}

#[test]
fn test_reset_all_reconfigures_everything() {
    let (engine, probe) = engine();
    let project = engine.create_project("propagation");
    let (a, b, s1, s2) = diamond(&project);
    assert!(project.execute_all_and_wait(WAIT));
    probe.clear();

    project.reset_all().unwrap();
    for index in [a, b, s1, s2] {
        assert_eq!(project.node_state(index).unwrap(), NodeState::Configured);
    }
    // Sources configure before the sums that read their specs
    let order = probe.configured();
    let position = |index: u32| order.iter().position(|id| *id == project.id().child(index));
    assert!(position(a) < position(s1));
    assert!(position(s1) < position(s2));
}

#[test]
fn test_configure_failure_halts_propagation() {
    let (engine, probe) = engine();
    let project = engine.create_project("propagation");
    let (a, _b, s1, s2) = diamond(&project);
    probe.clear();

    project.set_node_settings(a, json!({ "value": "not a number" })).unwrap();
    assert_eq!(project.node_state(a).unwrap(), NodeState::Idle);
    assert_eq!(project.node_state(s1).unwrap(), NodeState::Idle);
    assert_eq!(project.node_state(s2).unwrap(), NodeState::Idle);

    // Downstream models were never asked to configure
    let configured = probe.configured();
    assert_eq!(configured, vec![project.id().child(a)]);
}

#[test]
fn test_configure_order_follows_dependencies() {
    let (engine, probe) = engine();
    let project = engine.create_project("propagation");
    let (a, b, s1, s2) = diamond(&project);
    probe.clear();

    project.set_node_settings(b, json!({ "value": 7 })).unwrap();
    let configured = probe.configured();
    let expected: Vec<_> = [b, s1, s2].iter().map(|i| project.id().child(*i)).collect();
    assert_eq!(configured, expected);
    assert_eq!(project.node_state(a).unwrap(), NodeState::Configured);
}

#[test]
fn test_reset_emits_events() {
    let (engine, _probe) = engine();
    let project = engine.create_project("propagation");
    let (a, _b, s1, _s2) = diamond(&project);
    assert!(project.execute_all_and_wait(WAIT));

    let listener = Arc::new(VecListener::new());
    project.add_state_listener(listener.clone());
    project.reset_node(a).unwrap();

    let s1_id = project.id().child(s1);
    assert!(listener.wait_for(Duration::from_secs(5), |e| {
        e.node_id == s1_id && e.state == NodeState::Idle
    }));
}
