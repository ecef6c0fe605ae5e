//! Scheduling, failure blocking and cancellation

mod common;

use common::{engine, engine_with_workers, gate, number, wait_for_state, WAIT};
use dataflow_engine::{MessageKind, NodeState, PortDefinition, PortHost, PortType};
use serde_json::json;
use std::time::{Duration, Instant};

#[test]
fn test_failure_blocks_downstream() {
    let (engine, probe) = engine();
    let project = engine.create_project("scheduler");
    let fail = project
        .add_node_with_settings("fail", Some(json!({ "message": "disk full" })))
        .unwrap();
    let n = number(&project, 1.0);
    let sum = project.add_node("sum").unwrap();
    let after = project.add_node("sum").unwrap();
    project.add_connection(PortHost::Node(fail), 0, PortHost::Node(sum), 0).unwrap();
    project.add_connection(PortHost::Node(n), 0, PortHost::Node(sum), 1).unwrap();
    project.add_connection(PortHost::Node(sum), 0, PortHost::Node(after), 0).unwrap();
    project.add_connection(PortHost::Node(n), 0, PortHost::Node(after), 1).unwrap();

    assert!(project.execute_and_wait(&[after], WAIT).unwrap());

    assert_eq!(project.node_state(fail).unwrap(), NodeState::Configured);
    let failure = project.node_message(fail).unwrap().unwrap();
    assert_eq!(failure.kind, MessageKind::Error);
    assert_eq!(failure.text, "disk full");

    let fail_id = project.id().child(fail);
    for blocked in [sum, after] {
        assert_eq!(project.node_state(blocked).unwrap(), NodeState::Configured);
        let message = project.node_message(blocked).unwrap().unwrap();
        assert!(message.is_error());
        assert_eq!(
            message.text,
            format!("Blocked by upstream failure in {}: disk full", fail_id)
        );
        assert_eq!(probe.execution_count(&project.id().child(blocked)), 0);
    }
    // Independent branch still ran
    assert_eq!(project.node_state(n).unwrap(), NodeState::Executed);
    assert!(!project.is_in_execution());
}

#[test]
fn test_failed_node_runs_again_on_next_execute() {
    let (engine, probe) = engine();
    let project = engine.create_project("scheduler");
    let fail = project.add_node("fail").unwrap();

    assert!(project.execute_and_wait(&[fail], WAIT).unwrap());
    assert!(project.execute_and_wait(&[fail], WAIT).unwrap());
    assert_eq!(probe.execution_count(&project.id().child(fail)), 2);
}

#[test]
fn test_panic_is_reported_as_failure() {
    let (engine, _probe) = engine();
    let project = engine.create_project("scheduler");
    let panic = project.add_node("panic").unwrap();
    let counter = project.add_node("counter").unwrap();
    project.add_connection(PortHost::Node(panic), 0, PortHost::Node(counter), 0).unwrap();

    assert!(project.execute_all_and_wait(WAIT));
    assert_eq!(project.node_state(panic).unwrap(), NodeState::Configured);
    let message = project.node_message(panic).unwrap().unwrap();
    assert!(message.is_error());
    assert!(message.text.contains("model exploded"));
    assert_eq!(project.node_state(counter).unwrap(), NodeState::Configured);

    // The pool survives the panic
    let n = number(&project, 3.0);
    assert!(project.execute_and_wait(&[n], WAIT).unwrap());
    assert_eq!(project.node_state(n).unwrap(), NodeState::Executed);
}

#[test]
fn test_pool_bounds_concurrency() {
    let (engine, probe) = engine_with_workers(2);
    let project = engine.create_project("scheduler");
    let gates: Vec<u32> = (0..6).map(|_| gate(&project, "bounded")).collect();

    project.execute_all();
    let deadline = Instant::now() + WAIT;
    while probe.peak_running() < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(2));
    }
    // Give a third unit the chance to start if the bound were broken
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(probe.peak_running(), 2);
    let queued = gates
        .iter()
        .filter(|g| project.node_state(**g).unwrap() == NodeState::Queued)
        .count();
    assert_eq!(queued, 4);

    probe.open("bounded");
    assert!(project.wait_while_in_execution(WAIT));
    for g in gates {
        assert_eq!(project.node_state(g).unwrap(), NodeState::Executed);
    }
    assert!(probe.peak_running() <= 2);
    assert!(engine.worker_pool().peak_count() <= 2);
}

#[test]
fn test_cancel_demotes_marked_descendants_only() {
    let (engine, probe) = engine();
    let project = engine.create_project("scheduler");
    let slow = gate(&project, "never");
    let n = number(&project, 1.0);
    let s1 = project.add_node("sum").unwrap();
    let s2 = project.add_node("sum").unwrap();
    project.add_connection(PortHost::Node(slow), 0, PortHost::Node(s1), 0).unwrap();
    project.add_connection(PortHost::Node(n), 0, PortHost::Node(s1), 1).unwrap();
    project.add_connection(PortHost::Node(s1), 0, PortHost::Node(s2), 0).unwrap();
    project.add_connection(PortHost::Node(n), 0, PortHost::Node(s2), 1).unwrap();
    let sibling = gate(&project, "sibling");

    project.execute_all();
    assert!(wait_for_state(&project, slow, NodeState::Executing));
    assert!(wait_for_state(&project, sibling, NodeState::Executing));
    assert_eq!(project.node_state(s1).unwrap(), NodeState::ConfiguredMarked);
    assert_eq!(project.node_state(s2).unwrap(), NodeState::ConfiguredMarked);

    project.cancel(slow).unwrap();
    // Marked descendants are demoted at once
    assert_eq!(project.node_state(s1).unwrap(), NodeState::Configured);
    assert_eq!(project.node_state(s2).unwrap(), NodeState::Configured);
    assert_eq!(project.node_state(sibling).unwrap(), NodeState::Executing);

    assert!(wait_for_state(&project, slow, NodeState::Configured));
    let message = project.node_message(slow).unwrap().unwrap();
    assert_eq!(message.kind, MessageKind::Warning);
    assert_eq!(message.text, "Execution canceled");

    probe.open("sibling");
    assert!(project.wait_while_in_execution(WAIT));
    assert_eq!(project.node_state(sibling).unwrap(), NodeState::Executed);
    assert_eq!(project.node_state(s1).unwrap(), NodeState::Configured);
    assert_eq!(probe.execution_count(&project.id().child(s1)), 0);
}

#[test]
fn test_cancel_metanode_leaves_sibling_running() {
    let (engine, probe) = engine();
    let project = engine.create_project("scheduler");
    let outputs = vec![PortDefinition::optional("o", PortType::Number)];

    let meta = project.add_metanode("canceled", Vec::new(), outputs);
    let inner = project.workflow(meta).unwrap();
    let g1 = gate(&inner, "inside");
    let c1 = inner.add_node("counter").unwrap();
    inner.add_connection(PortHost::Node(g1), 0, PortHost::Node(c1), 0).unwrap();
    inner.add_connection(PortHost::Node(c1), 0, PortHost::Boundary, 0).unwrap();
    let downstream = project.add_node("counter").unwrap();
    project
        .add_connection(PortHost::Node(meta), 0, PortHost::Node(downstream), 0)
        .unwrap();

    let sibling = project.add_metanode("sibling", Vec::new(), Vec::new());
    let sibling_inner = project.workflow(sibling).unwrap();
    let g2 = gate(&sibling_inner, "sibling");

    project.execute_all();
    assert!(wait_for_state(&inner, g1, NodeState::Executing));
    assert!(wait_for_state(&sibling_inner, g2, NodeState::Executing));
    assert_eq!(inner.node_state(c1).unwrap(), NodeState::ConfiguredMarked);
    assert_eq!(project.node_state(downstream).unwrap(), NodeState::ConfiguredMarked);

    project.cancel(meta).unwrap();
    // Marked leaves inside and behind the metanode are demoted at once
    assert_eq!(inner.node_state(c1).unwrap(), NodeState::Configured);
    assert_eq!(project.node_state(downstream).unwrap(), NodeState::Configured);
    assert_eq!(sibling_inner.node_state(g2).unwrap(), NodeState::Executing);

    assert!(wait_for_state(&inner, g1, NodeState::Configured));
    assert_eq!(inner.node_message(g1).unwrap().unwrap().kind, MessageKind::Warning);
    assert_eq!(sibling_inner.node_state(g2).unwrap(), NodeState::Executing);

    probe.open("sibling");
    assert!(project.wait_while_in_execution(WAIT));
    assert_eq!(sibling_inner.node_state(g2).unwrap(), NodeState::Executed);
    assert_eq!(probe.execution_count(&inner.id().child(c1)), 0);
    assert_eq!(probe.execution_count(&project.id().child(downstream)), 0);
    assert_eq!(project.output_value(meta, 0), None);
}

#[test]
fn test_cancel_all_stops_queued_and_running() {
    let (engine, probe) = engine_with_workers(1);
    let project = engine.create_project("scheduler");
    let first = gate(&project, "closed");
    let second = gate(&project, "closed");

    project.execute_all();
    let deadline = Instant::now() + WAIT;
    while probe.peak_running() < 1 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(2));
    }

    project.cancel_all();
    assert!(project.wait_while_in_execution(WAIT));
    for g in [first, second] {
        assert_eq!(project.node_state(g).unwrap(), NodeState::Configured);
        assert_eq!(project.output_value(g, 0), None);
    }
    // Only one unit ever started
    assert_eq!(probe.executed().len(), 1);
}

#[test]
fn test_cancel_of_idle_node_is_noop() {
    let (engine, _probe) = engine();
    let project = engine.create_project("scheduler");
    let n = number(&project, 1.0);
    project.cancel(n).unwrap();
    assert_eq!(project.node_state(n).unwrap(), NodeState::Configured);
    assert!(project.cancel(99).is_err());
}

#[test]
fn test_execution_waits_for_slow_upstream() {
    let (engine, probe) = engine();
    let project = engine.create_project("scheduler");
    let slow = gate(&project, "upstream");
    let n = number(&project, 2.0);
    let sum = project.add_node("sum").unwrap();
    project.add_connection(PortHost::Node(slow), 0, PortHost::Node(sum), 0).unwrap();
    project.add_connection(PortHost::Node(n), 0, PortHost::Node(sum), 1).unwrap();

    project.execute_up_to_here(&[sum]).unwrap();
    assert!(wait_for_state(&project, n, NodeState::Executed));
    assert_eq!(project.node_state(sum).unwrap(), NodeState::ConfiguredMarked);

    probe.open("upstream");
    assert!(project.wait_while_in_execution(WAIT));
    assert_eq!(project.output_value(sum, 0), Some(json!(2.0)));
}
