//! Metanodes, components, edits while executing, external values and events

mod common;

use common::{engine, gate, number, wait_for_state, WAIT};
use dataflow_engine::{
    EngineError, ExternalValue, NodeProgressEvent, NodeState, NodeStateEvent, NodeStateListener,
    PortDefinition, PortHost, PortType, VecListener, WorkflowKind, WorkflowManager,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Nested workflow with a fast output (0) and a gated output (1)
///
/// Returns (nested index, consumer of output 0, gate index inside).
fn split_outputs(project: &Arc<WorkflowManager>, kind: WorkflowKind, gate_name: &str) -> (u32, u32, u32) {
    let outputs = vec![
        PortDefinition::optional("fast", PortType::Number),
        PortDefinition::optional("slow", PortType::Number),
    ];
    let nested = match kind {
        WorkflowKind::Component => project.add_component("nested", Vec::new(), outputs),
        _ => project.add_metanode("nested", Vec::new(), outputs),
    };
    let inner = project.workflow(nested).unwrap();
    let fast = number(&inner, 4.0);
    let slow = gate(&inner, gate_name);
    inner.add_connection(PortHost::Node(fast), 0, PortHost::Boundary, 0).unwrap();
    inner.add_connection(PortHost::Node(slow), 0, PortHost::Boundary, 1).unwrap();

    let consumer = project.add_node("counter").unwrap();
    project
        .add_connection(PortHost::Node(nested), 0, PortHost::Node(consumer), 0)
        .unwrap();
    (nested, consumer, slow)
}

#[test]
fn test_component_outputs_wait_for_all_inner_nodes() {
    let (engine, probe) = engine();
    let project = engine.create_project("nesting");
    let (comp, consumer, slow) = split_outputs(&project, WorkflowKind::Component, "component");
    let inner = project.workflow(comp).unwrap();

    project.execute_all();
    assert!(wait_for_state(&inner, slow, NodeState::Executing));
    std::thread::sleep(Duration::from_millis(30));

    // The fast inner node finished, but the component did not
    assert_eq!(inner.node_state(1).unwrap(), NodeState::Executed);
    assert_eq!(project.output_value(comp, 0), None);
    assert_eq!(project.node_state(consumer).unwrap(), NodeState::ConfiguredMarked);
    assert_eq!(project.node_state(comp).unwrap(), NodeState::Executing);

    probe.open("component");
    assert!(project.wait_while_in_execution(WAIT));
    assert_eq!(project.node_state(comp).unwrap(), NodeState::Executed);
    assert_eq!(project.output_value(comp, 0), Some(json!(4.0)));
    assert_eq!(project.node_state(consumer).unwrap(), NodeState::Executed);
}

#[test]
fn test_metanode_outputs_resolve_per_port() {
    let (engine, probe) = engine();
    let project = engine.create_project("nesting");
    let (meta, consumer, slow) = split_outputs(&project, WorkflowKind::Metanode, "metanode");
    let inner = project.workflow(meta).unwrap();

    project.execute_all();
    assert!(wait_for_state(&project, consumer, NodeState::Executed));
    assert_eq!(inner.node_state(slow).unwrap(), NodeState::Executing);
    assert_eq!(project.output_value(meta, 0), Some(json!(4.0)));
    assert_eq!(project.output_value(meta, 1), None);

    probe.open("metanode");
    assert!(project.wait_while_in_execution(WAIT));
    assert_eq!(project.output_value(meta, 1), Some(json!(0)));
}

#[test]
fn test_metanode_state_ignores_nodes_not_feeding_outputs() {
    let (engine, _probe) = engine();
    let project = engine.create_project("nesting");
    let meta = project.add_metanode(
        "meta",
        Vec::new(),
        vec![PortDefinition::optional("o", PortType::Number)],
    );
    let inner = project.workflow(meta).unwrap();
    let used = number(&inner, 1.0);
    let _unused = number(&inner, 2.0);
    inner.add_connection(PortHost::Node(used), 0, PortHost::Boundary, 0).unwrap();

    assert!(inner.execute_and_wait(&[used], WAIT).unwrap());
    assert_eq!(inner.state(), NodeState::Executed);
    assert_eq!(project.node_state(meta).unwrap(), NodeState::Executed);
}

#[test]
fn test_project_message_names_failing_node() {
    let (engine, _probe) = engine();
    let project = engine.create_project("nesting");
    let meta = project.add_metanode(
        "meta",
        Vec::new(),
        vec![PortDefinition::optional("o", PortType::Number)],
    );
    let inner = project.workflow(meta).unwrap();
    let fail = inner
        .add_node_with_settings("fail", Some(json!({ "message": "no space left" })))
        .unwrap();
    inner.add_connection(PortHost::Node(fail), 0, PortHost::Boundary, 0).unwrap();
    // Lists before the nested leaves
    let consumer = project.add_node("counter").unwrap();
    project
        .add_connection(PortHost::Node(meta), 0, PortHost::Node(consumer), 0)
        .unwrap();

    assert!(project.execute_all_and_wait(WAIT));
    assert!(project
        .node_message(consumer)
        .unwrap()
        .unwrap()
        .text
        .starts_with("Blocked by upstream failure"));
    let failing = inner.id().child(fail);
    assert_eq!(
        project.message().unwrap().text,
        format!("Error in node {}: no space left", failing)
    );
}

#[test]
fn test_replace_node_keeps_compatible_connections() {
    let (engine, _probe) = engine();
    let project = engine.create_project("nesting");
    let a = number(&project, 1.0);
    let b = number(&project, 2.0);
    let sum = project.add_node("sum").unwrap();
    project.add_connection(PortHost::Node(a), 0, PortHost::Node(sum), 0).unwrap();
    project.add_connection(PortHost::Node(b), 0, PortHost::Node(sum), 1).unwrap();
    project.rename_node(a, "first").unwrap();

    let replaced = project.replace_node(a, "counter").unwrap();
    assert!(replaced.dropped_connections().is_empty());
    assert_eq!(replaced.previous_type(), "number");
    let info = project.node_info(a).unwrap();
    assert_eq!(info.node_type.as_deref(), Some("counter"));
    assert_eq!(info.name, "first");
    assert_eq!(project.node_state(sum).unwrap(), NodeState::Configured);

    // A node without inputs cannot keep the incoming connections
    let replaced = project.replace_node(sum, "number").unwrap();
    assert_eq!(replaced.dropped_connections().len(), 2);
    assert!(project.connections().is_empty());
    assert_eq!(project.node_state(sum).unwrap(), NodeState::Configured);
}

#[test]
fn test_replace_node_undo_restores_type_and_connections() {
    let (engine, _probe) = engine();
    let project = engine.create_project("nesting");
    let a = number(&project, 1.0);
    let b = number(&project, 2.0);
    let sum = project.add_node("sum").unwrap();
    project.add_connection(PortHost::Node(a), 0, PortHost::Node(sum), 0).unwrap();
    project.add_connection(PortHost::Node(b), 0, PortHost::Node(sum), 1).unwrap();
    let before = project.connections();

    let replaced = project.replace_node(sum, "number").unwrap();
    assert_eq!(replaced.index(), sum);
    assert_eq!(replaced.dropped_connections().len(), 2);
    assert!(project.connections().is_empty());
    assert!(replaced.can_undo());

    replaced.undo().unwrap();
    let info = project.node_info(sum).unwrap();
    assert_eq!(info.node_type.as_deref(), Some("sum"));
    assert_eq!(project.connections(), before);
    assert_eq!(project.node_state(sum).unwrap(), NodeState::Configured);
    assert!(project.execute_and_wait(&[sum], WAIT).unwrap());
    assert_eq!(project.output_value(sum, 0), Some(json!(3.0)));

    // A second undo is refused
    assert!(!replaced.can_undo());
    assert!(matches!(replaced.undo(), Err(EngineError::EditRejected(_))));
}

#[test]
fn test_replace_node_undo_restores_settings() {
    let (engine, _probe) = engine();
    let project = engine.create_project("nesting");
    let a = number(&project, 5.0);
    let counter = project.add_node("counter").unwrap();
    project.add_connection(PortHost::Node(a), 0, PortHost::Node(counter), 0).unwrap();

    let replaced = project.replace_node(a, "gate").unwrap();
    assert!(replaced.dropped_connections().is_empty());
    assert_eq!(project.node_settings(a).unwrap(), json!({ "gate": "default", "value": 0 }));

    replaced.undo().unwrap();
    assert_eq!(project.node_info(a).unwrap().node_type.as_deref(), Some("number"));
    assert_eq!(project.node_settings(a).unwrap(), json!({ "value": 5.0 }));
    assert!(project.execute_and_wait(&[a], WAIT).unwrap());
    assert_eq!(project.output_value(a, 0), Some(json!(5.0)));
}

#[test]
fn test_replace_node_undo_refused_after_later_replace() {
    let (engine, _probe) = engine();
    let project = engine.create_project("nesting");
    let a = number(&project, 1.0);

    let first = project.replace_node(a, "gate").unwrap();
    let second = project.replace_node(a, "fail").unwrap();
    assert!(!first.can_undo());
    assert!(matches!(first.undo(), Err(EngineError::EditRejected(_))));
    assert_eq!(project.node_info(a).unwrap().node_type.as_deref(), Some("fail"));

    second.undo().unwrap();
    assert_eq!(project.node_info(a).unwrap().node_type.as_deref(), Some("gate"));
}

#[test]
fn test_edits_rejected_while_executing() {
    let (engine, probe) = engine();
    let project = engine.create_project("nesting");
    let slow = gate(&project, "edits");
    let n = number(&project, 1.0);
    let sum = project.add_node("sum").unwrap();
    project.add_connection(PortHost::Node(slow), 0, PortHost::Node(sum), 0).unwrap();
    project.add_connection(PortHost::Node(n), 0, PortHost::Node(sum), 1).unwrap();

    project.execute_up_to_here(&[sum]).unwrap();
    assert!(wait_for_state(&project, slow, NodeState::Executing));

    let before = project.connections();
    assert!(!project.can_remove_node(slow));
    assert!(matches!(project.remove_node(slow), Err(EngineError::EditRejected(_))));
    assert!(matches!(
        project.remove_connection(PortHost::Node(sum), 0),
        Err(EngineError::EditRejected(_))
    ));
    assert!(matches!(
        project.set_node_settings(slow, json!({ "gate": "other" })),
        Err(EngineError::EditRejected(_))
    ));
    assert!(!project.can_reset_node(slow));
    assert!(matches!(project.reset_node(n), Err(EngineError::EditRejected(_))));
    assert!(!project.can_replace_node(sum));
    assert_eq!(project.connections(), before);

    // Unrelated edits go through
    let free = number(&project, 9.0);
    project.set_node_settings(free, json!({ "value": 10 })).unwrap();

    probe.open("edits");
    assert!(project.wait_while_in_execution(WAIT));
    project.remove_node(slow).unwrap();
    assert_eq!(project.node_state(sum).unwrap(), NodeState::Idle);
}

#[test]
fn test_credential_update_keeps_executed_node() {
    let (engine, _probe) = engine();
    let project = engine.create_project("nesting");
    let values = project.external_values();
    values.update("db", ExternalValue::credential("alice", "pw1"));

    let reader = project
        .add_node_with_settings("credential", Some(json!({ "name": "db" })))
        .unwrap();
    assert!(project.execute_and_wait(&[reader], WAIT).unwrap());
    assert_eq!(project.output_value(reader, 0), Some(json!("alice")));

    values.update("db", ExternalValue::credential("bob", "pw2"));
    assert_eq!(project.node_state(reader).unwrap(), NodeState::Executed);
    assert_eq!(project.output_value(reader, 0), Some(json!("alice")));

    // The new value is used once the node runs again
    project.reset_node(reader).unwrap();
    assert!(project.execute_and_wait(&[reader], WAIT).unwrap());
    assert_eq!(project.output_value(reader, 0), Some(json!("bob")));
}

#[test]
fn test_missing_credential_fails_configure() {
    let (engine, _probe) = engine();
    let project = engine.create_project("nesting");
    let reader = project
        .add_node_with_settings("credential", Some(json!({ "name": "absent" })))
        .unwrap();
    assert_eq!(project.node_state(reader).unwrap(), NodeState::Idle);

    assert!(project.execute_and_wait(&[reader], WAIT).unwrap());
    assert_eq!(project.node_state(reader).unwrap(), NodeState::Idle);
    let message = project.node_message(reader).unwrap().unwrap();
    assert_eq!(message.text, "Credential 'absent' is not defined");
}

#[test]
fn test_events_arrive_in_order() {
    let (engine, _probe) = engine();
    let project = engine.create_project("nesting");
    let a = number(&project, 1.0);
    let b = number(&project, 2.0);
    let sum = project.add_node("sum").unwrap();
    project.add_connection(PortHost::Node(a), 0, PortHost::Node(sum), 0).unwrap();
    project.add_connection(PortHost::Node(b), 0, PortHost::Node(sum), 1).unwrap();

    let listener = Arc::new(VecListener::new());
    let id = project.add_state_listener(listener.clone());
    assert!(project.execute_and_wait(&[sum], WAIT).unwrap());

    let sum_id = project.id().child(sum);
    assert!(listener.wait_for(WAIT, |e| e.node_id == sum_id && e.state == NodeState::Executed));
    let expected = vec![
        NodeState::ConfiguredMarked,
        NodeState::Queued,
        NodeState::Executing,
        NodeState::Executed,
    ];
    assert_eq!(listener.states_of(&sum_id), expected);
    assert_eq!(listener.states_of(&project.id().child(a)), expected);

    // The project's aggregate state ends executed
    let project_id = project.id().clone();
    assert!(listener.wait_for(WAIT, |e| e.node_id == project_id && e.state == NodeState::Executed));
    assert!(project.remove_state_listener(id));
}

/// Records state and progress events of one node in delivery order
struct TimelineListener {
    node_id: dataflow_engine::NodeId,
    timeline: Mutex<Vec<String>>,
}

impl NodeStateListener for TimelineListener {
    fn state_changed(&self, event: &NodeStateEvent) {
        if event.node_id == self.node_id {
            self.timeline.lock().push(format!("{:?}", event.state));
        }
    }

    fn progress_changed(&self, event: &NodeProgressEvent) {
        if event.node_id == self.node_id {
            let message = event.message.clone().unwrap_or_default();
            self.timeline.lock().push(format!("{} {}", event.progress, message));
        }
    }
}

#[test]
fn test_progress_delivered_between_state_events() {
    let (engine, _probe) = engine();
    let project = engine.create_project("nesting");
    let meta = project.add_metanode("meta", Vec::new(), Vec::new());
    let inner = project.workflow(meta).unwrap();

    // Listen before the node exists so its whole history is recorded
    let node_id = inner.id().child(1);
    let timeline = Arc::new(TimelineListener {
        node_id: node_id.clone(),
        timeline: Mutex::new(Vec::new()),
    });
    let states = Arc::new(VecListener::new());
    project.add_state_listener(timeline.clone());
    project.add_state_listener(states.clone());
    let node = inner
        .add_node_with_settings("progress", Some(json!({ "steps": 2 })))
        .unwrap();
    assert_eq!(inner.id().child(node), node_id);

    assert!(inner.execute_and_wait(&[node], WAIT).unwrap());
    assert!(states.wait_for(WAIT, |e| e.node_id == node_id && e.state == NodeState::Executed));
    assert_eq!(
        *timeline.timeline.lock(),
        vec![
            "Configured".to_string(),
            "ConfiguredMarked".to_string(),
            "Queued".to_string(),
            "Executing".to_string(),
            "0.5 step 1".to_string(),
            "1 step 2".to_string(),
            "Executed".to_string(),
        ]
    );
    let reported = states.progress_of(&node_id);
    assert_eq!(reported.len(), 2);
    assert_eq!(reported[1].message.as_deref(), Some("step 2"));
}

#[test]
fn test_scoped_listener_only_sees_its_subtree() {
    let (engine, _probe) = engine();
    let project = engine.create_project("nesting");
    let meta = project.add_metanode("meta", Vec::new(), Vec::new());
    let inner = project.workflow(meta).unwrap();

    let listener = Arc::new(VecListener::new());
    inner.add_state_listener(listener.clone());
    let outside = number(&project, 1.0);
    let inside = number(&inner, 1.0);
    assert!(project.execute_all_and_wait(WAIT));

    let inside_id = inner.id().child(inside);
    assert!(listener.wait_for(WAIT, |e| e.node_id == inside_id && e.state == NodeState::Executed));
    let outside_id = project.id().child(outside);
    assert!(listener
        .events()
        .iter()
        .all(|e| e.node_id == *inner.id() || e.node_id.is_descendant_of(inner.id())));
    assert!(listener.states_of(&outside_id).is_empty());
}

#[test]
fn test_find_locates_nested_nodes() {
    let (engine, _probe) = engine();
    let project = engine.create_project("nesting");
    let meta = project.add_metanode("meta", Vec::new(), Vec::new());
    let inner = project.workflow(meta).unwrap();
    let leaf = number(&inner, 1.0);

    let id = inner.id().child(leaf);
    let (owner, index) = engine.find(&id).unwrap();
    assert_eq!(owner.id(), inner.id());
    assert_eq!(index, leaf);
    assert!(engine.find(&project.id().child(42)).is_none());
}
