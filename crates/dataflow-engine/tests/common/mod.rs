//! Node doubles shared by the integration tests
//!
//! Every engine built here records what its models did in a [`Probe`], so
//! tests can assert on configure and execute calls without peeking at
//! engine internals.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dataflow_engine::{
    ConfigureContext, Engine, EngineConfig, EngineError, ExecutionContext, FnNodeFactory,
    NodeCategory, NodeDescriptor, NodeId, NodeModel, NodeRegistry, NodeState, PortSpec, PortType,
    PortValue, Result, WorkflowManager,
};
use parking_lot::{Condvar, Mutex};
use serde_json::json;

pub const WAIT: Duration = Duration::from_secs(10);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Record of model activity plus named gates blocking `gate` nodes
#[derive(Default)]
pub struct Probe {
    configured: Mutex<Vec<NodeId>>,
    executed: Mutex<Vec<NodeId>>,
    gates: Mutex<HashMap<String, bool>>,
    gate_changed: Condvar,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl Probe {
    pub fn configured(&self) -> Vec<NodeId> {
        self.configured.lock().clone()
    }

    pub fn executed(&self) -> Vec<NodeId> {
        self.executed.lock().clone()
    }

    pub fn execution_count(&self, id: &NodeId) -> usize {
        self.executed.lock().iter().filter(|e| *e == id).count()
    }

    pub fn clear(&self) {
        self.configured.lock().clear();
        self.executed.lock().clear();
    }

    /// Highest number of gate nodes running at once
    pub fn peak_running(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn open(&self, gate: &str) {
        self.gates.lock().insert(gate.to_string(), true);
        self.gate_changed.notify_all();
    }

    fn wait_gate(&self, gate: &str, ctx: &ExecutionContext) -> Result<()> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let result = self.block_until_open(gate, || ctx.check_canceled());
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn block_until_open(&self, gate: &str, check: impl Fn() -> Result<()>) -> Result<()> {
        let mut gates = self.gates.lock();
        while !gates.get(gate).copied().unwrap_or(false) {
            check()?;
            self.gate_changed.wait_for(&mut gates, Duration::from_millis(5));
        }
        Ok(())
    }

    fn record_configure(&self, ctx: &ConfigureContext<'_>) {
        self.configured.lock().push(ctx.node_id().clone());
    }

    fn record_execute(&self, ctx: &ExecutionContext) {
        self.executed.lock().push(ctx.node_id().clone());
    }
}

fn number_spec() -> PortSpec {
    json!({ "type": "number" })
}

fn is_number_spec(spec: Option<&PortSpec>) -> bool {
    spec.and_then(|s| s.get("type")).and_then(|t| t.as_str()) == Some("number")
}

/// `number`: emits `settings.value`
struct NumberModel(Arc<Probe>);

impl NodeModel for NumberModel {
    fn configure(&self, ctx: &ConfigureContext<'_>) -> Result<Vec<Option<PortSpec>>> {
        self.0.record_configure(ctx);
        if !ctx.settings()["value"].is_number() {
            return Err(EngineError::invalid_settings("value must be a number"));
        }
        Ok(vec![Some(number_spec())])
    }

    fn execute(&self, _inputs: &[Option<PortValue>], ctx: &ExecutionContext) -> Result<Vec<PortValue>> {
        self.0.record_execute(ctx);
        Ok(vec![ctx.settings()["value"].clone()])
    }
}

/// `sum`: adds its two required number inputs
struct SumModel(Arc<Probe>);

impl NodeModel for SumModel {
    fn configure(&self, ctx: &ConfigureContext<'_>) -> Result<Vec<Option<PortSpec>>> {
        self.0.record_configure(ctx);
        for port in 0..2 {
            if !is_number_spec(ctx.input_spec(port)) {
                return Err(EngineError::invalid_settings("inputs must be numbers"));
            }
        }
        Ok(vec![Some(number_spec())])
    }

    fn execute(&self, inputs: &[Option<PortValue>], ctx: &ExecutionContext) -> Result<Vec<PortValue>> {
        self.0.record_execute(ctx);
        let total: f64 = inputs
            .iter()
            .map(|v| v.as_ref().and_then(|v| v.as_f64()).unwrap_or(0.0))
            .sum();
        Ok(vec![json!(total)])
    }
}

/// `fail`: configures, then fails with `settings.message`
struct FailModel(Arc<Probe>);

impl NodeModel for FailModel {
    fn configure(&self, ctx: &ConfigureContext<'_>) -> Result<Vec<Option<PortSpec>>> {
        self.0.record_configure(ctx);
        Ok(vec![Some(number_spec())])
    }

    fn execute(&self, _inputs: &[Option<PortValue>], ctx: &ExecutionContext) -> Result<Vec<PortValue>> {
        self.0.record_execute(ctx);
        let message = ctx.settings()["message"].as_str().unwrap_or("boom").to_string();
        Err(EngineError::failed(message))
    }
}

/// `panic`: panics while executing
struct PanicModel(Arc<Probe>);

impl NodeModel for PanicModel {
    fn configure(&self, ctx: &ConfigureContext<'_>) -> Result<Vec<Option<PortSpec>>> {
        self.0.record_configure(ctx);
        Ok(vec![Some(number_spec())])
    }

    fn execute(&self, _inputs: &[Option<PortValue>], ctx: &ExecutionContext) -> Result<Vec<PortValue>> {
        self.0.record_execute(ctx);
        panic!("model exploded");
    }
}

/// `gate`: blocks until the gate named in `settings.gate` opens
///
/// Forwards its optional input, or emits `settings.value`.
struct GateModel(Arc<Probe>);

impl NodeModel for GateModel {
    fn configure(&self, ctx: &ConfigureContext<'_>) -> Result<Vec<Option<PortSpec>>> {
        self.0.record_configure(ctx);
        Ok(vec![Some(number_spec())])
    }

    fn execute(&self, inputs: &[Option<PortValue>], ctx: &ExecutionContext) -> Result<Vec<PortValue>> {
        self.0.record_execute(ctx);
        let gate = ctx.settings()["gate"].as_str().unwrap_or("default").to_string();
        self.0.wait_gate(&gate, ctx)?;
        let value = inputs
            .first()
            .cloned()
            .flatten()
            .unwrap_or_else(|| ctx.settings()["value"].clone());
        Ok(vec![value])
    }
}

/// `progress`: reports `settings.steps` progress steps, then emits the count
struct ProgressModel(Arc<Probe>);

impl NodeModel for ProgressModel {
    fn configure(&self, ctx: &ConfigureContext<'_>) -> Result<Vec<Option<PortSpec>>> {
        self.0.record_configure(ctx);
        Ok(vec![Some(number_spec())])
    }

    fn execute(&self, _inputs: &[Option<PortValue>], ctx: &ExecutionContext) -> Result<Vec<PortValue>> {
        self.0.record_execute(ctx);
        let steps = ctx.settings()["steps"].as_u64().unwrap_or(1).max(1);
        for step in 1..=steps {
            ctx.check_canceled()?;
            ctx.set_progress(step as f64 / steps as f64, Some(format!("step {}", step)));
        }
        Ok(vec![json!(steps)])
    }
}

/// `credential`: emits the login of the credential named in `settings.name`
struct CredentialModel(Arc<Probe>);

impl NodeModel for CredentialModel {
    fn configure(&self, ctx: &ConfigureContext<'_>) -> Result<Vec<Option<PortSpec>>> {
        self.0.record_configure(ctx);
        let name = ctx.settings()["name"].as_str().unwrap_or_default();
        if ctx.external_value(name).is_none() {
            return Err(EngineError::invalid_settings(format!("Credential '{}' is not defined", name)));
        }
        Ok(vec![Some(json!({ "type": "text" }))])
    }

    fn execute(&self, _inputs: &[Option<PortValue>], ctx: &ExecutionContext) -> Result<Vec<PortValue>> {
        self.0.record_execute(ctx);
        let name = ctx.settings()["name"].as_str().unwrap_or_default();
        let value = ctx
            .external_value(name)
            .ok_or_else(|| EngineError::failed(format!("Credential '{}' is not defined", name)))?;
        Ok(vec![value["login"].clone()])
    }
}

/// `counter`: emits how often it executed; the count is internal state
struct CounterModel {
    probe: Arc<Probe>,
    count: AtomicUsize,
}

impl NodeModel for CounterModel {
    fn configure(&self, ctx: &ConfigureContext<'_>) -> Result<Vec<Option<PortSpec>>> {
        self.probe.record_configure(ctx);
        Ok(vec![Some(number_spec())])
    }

    fn execute(&self, _inputs: &[Option<PortValue>], ctx: &ExecutionContext) -> Result<Vec<PortValue>> {
        self.probe.record_execute(ctx);
        Ok(vec![json!(self.count.fetch_add(1, Ordering::SeqCst) + 1)])
    }

    fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
    }

    fn save_internals(&self) -> Option<serde_json::Value> {
        Some(json!({ "count": self.count.load(Ordering::SeqCst) }))
    }

    fn load_internals(&self, internals: &serde_json::Value) -> Result<()> {
        let count = internals["count"]
            .as_u64()
            .ok_or_else(|| EngineError::invalid_settings("count missing"))?;
        self.count.store(count as usize, Ordering::SeqCst);
        Ok(())
    }
}

/// `slow-load`: executes at once, but loading its saved state waits for
/// the gate named in `settings.gate`
struct SlowLoadModel {
    probe: Arc<Probe>,
    gate: Mutex<Option<String>>,
}

impl NodeModel for SlowLoadModel {
    fn configure(&self, ctx: &ConfigureContext<'_>) -> Result<Vec<Option<PortSpec>>> {
        self.probe.record_configure(ctx);
        Ok(vec![Some(number_spec())])
    }

    fn execute(&self, _inputs: &[Option<PortValue>], ctx: &ExecutionContext) -> Result<Vec<PortValue>> {
        self.probe.record_execute(ctx);
        let gate = ctx.settings()["gate"].as_str().unwrap_or("default").to_string();
        *self.gate.lock() = Some(gate);
        Ok(vec![ctx.settings()["value"].clone()])
    }

    fn reset(&self) {
        *self.gate.lock() = None;
    }

    fn save_internals(&self) -> Option<serde_json::Value> {
        self.gate.lock().as_ref().map(|gate| json!({ "gate": gate }))
    }

    fn load_internals(&self, internals: &serde_json::Value) -> Result<()> {
        let gate = internals["gate"]
            .as_str()
            .ok_or_else(|| EngineError::invalid_settings("gate missing"))?
            .to_string();
        self.probe.block_until_open(&gate, || Ok(()))?;
        *self.gate.lock() = Some(gate);
        Ok(())
    }
}

fn descriptor(node_type: &str, inputs: &[(&str, bool)], outputs: usize) -> NodeDescriptor {
    let mut descriptor = NodeDescriptor::new(node_type, NodeCategory::Testing, node_type);
    for (name, required) in inputs {
        descriptor = if *required {
            descriptor.with_input(*name, PortType::Number)
        } else {
            descriptor.with_optional_input(*name, PortType::Number)
        };
    }
    for port in 0..outputs {
        descriptor = descriptor.with_output(format!("out{}", port), PortType::Number);
    }
    descriptor
}

/// Registry with every test double, all reporting to `probe`
pub fn registry(probe: &Arc<Probe>) -> NodeRegistry {
    let mut registry = NodeRegistry::new();

    let p = Arc::clone(probe);
    registry.register(Arc::new(FnNodeFactory::new(
        descriptor("number", &[], 1).with_default_settings(json!({ "value": 1 })),
        move || -> Arc<dyn NodeModel> { Arc::new(NumberModel(Arc::clone(&p))) },
    )));
    let p = Arc::clone(probe);
    registry.register(Arc::new(FnNodeFactory::new(
        descriptor("sum", &[("a", true), ("b", true)], 1),
        move || -> Arc<dyn NodeModel> { Arc::new(SumModel(Arc::clone(&p))) },
    )));
    let p = Arc::clone(probe);
    registry.register(Arc::new(FnNodeFactory::new(
        descriptor("fail", &[("in", false)], 1).with_default_settings(json!({ "message": "boom" })),
        move || -> Arc<dyn NodeModel> { Arc::new(FailModel(Arc::clone(&p))) },
    )));
    let p = Arc::clone(probe);
    registry.register(Arc::new(FnNodeFactory::new(
        descriptor("panic", &[("in", false)], 1),
        move || -> Arc<dyn NodeModel> { Arc::new(PanicModel(Arc::clone(&p))) },
    )));
    let p = Arc::clone(probe);
    registry.register(Arc::new(FnNodeFactory::new(
        descriptor("gate", &[("in", false)], 1)
            .with_default_settings(json!({ "gate": "default", "value": 0 })),
        move || -> Arc<dyn NodeModel> { Arc::new(GateModel(Arc::clone(&p))) },
    )));
    let p = Arc::clone(probe);
    registry.register(Arc::new(FnNodeFactory::new(
        descriptor("slow-load", &[], 1).with_default_settings(json!({ "gate": "default", "value": 0 })),
        move || -> Arc<dyn NodeModel> {
            Arc::new(SlowLoadModel {
                probe: Arc::clone(&p),
                gate: Mutex::new(None),
            })
        },
    )));
    let p = Arc::clone(probe);
    registry.register(Arc::new(FnNodeFactory::new(
        descriptor("progress", &[("in", false)], 1).with_default_settings(json!({ "steps": 4 })),
        move || -> Arc<dyn NodeModel> { Arc::new(ProgressModel(Arc::clone(&p))) },
    )));
    let p = Arc::clone(probe);
    registry.register(Arc::new(FnNodeFactory::new(
        descriptor("credential", &[], 1).with_default_settings(json!({ "name": "db" })),
        move || -> Arc<dyn NodeModel> { Arc::new(CredentialModel(Arc::clone(&p))) },
    )));
    let p = Arc::clone(probe);
    registry.register(Arc::new(FnNodeFactory::new(
        descriptor("counter", &[("in", false)], 1),
        move || -> Arc<dyn NodeModel> {
            Arc::new(CounterModel {
                probe: Arc::clone(&p),
                count: AtomicUsize::new(0),
            })
        },
    )));
    registry
}

/// Engine with `workers` threads over the test doubles
pub fn engine_with_workers(workers: usize) -> (Engine, Arc<Probe>) {
    init_logging();
    let probe = Arc::new(Probe::default());
    let config = EngineConfig::default()
        .with_worker_threads(workers)
        .with_shutdown_timeout_ms(2_000);
    let engine = Engine::new(config, registry(&probe)).expect("engine starts");
    (engine, probe)
}

pub fn engine() -> (Engine, Arc<Probe>) {
    engine_with_workers(4)
}

/// Add a `number` node emitting `value`
pub fn number(wfm: &Arc<WorkflowManager>, value: f64) -> u32 {
    wfm.add_node_with_settings("number", Some(json!({ "value": value })))
        .expect("number node added")
}

/// Add a `gate` node waiting on `gate`
pub fn gate(wfm: &Arc<WorkflowManager>, gate: &str) -> u32 {
    wfm.add_node_with_settings("gate", Some(json!({ "gate": gate, "value": 0 })))
        .expect("gate node added")
}

/// Poll until child `index` reaches `state`
pub fn wait_for_state(wfm: &Arc<WorkflowManager>, index: u32, state: NodeState) -> bool {
    let deadline = std::time::Instant::now() + WAIT;
    while std::time::Instant::now() < deadline {
        if wfm.node_state(index).ok() == Some(state) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}
