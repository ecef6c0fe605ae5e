//! Execution Counter Node
//!
//! Counts how often it executed since the last reset. The count is kept
//! as internal state, so it survives a save and load of an executed node.

use std::sync::atomic::{AtomicU64, Ordering};

use dataflow_engine::{
    ConfigureContext, EngineError, ExecutionContext, NodeCategory, NodeDescriptor, NodeModel,
    PortSpec, PortType, PortValue, Result,
};
use serde::{Deserialize, Serialize};

use crate::settings;
use crate::BuiltinNode;

#[derive(Debug, Serialize, Deserialize)]
struct CounterInternals {
    count: u64,
}

/// Execution Counter Node
///
/// # Inputs
/// - `in` - any value (optional), only used for ordering
///
/// # Outputs
/// - `count` - number of executions since the last reset
#[derive(Debug, Default)]
pub struct ExecutionCounterNode {
    count: AtomicU64,
}

impl ExecutionCounterNode {
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

impl BuiltinNode for ExecutionCounterNode {
    const NODE_TYPE: &'static str = "execution-counter";

    fn descriptor() -> NodeDescriptor {
        NodeDescriptor::new(Self::NODE_TYPE, NodeCategory::Testing, "Execution Counter")
            .with_description("Counts its own executions")
            .with_optional_input("in", PortType::Any)
            .with_output("count", PortType::Number)
    }
}

inventory::submit!(dataflow_engine::FactoryRegistration {
    node_type: ExecutionCounterNode::NODE_TYPE,
    factory: <ExecutionCounterNode as BuiltinNode>::factory,
});

impl NodeModel for ExecutionCounterNode {
    fn configure(&self, _ctx: &ConfigureContext<'_>) -> Result<Vec<Option<PortSpec>>> {
        Ok(vec![Some(settings::spec(PortType::Number))])
    }

    fn execute(&self, _inputs: &[Option<PortValue>], ctx: &ExecutionContext) -> Result<Vec<PortValue>> {
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        log::debug!("ExecutionCounterNode {}: execution #{}", ctx.node_id(), count);
        Ok(vec![serde_json::json!(count)])
    }

    fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
    }

    fn save_internals(&self) -> Option<serde_json::Value> {
        serde_json::to_value(CounterInternals { count: self.count() }).ok()
    }

    fn load_internals(&self, internals: &serde_json::Value) -> Result<()> {
        let parsed: CounterInternals = serde_json::from_value(internals.clone())
            .map_err(|e| EngineError::invalid_settings(format!("Invalid counter state: {}", e)))?;
        self.count.store(parsed.count, Ordering::SeqCst);
        Ok(())
    }
}
