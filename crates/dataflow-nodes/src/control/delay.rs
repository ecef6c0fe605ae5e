//! Delay Node
//!
//! Waits for a configurable time, then forwards its input. Progress is
//! reported in steps while waiting and the wait ends early when the node
//! is canceled.

use std::time::Duration;

use dataflow_engine::{
    ConfigureContext, ExecutionContext, NodeCategory, NodeDescriptor, NodeModel, PortSpec,
    PortType, PortValue, Result,
};
use serde::Deserialize;

use crate::settings::{self, SettingsError};
use crate::BuiltinNode;

/// Longest accepted delay
const MAX_DELAY_MS: u64 = 60 * 60 * 1000;

/// Progress reports per wait
const PROGRESS_STEPS: u32 = 10;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DelaySettings {
    #[serde(default)]
    millis: u64,
}

impl DelaySettings {
    fn read(settings: &serde_json::Value) -> Result<Self> {
        let parsed: Self = settings::parse(settings)?;
        if parsed.millis > MAX_DELAY_MS {
            return Err(SettingsError::Invalid {
                name: "millis",
                reason: format!("at most {} allowed", MAX_DELAY_MS),
            }
            .into());
        }
        Ok(parsed)
    }
}

/// Delay Node
///
/// # Inputs
/// - `in` - any value (optional)
///
/// # Settings
/// - `millis` - how long to wait
///
/// # Outputs
/// - `out` - the input value, or `null` when unconnected
#[derive(Debug, Default)]
pub struct DelayNode;

impl BuiltinNode for DelayNode {
    const NODE_TYPE: &'static str = "delay";

    fn descriptor() -> NodeDescriptor {
        NodeDescriptor::new(Self::NODE_TYPE, NodeCategory::Control, "Delay")
            .with_description("Waits, then forwards its input")
            .with_optional_input("in", PortType::Any)
            .with_output("out", PortType::Any)
            .with_default_settings(serde_json::json!({ "millis": 100 }))
    }
}

inventory::submit!(dataflow_engine::FactoryRegistration {
    node_type: DelayNode::NODE_TYPE,
    factory: <DelayNode as BuiltinNode>::factory,
});

impl NodeModel for DelayNode {
    fn configure(&self, ctx: &ConfigureContext<'_>) -> Result<Vec<Option<PortSpec>>> {
        DelaySettings::read(ctx.settings())?;
        let spec = ctx
            .input_spec(0)
            .cloned()
            .unwrap_or_else(|| settings::spec(PortType::Json));
        Ok(vec![Some(spec)])
    }

    fn execute(&self, inputs: &[Option<PortValue>], ctx: &ExecutionContext) -> Result<Vec<PortValue>> {
        let settings = DelaySettings::read(ctx.settings())?;
        log::debug!("DelayNode {}: waiting {} ms", ctx.node_id(), settings.millis);
        let step = Duration::from_millis(settings.millis) / PROGRESS_STEPS;
        for done in 1..=PROGRESS_STEPS {
            ctx.sleep(step)?;
            ctx.set_progress(f64::from(done) / f64::from(PROGRESS_STEPS), None);
        }
        Ok(vec![inputs.first().cloned().flatten().unwrap_or_default()])
    }
}
