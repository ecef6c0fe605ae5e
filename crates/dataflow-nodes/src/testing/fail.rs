//! Fail Node
//!
//! Fails during configure or execute with a configurable message, or
//! panics when asked to.

use dataflow_engine::{
    ConfigureContext, EngineError, ExecutionContext, NodeCategory, NodeDescriptor, NodeModel,
    PortSpec, PortType, PortValue, Result,
};
use serde::Deserialize;

use crate::settings;
use crate::BuiltinNode;

/// When the node fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailPhase {
    Configure,
    #[default]
    Execute,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FailSettings {
    #[serde(default = "default_message")]
    message: String,
    #[serde(default)]
    phase: FailPhase,
    #[serde(default)]
    panic: bool,
}

fn default_message() -> String {
    "Intentional failure".to_string()
}

/// Fail Node
///
/// # Inputs
/// - `in` - any value (optional), only used for ordering
///
/// # Settings
/// - `message` - error text
/// - `phase` - `configure` or `execute`
/// - `panic` - panic instead of returning an error while executing
///
/// # Outputs
/// - `out` - never produced
#[derive(Debug, Default)]
pub struct FailNode;

impl BuiltinNode for FailNode {
    const NODE_TYPE: &'static str = "fail";

    fn descriptor() -> NodeDescriptor {
        NodeDescriptor::new(Self::NODE_TYPE, NodeCategory::Testing, "Fail")
            .with_description("Fails on purpose")
            .with_optional_input("in", PortType::Any)
            .with_output("out", PortType::Any)
            .with_default_settings(serde_json::json!({
                "message": "Intentional failure",
                "phase": "execute",
                "panic": false
            }))
    }
}

inventory::submit!(dataflow_engine::FactoryRegistration {
    node_type: FailNode::NODE_TYPE,
    factory: <FailNode as BuiltinNode>::factory,
});

impl NodeModel for FailNode {
    fn configure(&self, ctx: &ConfigureContext<'_>) -> Result<Vec<Option<PortSpec>>> {
        let parsed: FailSettings = settings::parse(ctx.settings())?;
        if parsed.phase == FailPhase::Configure {
            return Err(EngineError::invalid_settings(parsed.message));
        }
        Ok(vec![Some(settings::spec(PortType::Any))])
    }

    fn execute(&self, _inputs: &[Option<PortValue>], ctx: &ExecutionContext) -> Result<Vec<PortValue>> {
        let parsed: FailSettings = settings::parse(ctx.settings())?;
        if parsed.panic {
            panic!("{}", parsed.message);
        }
        log::debug!("FailNode {}: failing with '{}'", ctx.node_id(), parsed.message);
        Err(EngineError::failed(parsed.message))
    }
}
