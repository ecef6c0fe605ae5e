//! Constant Node
//!
//! Emits the JSON value stored in its settings.

use dataflow_engine::{
    ConfigureContext, ExecutionContext, NodeCategory, NodeDescriptor, NodeModel, PortSpec,
    PortType, PortValue, Result,
};
use serde::Deserialize;

use crate::settings::{self, SettingsError};
use crate::BuiltinNode;

#[derive(Debug, Deserialize)]
struct ConstantSettings {
    value: Option<serde_json::Value>,
}

/// Constant Node
///
/// # Settings
/// - `value` - the value to emit (required)
///
/// # Outputs
/// - `value` - the configured value
#[derive(Debug, Default)]
pub struct ConstantNode;

impl ConstantNode {
    fn value(settings: &serde_json::Value) -> Result<serde_json::Value> {
        let parsed: ConstantSettings = settings::parse(settings)?;
        parsed
            .value
            .ok_or_else(|| SettingsError::Missing("value").into())
    }
}

impl BuiltinNode for ConstantNode {
    const NODE_TYPE: &'static str = "constant";

    fn descriptor() -> NodeDescriptor {
        NodeDescriptor::new(Self::NODE_TYPE, NodeCategory::Source, "Constant")
            .with_description("Emits a fixed value")
            .with_output("value", PortType::Any)
            .with_default_settings(serde_json::json!({ "value": 0 }))
    }
}

inventory::submit!(dataflow_engine::FactoryRegistration {
    node_type: ConstantNode::NODE_TYPE,
    factory: <ConstantNode as BuiltinNode>::factory,
});

impl NodeModel for ConstantNode {
    fn configure(&self, ctx: &ConfigureContext<'_>) -> Result<Vec<Option<PortSpec>>> {
        let value = Self::value(ctx.settings())?;
        Ok(vec![Some(settings::spec(settings::type_of(&value)))])
    }

    fn execute(&self, _inputs: &[Option<PortValue>], ctx: &ExecutionContext) -> Result<Vec<PortValue>> {
        let value = Self::value(ctx.settings())?;
        log::debug!("ConstantNode {}: emitting {}", ctx.node_id(), value);
        Ok(vec![value])
    }
}
