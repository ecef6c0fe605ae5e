//! Variable Reader Node
//!
//! Emits the current value of a workflow variable. The variable is read
//! when the node configures and again when it executes; changing the
//! variable afterwards does not reset an executed reader.

use dataflow_engine::{
    ConfigureContext, EngineError, ExecutionContext, NodeCategory, NodeDescriptor, NodeModel,
    PortSpec, PortType, PortValue, Result,
};
use serde::Deserialize;

use crate::settings::{self, SettingsError};
use crate::BuiltinNode;

#[derive(Debug, Deserialize)]
struct VariableSettings {
    #[serde(default)]
    name: String,
}

impl VariableSettings {
    fn read(settings: &serde_json::Value) -> Result<Self> {
        let parsed: Self = settings::parse(settings)?;
        if parsed.name.is_empty() {
            return Err(SettingsError::Missing("name").into());
        }
        Ok(parsed)
    }
}

/// Variable Reader Node
///
/// # Settings
/// - `name` - the external value to read
///
/// # Outputs
/// - `value` - the variable's value
#[derive(Debug, Default)]
pub struct VariableReaderNode;

impl BuiltinNode for VariableReaderNode {
    const NODE_TYPE: &'static str = "variable-reader";

    fn descriptor() -> NodeDescriptor {
        NodeDescriptor::new(Self::NODE_TYPE, NodeCategory::Source, "Variable Reader")
            .with_description("Reads a workflow variable")
            .with_output("value", PortType::Any)
            .with_default_settings(serde_json::json!({ "name": "" }))
    }
}

inventory::submit!(dataflow_engine::FactoryRegistration {
    node_type: VariableReaderNode::NODE_TYPE,
    factory: <VariableReaderNode as BuiltinNode>::factory,
});

fn undefined(name: &str) -> EngineError {
    EngineError::invalid_settings(format!("Variable '{}' is not defined", name))
}

impl NodeModel for VariableReaderNode {
    fn configure(&self, ctx: &ConfigureContext<'_>) -> Result<Vec<Option<PortSpec>>> {
        let settings = VariableSettings::read(ctx.settings())?;
        let value = ctx
            .external_value(&settings.name)
            .ok_or_else(|| undefined(&settings.name))?;
        Ok(vec![Some(settings::spec(settings::type_of(&value)))])
    }

    fn execute(&self, _inputs: &[Option<PortValue>], ctx: &ExecutionContext) -> Result<Vec<PortValue>> {
        let settings = VariableSettings::read(ctx.settings())?;
        let value = ctx
            .external_value(&settings.name)
            .ok_or_else(|| EngineError::failed(format!("Variable '{}' is not defined", settings.name)))?;
        Ok(vec![value])
    }
}
