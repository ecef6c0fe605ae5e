//! Concat Node
//!
//! Joins two text inputs with a separator. Numbers and booleans are
//! rendered as text.

use dataflow_engine::{
    ConfigureContext, EngineError, ExecutionContext, NodeCategory, NodeDescriptor, NodeModel,
    PortSpec, PortType, PortValue, Result,
};
use serde::Deserialize;

use crate::settings;
use crate::BuiltinNode;

#[derive(Debug, Default, Deserialize)]
struct ConcatSettings {
    #[serde(default)]
    separator: String,
}

/// Concat Node
///
/// # Inputs
/// - `first` - text (required)
/// - `second` - text (optional)
///
/// # Settings
/// - `separator` - placed between the two parts
///
/// # Outputs
/// - `text` - the joined text
#[derive(Debug, Default)]
pub struct ConcatNode;

fn render(value: &PortValue) -> Result<String> {
    match value {
        serde_json::Value::String(text) => Ok(text.clone()),
        serde_json::Value::Number(number) => Ok(number.to_string()),
        serde_json::Value::Bool(flag) => Ok(flag.to_string()),
        other => Err(EngineError::failed(format!("Cannot render {} as text", other))),
    }
}

impl BuiltinNode for ConcatNode {
    const NODE_TYPE: &'static str = "concat";

    fn descriptor() -> NodeDescriptor {
        NodeDescriptor::new(Self::NODE_TYPE, NodeCategory::Transform, "Concat")
            .with_description("Joins two texts")
            .with_input("first", PortType::Text)
            .with_optional_input("second", PortType::Text)
            .with_output("text", PortType::Text)
            .with_default_settings(serde_json::json!({ "separator": "" }))
    }
}

inventory::submit!(dataflow_engine::FactoryRegistration {
    node_type: ConcatNode::NODE_TYPE,
    factory: <ConcatNode as BuiltinNode>::factory,
});

impl NodeModel for ConcatNode {
    fn configure(&self, ctx: &ConfigureContext<'_>) -> Result<Vec<Option<PortSpec>>> {
        let _: ConcatSettings = settings::parse(ctx.settings())?;
        Ok(vec![Some(settings::spec(PortType::Text))])
    }

    fn execute(&self, inputs: &[Option<PortValue>], ctx: &ExecutionContext) -> Result<Vec<PortValue>> {
        let settings: ConcatSettings = settings::parse(ctx.settings())?;
        let parts = inputs
            .iter()
            .flatten()
            .map(render)
            .collect::<Result<Vec<_>>>()?;
        Ok(vec![serde_json::Value::String(parts.join(&settings.separator))])
    }
}
