//! Math Node
//!
//! Binary arithmetic on numbers. The right operand comes from the second
//! input when it is connected, otherwise from the `operand` setting.

use dataflow_engine::{
    ConfigureContext, EngineError, ExecutionContext, NodeCategory, NodeDescriptor, NodeModel,
    PortSpec, PortType, PortValue, Result,
};
use serde::{Deserialize, Serialize};

use crate::settings;
use crate::BuiltinNode;

/// Supported operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MathOperation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl MathOperation {
    pub fn apply(self, left: f64, right: f64) -> Result<f64> {
        match self {
            Self::Add => Ok(left + right),
            Self::Subtract => Ok(left - right),
            Self::Multiply => Ok(left * right),
            Self::Divide if right == 0.0 => Err(EngineError::failed("Division by zero")),
            Self::Divide => Ok(left / right),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MathSettings {
    #[serde(default = "default_operation")]
    operation: MathOperation,
    #[serde(default)]
    operand: f64,
}

fn default_operation() -> MathOperation {
    MathOperation::Add
}

/// Math Node
///
/// # Inputs
/// - `left` - number (required)
/// - `right` - number (optional, overrides `operand`)
///
/// # Settings
/// - `operation` - `add`, `subtract`, `multiply` or `divide`
/// - `operand` - right operand when `right` is unconnected
///
/// # Outputs
/// - `result` - number
#[derive(Debug, Default)]
pub struct MathNode;

fn number(value: Option<&PortValue>, port: &str) -> Result<f64> {
    value
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| EngineError::failed(format!("Input '{}' is not a number", port)))
}

impl BuiltinNode for MathNode {
    const NODE_TYPE: &'static str = "math";

    fn descriptor() -> NodeDescriptor {
        NodeDescriptor::new(Self::NODE_TYPE, NodeCategory::Transform, "Math")
            .with_description("Binary arithmetic on numbers")
            .with_input("left", PortType::Number)
            .with_optional_input("right", PortType::Number)
            .with_output("result", PortType::Number)
            .with_default_settings(serde_json::json!({ "operation": "add", "operand": 0 }))
    }
}

inventory::submit!(dataflow_engine::FactoryRegistration {
    node_type: MathNode::NODE_TYPE,
    factory: <MathNode as BuiltinNode>::factory,
});

impl NodeModel for MathNode {
    fn configure(&self, ctx: &ConfigureContext<'_>) -> Result<Vec<Option<PortSpec>>> {
        let settings: MathSettings = settings::parse(ctx.settings())?;
        for (port, name) in [(0, "left"), (1, "right")] {
            let Some(spec) = ctx.input_spec(port) else {
                continue;
            };
            match settings::spec_type(spec) {
                Some(PortType::Number) | Some(PortType::Any) | None => {}
                Some(other) => {
                    return Err(EngineError::invalid_settings(format!(
                        "Input '{}' must be a number, got {:?}",
                        name, other
                    )))
                }
            }
        }
        if settings.operation == MathOperation::Divide
            && ctx.input_spec(1).is_none()
            && settings.operand == 0.0
        {
            ctx.set_warning("Dividing by an operand of zero");
        }
        Ok(vec![Some(settings::spec(PortType::Number))])
    }

    fn execute(&self, inputs: &[Option<PortValue>], ctx: &ExecutionContext) -> Result<Vec<PortValue>> {
        let settings: MathSettings = settings::parse(ctx.settings())?;
        let left = number(inputs.first().and_then(Option::as_ref), "left")?;
        let right = match inputs.get(1).and_then(Option::as_ref) {
            Some(value) => number(Some(value), "right")?,
            None => settings.operand,
        };
        let result = settings.operation.apply(left, right)?;
        log::debug!(
            "MathNode {}: {} {:?} {} = {}",
            ctx.node_id(),
            left,
            settings.operation,
            right,
            result
        );
        Ok(vec![serde_json::json!(result)])
    }
}
