//! Passthrough Node
//!
//! Forwards its input and its input spec unchanged.

use dataflow_engine::{
    ConfigureContext, ExecutionContext, NodeCategory, NodeDescriptor, NodeModel, PortSpec,
    PortType, PortValue, Result,
};

use crate::BuiltinNode;

#[derive(Debug, Default)]
pub struct PassthroughNode;

impl BuiltinNode for PassthroughNode {
    const NODE_TYPE: &'static str = "passthrough";

    fn descriptor() -> NodeDescriptor {
        NodeDescriptor::new(Self::NODE_TYPE, NodeCategory::Control, "Passthrough")
            .with_description("Forwards its input")
            .with_input("in", PortType::Any)
            .with_output("out", PortType::Any)
    }
}

inventory::submit!(dataflow_engine::FactoryRegistration {
    node_type: PassthroughNode::NODE_TYPE,
    factory: <PassthroughNode as BuiltinNode>::factory,
});

impl NodeModel for PassthroughNode {
    fn configure(&self, ctx: &ConfigureContext<'_>) -> Result<Vec<Option<PortSpec>>> {
        Ok(vec![ctx.input_spec(0).cloned()])
    }

    fn execute(&self, inputs: &[Option<PortValue>], _ctx: &ExecutionContext) -> Result<Vec<PortValue>> {
        Ok(vec![inputs.first().cloned().flatten().unwrap_or_default()])
    }
}
