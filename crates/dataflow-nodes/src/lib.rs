//! Dataflow Nodes
//!
//! Built-in node models for the dataflow engine. Every node registers its
//! factory at link time, so [`registry`] (or
//! `NodeRegistry::with_builtins()` in a binary that links this crate)
//! knows all of them.
//!
//! # Categories
//!
//! - **Input**: constants, workflow variables and credentials
//! - **Processing**: arithmetic and text
//! - **Control**: passthrough and delay
//! - **Testing**: nodes that fail on demand or count their executions
//!
//! Port specs produced by these nodes are JSON objects of the form
//! `{"type": "<port type>"}`.

use std::sync::Arc;

use dataflow_engine::{FnNodeFactory, NodeDescriptor, NodeFactory, NodeModel, NodeRegistry};

pub mod control;
pub mod input;
pub mod processing;
pub mod settings;
pub mod testing;

// Re-export all nodes for convenience
pub use control::*;
pub use input::*;
pub use processing::*;
pub use testing::*;

/// A node model shipped with this crate
pub trait BuiltinNode: NodeModel + Default + 'static {
    /// Type id the node is registered under
    const NODE_TYPE: &'static str;

    fn descriptor() -> NodeDescriptor;

    /// Factory creating fresh instances of this node
    fn factory() -> Arc<dyn NodeFactory> {
        Arc::new(FnNodeFactory::new(Self::descriptor(), || -> Arc<dyn NodeModel> {
            Arc::new(Self::default())
        }))
    }
}

/// Registry with every built-in node
pub fn registry() -> NodeRegistry {
    NodeRegistry::with_builtins()
}
