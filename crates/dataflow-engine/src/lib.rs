//! Dataflow Engine - node-based workflow execution with nested containers
//!
//! This crate executes graphs of nodes connected by typed ports. Nodes
//! move through a lifecycle (idle, configured, marked, queued, executing,
//! executed) and changes propagate through nested metanodes and
//! components:
//!
//! - Resets travel downstream and stop at nodes that are already idle
//! - Configuration travels downstream and halts at nodes that fail it
//! - Execution runs on a bounded worker pool, each node after its inputs
//! - Failures block marked descendants; cancellation is cooperative
//!
//! # Architecture
//!
//! - [`Engine`]: owns open projects, the node registry and the worker pool
//! - [`WorkflowManager`]: one project, metanode or component, with its
//!   children, connections and re-entrant lock
//! - [`NodeModel`]: the behavior of a leaf node, supplied by a
//!   [`NodeFactory`] registered in the [`NodeRegistry`]
//! - [`NodeStateListener`]: receives state changes asynchronously, in order
//!
//! # Example
//!
//! ```ignore
//! use dataflow_engine::{Engine, EngineConfig, NodeRegistry, PortHost};
//!
//! let engine = Engine::new(EngineConfig::default(), NodeRegistry::with_builtins())?;
//! let project = engine.create_project("example");
//! let a = project.add_node_with_settings("constant", Some(serde_json::json!({"value": 2})))?;
//! let b = project.add_node("math")?;
//! project.add_connection(PortHost::Node(a), 0, PortHost::Node(b), 0)?;
//! project.execute_and_wait(&[b], std::time::Duration::from_secs(5))?;
//! ```

pub mod builder;
pub mod config;
pub mod connection;
pub mod constants;
pub mod container;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod events;
pub mod model;
pub mod monitor;
pub mod persist;
pub mod pool;
pub mod registry;
pub mod state;
pub mod types;
pub mod validation;
pub mod values;
pub mod workflow;

// Re-export key types
pub use builder::WorkflowBuilder;
pub use config::EngineConfig;
pub use connection::{Connection, PortHost};
pub use container::{ContainerKind, NodeInfo};
pub use descriptor::{NodeCategory, NodeDescriptor};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use events::{
    ListenerId, NodeProgressEvent, NodeStateEvent, NodeStateListener, NullListener, ProgressSender,
    VecListener,
};
pub use model::{ConfigureContext, ExecutionContext, FnNodeFactory, NodeFactory, NodeModel};
pub use persist::{LoadMessage, LoadResult, LoadStatus, ProjectSnapshot, WorkflowSnapshot};
pub use registry::{AllowAll, DenyList, FactoryRegistration, NodeRegistry, NodeTypeFilter};
pub use state::NodeState;
pub use types::{MessageKind, NodeId, NodeMessage, PortDefinition, PortSpec, PortType, PortValue};
pub use values::{ExternalValue, ExternalValues};
pub use workflow::{PortChange, PortDescriptor, ReplaceNodeResult, WorkflowKind, WorkflowManager};
