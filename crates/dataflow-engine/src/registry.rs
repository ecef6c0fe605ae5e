//! Node type registry and creation policy
//!
//! The registry maps node type strings to factories. Built-in node crates
//! register themselves at link time with [`FactoryRegistration`]:
//!
//! ```ignore
//! inventory::submit!(dataflow_engine::FactoryRegistration {
//!     node_type: "constant",
//!     factory: || std::sync::Arc::new(ConstantFactory),
//! });
//! ```
//!
//! Every leaf created by a workflow (add, replace, load) goes through
//! [`NodeRegistry::instantiate`], which consults the active
//! [`NodeTypeFilter`]. Disallowed or unknown types come back as a
//! [`PlaceholderModel`] carrying the requested port layout.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::descriptor::{NodeCategory, NodeDescriptor};
use crate::error::{EngineError, Result};
use crate::model::{NodeFactory, NodeModel, PlaceholderModel};
use crate::types::PortDefinition;

/// Link-time registration of a built-in node factory
pub struct FactoryRegistration {
    /// The node type this factory creates
    pub node_type: &'static str,
    /// Function creating the factory instance
    pub factory: fn() -> Arc<dyn NodeFactory>,
}

inventory::collect!(FactoryRegistration);

/// Policy deciding which node types may be instantiated
pub trait NodeTypeFilter: Send + Sync {
    fn is_allowed(&self, node_type: &str) -> bool;
}

/// Filter that allows every node type
pub struct AllowAll;

impl NodeTypeFilter for AllowAll {
    fn is_allowed(&self, _node_type: &str) -> bool {
        true
    }
}

/// Filter that rejects a fixed set of node types
#[derive(Debug, Default, Clone)]
pub struct DenyList {
    denied: HashSet<String>,
}

impl DenyList {
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            denied: types.into_iter().map(Into::into).collect(),
        }
    }
}

impl NodeTypeFilter for DenyList {
    fn is_allowed(&self, node_type: &str) -> bool {
        !self.denied.contains(node_type)
    }
}

impl<F> NodeTypeFilter for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_allowed(&self, node_type: &str) -> bool {
        self(node_type)
    }
}

/// A freshly created model together with the descriptor it was built from
pub struct Instantiated {
    pub descriptor: NodeDescriptor,
    pub model: Arc<dyn NodeModel>,
    /// Why a placeholder was created instead of the requested type
    pub placeholder: Option<String>,
}

/// Registry of node types and their factories
pub struct NodeRegistry {
    entries: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Create a registry with every factory submitted through `inventory`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for registration in inventory::iter::<FactoryRegistration> {
            let factory = (registration.factory)();
            let node_type = factory.descriptor().node_type;
            if node_type != registration.node_type {
                log::warn!(
                    "Factory registered as '{}' describes node type '{}'",
                    registration.node_type,
                    node_type
                );
            }
            registry.entries.insert(node_type, factory);
        }
        registry
    }

    /// Register a factory under its descriptor's node type
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let node_type = factory.descriptor().node_type;
        self.entries.insert(node_type, factory);
    }

    /// Get the descriptor for a node type
    pub fn descriptor(&self, node_type: &str) -> Option<NodeDescriptor> {
        self.entries.get(node_type).map(|f| f.descriptor())
    }

    /// Get all registered descriptors, sorted by node type
    pub fn all_descriptors(&self) -> Vec<NodeDescriptor> {
        let mut all: Vec<NodeDescriptor> = self.entries.values().map(|f| f.descriptor()).collect();
        all.sort_by(|a, b| a.node_type.cmp(&b.node_type));
        all
    }

    /// Check if a node type is registered
    pub fn has_node_type(&self, node_type: &str) -> bool {
        self.entries.contains_key(node_type)
    }

    /// List all registered node type strings
    pub fn node_types(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Merge another registry into this one
    ///
    /// Entries from `other` override entries in `self` if they share the same node_type.
    pub fn merge(&mut self, other: NodeRegistry) {
        self.entries.extend(other.entries);
    }

    /// Create a model for a new node, honoring the filter
    ///
    /// Unknown types are an error here; use [`Self::instantiate_or_placeholder`]
    /// when the port layout is known from elsewhere (loading, replacing).
    pub fn instantiate(&self, node_type: &str, filter: &dyn NodeTypeFilter) -> Result<Instantiated> {
        let factory = self
            .entries
            .get(node_type)
            .ok_or_else(|| EngineError::UnknownNodeType(node_type.to_string()))?;
        let descriptor = factory.descriptor();
        if !filter.is_allowed(node_type) {
            let reason = disallowed_reason(node_type);
            log::warn!("{}", reason);
            return Ok(placeholder(
                node_type,
                descriptor.inputs,
                descriptor.outputs,
                reason,
            ));
        }
        Ok(Instantiated {
            model: factory.create_model(),
            descriptor,
            placeholder: None,
        })
    }

    /// Create a model, falling back to a placeholder with the given ports
    pub fn instantiate_or_placeholder(
        &self,
        node_type: &str,
        filter: &dyn NodeTypeFilter,
        inputs: Vec<PortDefinition>,
        outputs: Vec<PortDefinition>,
    ) -> Instantiated {
        if !filter.is_allowed(node_type) {
            return placeholder(node_type, inputs, outputs, disallowed_reason(node_type));
        }
        match self.entries.get(node_type) {
            Some(factory) => Instantiated {
                descriptor: factory.descriptor(),
                model: factory.create_model(),
                placeholder: None,
            },
            None => placeholder(
                node_type,
                inputs,
                outputs,
                format!("Node type '{}' is not available", node_type),
            ),
        }
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn disallowed_reason(node_type: &str) -> String {
    format!("Node type '{}' is not allowed by the active policy", node_type)
}

fn placeholder(
    node_type: &str,
    inputs: Vec<PortDefinition>,
    outputs: Vec<PortDefinition>,
    reason: String,
) -> Instantiated {
    let mut descriptor = NodeDescriptor::new(node_type, NodeCategory::Placeholder, node_type)
        .with_description(reason.clone());
    descriptor.inputs = inputs;
    descriptor.outputs = outputs;
    Instantiated {
        descriptor,
        model: Arc::new(PlaceholderModel::new(reason.clone())),
        placeholder: Some(reason),
    }
}
