//! Core types for the dataflow engine
//!
//! Identifiers, port definitions and node messages shared by every
//! container variant.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Value produced on an output port once its owner has executed
pub type PortValue = serde_json::Value;

/// Description of the value a port will carry, produced by configure
pub type PortSpec = serde_json::Value;

/// Hierarchical container identifier
///
/// Rendered as colon-separated indices, e.g. `0:3:1` is child `1` of
/// workflow `0:3`. The engine root is `0` and projects are its children.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    path: Vec<u32>,
}

impl NodeId {
    /// The engine root id (`0`)
    pub fn root() -> Self {
        Self { path: vec![0] }
    }

    /// Create the id of child `index` below this id
    pub fn child(&self, index: u32) -> Self {
        let mut path = self.path.clone();
        path.push(index);
        Self { path }
    }

    /// Parent id, or `None` for the engine root
    pub fn parent(&self) -> Option<Self> {
        if self.path.len() <= 1 {
            return None;
        }
        Some(Self {
            path: self.path[..self.path.len() - 1].to_vec(),
        })
    }

    /// Local index within the parent workflow
    pub fn index(&self) -> u32 {
        self.path.last().copied().unwrap_or(0)
    }

    /// Number of path segments
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// Path segments from the root
    pub fn path(&self) -> &[u32] {
        &self.path
    }

    /// Whether `self` equals `other` or lies below it
    pub fn is_descendant_of(&self, other: &NodeId) -> bool {
        self.path.starts_with(&other.path)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.path {
            if !first {
                f.write_str(":")?;
            }
            write!(f, "{}", segment)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for NodeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let path = s
            .split(':')
            .map(|part| part.parse::<u32>().map_err(|_| format!("Invalid node id '{}'", s)))
            .collect::<Result<Vec<_>, _>>()?;
        if path.is_empty() {
            return Err(format!("Invalid node id '{}'", s));
        }
        Ok(Self { path })
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Data types that can flow through ports
///
/// Used for connection compatibility checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    /// Accepts any type
    Any,
    /// Numeric value
    Number,
    /// Text string
    Text,
    /// Boolean value
    Boolean,
    /// Arbitrary JSON document
    Json,
    /// Tabular data (rows of JSON objects)
    Table,
    /// Flow variables only, no data
    Flow,
}

impl PortType {
    /// Check if an output of this type can feed an input of `target`
    pub fn is_compatible_with(&self, target: &PortType) -> bool {
        if matches!(self, PortType::Any) || matches!(target, PortType::Any) {
            return true;
        }
        if self == target {
            return true;
        }
        // Numbers render to text
        matches!((self, target), (PortType::Number, PortType::Text))
    }
}

/// Definition of a single input or output port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDefinition {
    /// Human-readable name
    pub name: String,
    /// Type tag used for compatibility checks
    pub port_type: PortType,
    /// Whether configure needs this input connected (ignored for outputs)
    #[serde(default)]
    pub required: bool,
}

impl PortDefinition {
    /// Create a required port
    pub fn required(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            name: name.into(),
            port_type,
            required: true,
        }
    }

    /// Create an optional port
    pub fn optional(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            name: name.into(),
            port_type,
            required: false,
        }
    }
}

/// Severity of a node message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Warning,
    Error,
}

/// Human-readable diagnostic attached to a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMessage {
    pub kind: MessageKind,
    pub text: String,
}

impl NodeMessage {
    /// Create a warning message
    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Warning,
            text: text.into(),
        }
    }

    /// Create an error message
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Error,
            text: text.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == MessageKind::Error
    }
}

impl fmt::Display for NodeMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MessageKind::Warning => write!(f, "WARNING: {}", self.text),
            MessageKind::Error => write!(f, "ERROR: {}", self.text),
        }
    }
}
