//! Error types for the dataflow engine

use thiserror::Error;

use crate::persist::LoadMessage;
use crate::types::NodeId;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur in the dataflow engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// No container with this id exists
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Node type is not known to the registry
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// Connection failed validation
    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    /// Structural edit or reset refused because of the current state
    #[error("Edit rejected: {0}")]
    EditRejected(String),

    /// Settings or input specs did not validate during configure
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// Node execution failed
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Execution observed its cancellation flag
    #[error("Execution canceled")]
    Cancelled,

    /// Saving a project failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Loading a project failed with error-level diagnostics
    #[error("Load failed: {}", summarize(.diagnostics))]
    Load { diagnostics: Vec<LoadMessage> },

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Worker runtime could not be created or has shut down
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create an execution failed error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }

    /// Create an invalid settings error with a message
    pub fn invalid_settings(msg: impl Into<String>) -> Self {
        Self::InvalidSettings(msg.into())
    }

    /// Create an edit rejection with a message
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::EditRejected(msg.into())
    }

    /// Text shown on the node that produced this error
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidSettings(msg) | Self::ExecutionFailed(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

fn summarize(diagnostics: &[LoadMessage]) -> String {
    match diagnostics.first() {
        Some(first) if diagnostics.len() > 1 => {
            format!("{} (and {} more)", first.message, diagnostics.len() - 1)
        }
        Some(first) => first.message.clone(),
        None => "no diagnostics".to_string(),
    }
}
