//! Settings parsing and spec helpers shared by the built-in nodes

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use dataflow_engine::{EngineError, PortSpec, PortType};

/// Problems with a node's settings blob
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The blob does not match the node's settings shape
    #[error("{0}")]
    Malformed(#[from] serde_json::Error),

    /// A setting that has no default is absent
    #[error("Setting '{0}' is required")]
    Missing(&'static str),

    /// A setting is present but not usable
    #[error("Setting '{name}' is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl From<SettingsError> for EngineError {
    fn from(err: SettingsError) -> Self {
        EngineError::invalid_settings(err.to_string())
    }
}

/// Deserialize settings; `null` is treated as an empty object
pub fn parse<T: DeserializeOwned>(settings: &Value) -> Result<T, SettingsError> {
    let value = if settings.is_null() {
        Value::Object(Default::default())
    } else {
        settings.clone()
    };
    Ok(serde_json::from_value(value)?)
}

/// Spec describing a port carrying `port_type`
pub fn spec(port_type: PortType) -> PortSpec {
    serde_json::json!({ "type": port_type })
}

/// Port type recorded in a spec, if any
pub fn spec_type(spec: &PortSpec) -> Option<PortType> {
    serde_json::from_value(spec.get("type")?.clone()).ok()
}

/// Port type a JSON value would travel as
pub fn type_of(value: &Value) -> PortType {
    match value {
        Value::Number(_) => PortType::Number,
        Value::String(_) => PortType::Text,
        Value::Bool(_) => PortType::Boolean,
        Value::Array(rows) if rows.iter().all(Value::is_object) && !rows.is_empty() => PortType::Table,
        Value::Null | Value::Array(_) | Value::Object(_) => PortType::Json,
    }
}
