//! Credentials Reader Node
//!
//! Exposes the login of a named credential and whether a secret is set.
//! The secret itself never leaves the node.

use dataflow_engine::{
    ConfigureContext, EngineError, ExecutionContext, NodeCategory, NodeDescriptor, NodeModel,
    PortSpec, PortType, PortValue, Result,
};
use serde::Deserialize;

use crate::settings::{self, SettingsError};
use crate::BuiltinNode;

#[derive(Debug, Deserialize)]
struct CredentialSettings {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct CredentialView {
    login: String,
    #[serde(default)]
    secret: String,
}

/// Credentials Reader Node
///
/// # Settings
/// - `name` - the credential to read
///
/// # Outputs
/// - `login` - the credential's login
/// - `hasSecret` - whether a non-empty secret is set
#[derive(Debug, Default)]
pub struct CredentialsReaderNode;

impl CredentialsReaderNode {
    fn lookup(name: &str, value: Option<serde_json::Value>) -> Result<CredentialView> {
        let value = value.ok_or_else(|| {
            EngineError::invalid_settings(format!("Credential '{}' is not defined", name))
        })?;
        serde_json::from_value(value).map_err(|_| {
            EngineError::invalid_settings(format!("'{}' is not a credential", name))
        })
    }

    fn name(settings: &serde_json::Value) -> Result<String> {
        let parsed: CredentialSettings = settings::parse(settings)?;
        if parsed.name.is_empty() {
            return Err(SettingsError::Missing("name").into());
        }
        Ok(parsed.name)
    }
}

impl BuiltinNode for CredentialsReaderNode {
    const NODE_TYPE: &'static str = "credentials-reader";

    fn descriptor() -> NodeDescriptor {
        NodeDescriptor::new(Self::NODE_TYPE, NodeCategory::Source, "Credentials Reader")
            .with_description("Reads the login of a credential")
            .with_output("login", PortType::Text)
            .with_output("hasSecret", PortType::Boolean)
            .with_default_settings(serde_json::json!({ "name": "" }))
    }
}

inventory::submit!(dataflow_engine::FactoryRegistration {
    node_type: CredentialsReaderNode::NODE_TYPE,
    factory: <CredentialsReaderNode as BuiltinNode>::factory,
});

impl NodeModel for CredentialsReaderNode {
    fn configure(&self, ctx: &ConfigureContext<'_>) -> Result<Vec<Option<PortSpec>>> {
        let name = Self::name(ctx.settings())?;
        let credential = Self::lookup(&name, ctx.external_value(&name))?;
        if credential.secret.is_empty() {
            ctx.set_warning(format!("Credential '{}' has no secret", name));
        }
        Ok(vec![
            Some(settings::spec(PortType::Text)),
            Some(settings::spec(PortType::Boolean)),
        ])
    }

    fn execute(&self, _inputs: &[Option<PortValue>], ctx: &ExecutionContext) -> Result<Vec<PortValue>> {
        let name = Self::name(ctx.settings())?;
        let credential = Self::lookup(&name, ctx.external_value(&name))
            .map_err(|e| EngineError::failed(e.user_message()))?;
        log::debug!("CredentialsReaderNode {}: read credential '{}'", ctx.node_id(), name);
        Ok(vec![
            serde_json::Value::String(credential.login),
            serde_json::Value::Bool(!credential.secret.is_empty()),
        ])
    }
}
