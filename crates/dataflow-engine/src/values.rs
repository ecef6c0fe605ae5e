//! External values: workflow variables and credentials
//!
//! Values are pushed in from outside with [`ExternalValues::update`] and
//! read by node models when they next configure or execute. Updating a
//! value never resets or reconfigures anything, so completed work stays
//! executed until a reset reaches it.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A single named external value
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExternalValue {
    /// Plain workflow variable
    Variable { value: serde_json::Value },
    /// Login/secret pair; the secret is never logged
    Credential {
        login: String,
        #[serde(default, skip_serializing)]
        secret: String,
    },
}

impl ExternalValue {
    pub fn variable(value: impl Into<serde_json::Value>) -> Self {
        Self::Variable {
            value: value.into(),
        }
    }

    pub fn credential(login: impl Into<String>, secret: impl Into<String>) -> Self {
        Self::Credential {
            login: login.into(),
            secret: secret.into(),
        }
    }

    /// JSON view handed to node models
    ///
    /// Credentials render as `{"login": .., "secret": ..}`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Variable { value } => value.clone(),
            Self::Credential { login, secret } => {
                serde_json::json!({ "login": login, "secret": secret })
            }
        }
    }
}

impl fmt::Debug for ExternalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Variable { value } => f.debug_struct("Variable").field("value", value).finish(),
            Self::Credential { login, .. } => f
                .debug_struct("Credential")
                .field("login", login)
                .field("secret", &"<redacted>")
                .finish(),
        }
    }
}

/// Per-project store of external values
#[derive(Debug, Default)]
pub struct ExternalValues {
    values: RwLock<BTreeMap<String, ExternalValue>>,
}

impl ExternalValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace a value
    pub fn update(&self, name: impl Into<String>, value: ExternalValue) {
        let name = name.into();
        log::debug!("External value '{}' updated", name);
        self.values.write().insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<ExternalValue> {
        self.values.read().get(name).cloned()
    }

    /// JSON view of a value, see [`ExternalValue::to_json`]
    pub fn get_json(&self, name: &str) -> Option<serde_json::Value> {
        self.values.read().get(name).map(ExternalValue::to_json)
    }

    pub fn remove(&self, name: &str) -> Option<ExternalValue> {
        self.values.write().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.values.read().keys().cloned().collect()
    }

    /// Copy of all values, used when saving a project
    pub fn snapshot(&self) -> BTreeMap<String, ExternalValue> {
        self.values.read().clone()
    }

    /// Replace all values, used when loading a project
    pub fn restore(&self, values: BTreeMap<String, ExternalValue>) {
        *self.values.write() = values;
    }
}
