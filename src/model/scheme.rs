//! Module registrations and schemes

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Direction a module moves content in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    /// Pulls content from an external system
    #[serde(alias = "IMPORT")]
    Import,
    /// Pushes content to an external system
    #[serde(alias = "EXPORT")]
    Export,
}

impl ModuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleType::Import => "import",
            ModuleType::Export => "export",
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration record of a protocol module
///
/// Immutable once accepted by the registry. Binding a scheme produces a new
/// snapshot rather than mutating a shared one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRegistration {
    /// Stable module id, e.g. `import:mail`
    pub id: String,
    /// Import or export
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    /// Protocol handled by this module
    pub protocol: String,
    /// Config keys every bound scheme must provide
    #[serde(default)]
    pub required_config_keys: BTreeSet<String>,
    /// Names of schemes currently bound, in bind order
    #[serde(default)]
    pub schemes: Vec<String>,
}

impl ModuleRegistration {
    pub fn new(
        id: impl Into<String>,
        module_type: ModuleType,
        protocol: impl Into<String>,
        required_config_keys: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id: id.into(),
            module_type,
            protocol: protocol.into(),
            required_config_keys: required_config_keys.into_iter().map(Into::into).collect(),
            schemes: Vec::new(),
        }
    }

    /// Required keys absent from `config`, in sorted order
    pub fn missing_config_keys(&self, config: &BTreeMap<String, serde_json::Value>) -> Vec<String> {
        self.required_config_keys
            .iter()
            .filter(|key| !config.contains_key(key.as_str()))
            .cloned()
            .collect()
    }
}

/// A configured binding of a protocol module to a use case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scheme {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub protocol: String,
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    /// Disabled schemes are never returned as active
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Opaque protocol configuration
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl Scheme {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        module_type: ModuleType,
        protocol: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            protocol: protocol.into(),
            module_type,
            enabled: true,
            config: BTreeMap::new(),
        }
    }

    /// Builder-style config setter
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Get a config value as a string slice
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }

    /// Get a config value as an unsigned integer (numbers or numeric strings)
    pub fn config_u64(&self, key: &str) -> Option<u64> {
        match self.config.get(key)? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}
