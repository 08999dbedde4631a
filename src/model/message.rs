//! Message header and payload carried through import and export

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Routing information of an imported message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Directory the message is routed into
    pub directory: String,
    /// Free-form source headers (subject, sender, ...)
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl MessageHeader {
    pub fn new(directory: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Message content
///
/// The engine does not interpret content; `body` is passed through raw when
/// no template applies and `fields` feed template variables.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessagePayload {
    pub body: String,
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl MessagePayload {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}
