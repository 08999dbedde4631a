//! Template rendering for exported content
//!
//! A renderer turns template text and a [`TemplateContext`] into the content
//! handed to an exporter. Rendering is pure: everything it may depend on,
//! including the export timestamp, is in the context.

pub mod placeholder;

pub use placeholder::{parse_template, PlaceholderRenderer, Segment};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{ExportQueueEntry, Scheme};
use crate::module::traits::ExchangeError;

/// How an unresolvable variable is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingVariablePolicy {
    /// Render as an empty string
    Empty,
    /// Fail with `TemplateError`
    #[default]
    Error,
}

/// Template engine interface
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, context: &TemplateContext) -> Result<String, ExchangeError>;
}

/// Variables visible to a template, grouped in namespaces
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateContext {
    root: Map<String, Value>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a namespace
    pub fn with_namespace(mut self, name: impl Into<String>, value: Value) -> Self {
        self.root.insert(name.into(), value);
        self
    }

    /// Context for exporting `entry` through `scheme`
    ///
    /// Namespaces: `message` (payload fields and `body`), `header`
    /// (`directory`, `transaction_id`, `scheme`), `config` (scheme config)
    /// and `export` (`timestamp`, `attempt`).
    pub fn for_export(entry: &ExportQueueEntry, scheme: &Scheme, timestamp: u64, attempt: u32) -> Self {
        let mut message: Map<String, Value> = entry
            .payload
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        message.insert("body".to_string(), Value::String(entry.payload.body.clone()));

        let mut header = Map::new();
        header.insert("directory".to_string(), Value::String(entry.directory.clone()));
        header.insert(
            "transaction_id".to_string(),
            Value::String(entry.transaction_id.clone()),
        );
        header.insert("scheme".to_string(), Value::String(entry.scheme_name.clone()));

        let config: Map<String, Value> = scheme
            .config
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut export = Map::new();
        export.insert("timestamp".to_string(), Value::from(timestamp));
        export.insert("attempt".to_string(), Value::from(attempt));

        Self::new()
            .with_namespace("message", Value::Object(message))
            .with_namespace("header", Value::Object(header))
            .with_namespace("config", Value::Object(config))
            .with_namespace("export", Value::Object(export))
    }

    /// Resolve a dotted path such as `message.subject`
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.root.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}
