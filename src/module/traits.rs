//! Module system traits and interfaces
//!
//! Defines the capabilities protocol adapters implement and the narrow
//! interfaces through which the engine reaches its external collaborators.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::model::{ExchangeContext, MessageHeader, MessagePayload, ModuleType, Scheme};
use crate::permission::PermissionKey;

/// A single unread item exposed by an import source
#[async_trait]
pub trait ImportMessage: Send + Sync {
    /// Source-local id, stable and unique among unread items
    fn id(&self) -> &str;

    /// Routing header
    fn header(&self) -> &MessageHeader;

    /// Materialize the full message payload
    async fn payload(&self) -> Result<MessagePayload, ExchangeError>;

    /// Remove the message from the source's unread set
    async fn mark_consumed(&self) -> Result<(), ExchangeError>;
}

/// Import capability, one instance per active import scheme
///
/// The scheduler guarantees `close` is called after every `open`, and that
/// no two cycles use the same instance concurrently.
#[async_trait]
pub trait ImportSource: Send {
    /// Acquire connections or handles for one poll cycle
    async fn open(&mut self, ctx: &ExchangeContext) -> Result<(), ExchangeError>;

    /// Release everything acquired in `open`
    async fn close(&mut self) -> Result<(), ExchangeError>;

    /// Finite snapshot of unread messages
    async fn get_unread_messages(&mut self) -> Result<Vec<Box<dyn ImportMessage>>, ExchangeError>;

    /// Called after successful delivery; the message must not be returned
    /// by later `get_unread_messages` calls.
    async fn on_success(
        &mut self,
        message: &dyn ImportMessage,
        delivered_id: &str,
    ) -> Result<(), ExchangeError> {
        debug!(msg_id = message.id(), delivered_id, "Marking message consumed");
        message.mark_consumed().await
    }

    /// Called when a message could not be delivered; it stays unread
    async fn on_error(&mut self, message: &dyn ImportMessage, error: &ExchangeError) {
        debug!(msg_id = message.id(), %error, "Message left unread");
    }
}

/// Content handed to an exporter
#[derive(Debug, Clone, PartialEq)]
pub struct ExportMessage {
    pub entry_id: Uuid,
    pub directory: String,
    pub scheme_name: String,
    pub transaction_id: String,
    /// Rendered template output, or the raw payload body
    pub content: String,
    /// 1-based attempt number
    pub attempt: u32,
}

/// Export capability
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Push a message out; returns the id assigned by the external system
    async fn export(
        &self,
        ctx: &ExchangeContext,
        message: &ExportMessage,
    ) -> Result<String, ExchangeError>;
}

/// Builds an import source for a scheme
pub trait ImportSourceFactory: Send + Sync {
    fn create(&self, scheme: &Scheme) -> Result<Box<dyn ImportSource>, ExchangeError>;
}

impl<F> ImportSourceFactory for F
where
    F: Fn(&Scheme) -> Result<Box<dyn ImportSource>, ExchangeError> + Send + Sync,
{
    fn create(&self, scheme: &Scheme) -> Result<Box<dyn ImportSource>, ExchangeError> {
        self(scheme)
    }
}

/// Builds an exporter for a scheme
pub trait ExporterFactory: Send + Sync {
    fn create(&self, scheme: &Scheme) -> Result<Arc<dyn Exporter>, ExchangeError>;
}

impl<F> ExporterFactory for F
where
    F: Fn(&Scheme) -> Result<Arc<dyn Exporter>, ExchangeError> + Send + Sync,
{
    fn create(&self, scheme: &Scheme) -> Result<Arc<dyn Exporter>, ExchangeError> {
        self(scheme)
    }
}

/// Capability table entry a protocol adapter registers with
#[derive(Clone)]
pub enum ModuleCapability {
    Import(Arc<dyn ImportSourceFactory>),
    Export(Arc<dyn ExporterFactory>),
}

impl ModuleCapability {
    pub fn module_type(&self) -> ModuleType {
        match self {
            ModuleCapability::Import(_) => ModuleType::Import,
            ModuleCapability::Export(_) => ModuleType::Export,
        }
    }
}

impl std::fmt::Debug for ModuleCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ModuleCapability::{}", self.module_type())
    }
}

/// Persistence of scheme configuration
#[async_trait]
pub trait SchemeStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Scheme, ExchangeError>;

    /// Enabled schemes of one type
    async fn load_active_by_type(&self, module_type: ModuleType) -> Result<Vec<Scheme>, ExchangeError>;

    async fn save(&self, scheme: Scheme) -> Result<(), ExchangeError>;
}

/// Authoritative permission lookup behind the permission cache
#[async_trait]
pub trait PermissionResolver: Send + Sync {
    async fn resolve(&self, directory: &str, key: &PermissionKey) -> Result<bool, ExchangeError>;
}

/// Internal collaborator that stores an imported message
#[async_trait]
pub trait MessageDelivery: Send + Sync {
    /// Returns the id the message was stored under
    async fn deliver(
        &self,
        ctx: &ExchangeContext,
        scheme: &Scheme,
        header: &MessageHeader,
        payload: MessagePayload,
    ) -> Result<String, ExchangeError>;
}

/// Exchange engine errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExchangeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Import failed: {0}")]
    Import(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Permission denied: directory {directory} lacks {permission}")]
    PermissionDenied { directory: String, permission: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out during {0}")]
    Timeout(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl ExchangeError {
    pub fn permission_denied(directory: &str, key: &PermissionKey) -> Self {
        ExchangeError::PermissionDenied {
            directory: directory.to_string(),
            permission: key.to_string(),
        }
    }

    /// Errors that disable a scheme instead of being retried
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExchangeError::Config(_) | ExchangeError::NotFound(_))
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(e: serde_json::Error) -> Self {
        ExchangeError::Store(format!("serialization: {}", e))
    }
}

impl From<std::io::Error> for ExchangeError {
    fn from(e: std::io::Error) -> Self {
        ExchangeError::Store(e.to_string())
    }
}

impl From<toml::de::Error> for ExchangeError {
    fn from(e: toml::de::Error) -> Self {
        ExchangeError::Config(format!("invalid TOML: {}", e))
    }
}

impl From<toml::ser::Error> for ExchangeError {
    fn from(e: toml::ser::Error) -> Self {
        ExchangeError::Store(format!("TOML serialization: {}", e))
    }
}
