//! IO Exchange Engine
//!
//! Moves content between directories and external systems through pluggable
//! protocol modules (mail, RSS, flat files, ...). Adapters register an import
//! source or an exporter per protocol; the engine schedules polling, queues
//! and retries exports, renders export templates and gates every directory
//! access through a permission cache.
//!
//! ## Components
//!
//! 1. **Module registry** (`module`): protocol adapters by id and protocol
//! 2. **Permission cache** (`permission`): TTL-bounded directory authorization
//! 3. **Template renderer** (`template`): `${path}` placeholders over message context
//! 4. **Import scheduler** (`import`): single-flight polling per scheme
//! 5. **Export queue processor** (`export`): FIFO per protocol, retries, dead letters
//!
//! The scheme store, permission resolver and message delivery are external
//! collaborators injected as traits; `store` ships in-memory and TOML-file
//! scheme stores.

pub mod config;
pub mod engine;
pub mod export;
pub mod import;
pub mod model;
pub mod module;
pub mod permission;
pub mod store;
pub mod template;
pub mod utils;

pub use config::{ExchangeConfig, LoggingConfig, RetryPolicyConfig, TimeoutConfig};
pub use engine::{EngineStatus, ExchangeEngine};
pub use export::{ExportQueueProcessor, ExportQueueStore, InMemoryExportQueue};
pub use import::{CycleReport, CycleState, ImportScheduler, SchemeStatus, TickOutcome};
pub use model::{
    EntryStatus, ExchangeContext, ExportQueueEntry, MessageHeader, MessagePayload,
    ModuleRegistration, ModuleType, NewExportEntry, Scheme,
};
pub use module::{ExchangeError, ModuleCapability, ModuleRegistry};
pub use permission::{PermissionCache, PermissionChange, PermissionKey};
pub use template::{MissingVariablePolicy, PlaceholderRenderer, TemplateContext, TemplateRenderer};

/// Crate result type
pub type Result<T> = std::result::Result<T, ExchangeError>;
