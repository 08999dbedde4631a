//! Module system for the exchange engine
//!
//! Protocol adapters (mail, RSS, flat files, ...) register themselves here at
//! process start with an explicit capability table.
//!
//! ## Architecture
//!
//! - **Explicit registration**: each adapter calls `ModuleRegistry::register`
//!   with its registration record and a source or exporter factory
//! - **Protocol lookup**: schemes resolve their handler by `(type, protocol)`
//! - **Notifications**: accepted registrations are announced to subscribers

pub mod events;
pub mod registry;
pub mod traits;
pub mod validation;

pub use events::{EventManager, ModuleEvent};
pub use registry::{ModuleManifest, ModuleRegistry, RegisterOutcome, RegisteredModule};
pub use traits::{
    ExchangeError, ExportMessage, Exporter, ExporterFactory, ImportMessage, ImportSource,
    ImportSourceFactory, MessageDelivery, ModuleCapability, PermissionResolver, SchemeStore,
};
pub use validation::{ManifestValidator, ValidationResult};
