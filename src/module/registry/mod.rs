//! Module registry and manifests
//!
//! Handles explicit module registration and manifest parsing.

pub mod catalogue;
pub mod manifest;

pub use catalogue::{ModuleRegistry, RegisterOutcome, RegisteredModule};
pub use manifest::{load_manifests, ModuleManifest};
