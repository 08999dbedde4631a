//! Module validation framework
//!
//! Provides registration validation and scheme-against-module checks.

pub mod manifest_validator;

pub use manifest_validator::{ManifestValidator, ValidationResult};
