//! Directory permission gating
//!
//! Decides whether a directory may import from or export to a protocol,
//! caching the answers of the external permission resolver.

pub mod cache;

pub use cache::{PermissionCache, PermissionCacheConfig, PermissionCacheStats};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::ModuleType;

/// Permission being checked: an operation on a protocol
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermissionKey {
    pub operation: ModuleType,
    pub protocol: String,
}

impl PermissionKey {
    pub fn new(operation: ModuleType, protocol: impl Into<String>) -> Self {
        Self {
            operation,
            protocol: protocol.into(),
        }
    }

    pub fn import(protocol: impl Into<String>) -> Self {
        Self::new(ModuleType::Import, protocol)
    }

    pub fn export(protocol: impl Into<String>) -> Self {
        Self::new(ModuleType::Export, protocol)
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.operation, self.protocol)
    }
}

/// "Permission changed" notification
///
/// `key = None` means every permission of the directory changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionChange {
    pub directory: String,
    pub key: Option<PermissionKey>,
}

impl PermissionChange {
    pub fn key(directory: impl Into<String>, key: PermissionKey) -> Self {
        Self {
            directory: directory.into(),
            key: Some(key),
        }
    }

    pub fn directory(directory: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            key: None,
        }
    }
}
