//! Module manifest parsing
//!
//! A manifest describes a protocol module's registration contract in TOML so
//! schemes can be checked without loading the adapter itself.
//!
//! ```toml
//! id = "import:mail"
//! type = "import"
//! protocol = "mail"
//! required_config_keys = ["host", "login", "password"]
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::model::{ModuleRegistration, ModuleType};
use crate::module::traits::ExchangeError;

/// Module manifest (TOML structure)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// Stable module id
    pub id: String,
    /// Import or export
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    /// Protocol handled by the module
    pub protocol: String,
    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,
    /// Config keys every bound scheme must provide
    #[serde(default)]
    pub required_config_keys: Vec<String>,
}

impl ModuleManifest {
    /// Parse a manifest from TOML text
    pub fn parse(contents: &str) -> Result<Self, ExchangeError> {
        let manifest: ModuleManifest = toml::from_str(contents)?;

        if manifest.id.is_empty() {
            return Err(ExchangeError::Config("Module id cannot be empty".to_string()));
        }
        if manifest.protocol.is_empty() {
            return Err(ExchangeError::Config(format!(
                "Module {} has an empty protocol",
                manifest.id
            )));
        }

        Ok(manifest)
    }

    /// Load manifest from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ExchangeError> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| {
            ExchangeError::Config(format!(
                "Failed to read manifest {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::parse(&contents)
    }

    /// Convert to a registration record
    pub fn to_registration(&self) -> ModuleRegistration {
        ModuleRegistration::new(
            self.id.clone(),
            self.module_type,
            self.protocol.clone(),
            self.required_config_keys.iter().cloned(),
        )
    }
}

/// Load every `*.toml` manifest in a directory, sorted by file name
///
/// Unparseable manifests are logged and skipped.
pub fn load_manifests<P: AsRef<Path>>(dir: P) -> Result<Vec<ModuleManifest>, ExchangeError> {
    let dir = dir.as_ref();
    info!("Loading module manifests from {:?}", dir);

    let mut paths: Vec<_> = fs::read_dir(dir)
        .map_err(|e| ExchangeError::Config(format!("Failed to read manifest directory {:?}: {}", dir, e)))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().map_or(false, |ext| ext == "toml"))
        .collect();
    paths.sort();

    let mut manifests = Vec::new();
    for path in paths {
        match ModuleManifest::from_file(&path) {
            Ok(manifest) => {
                debug!("Loaded manifest for module {}", manifest.id);
                manifests.push(manifest);
            }
            Err(e) => {
                warn!("Skipping manifest {:?}: {}", path, e);
            }
        }
    }

    info!("Loaded {} module manifests", manifests.len());
    Ok(manifests)
}
