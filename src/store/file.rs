//! Directory of TOML scheme files
//!
//! Each scheme lives in `<dir>/<id>.toml`:
//!
//! ```toml
//! id = "mail-sports"
//! name = "sports-inbox"
//! protocol = "mail"
//! type = "import"
//!
//! [config]
//! host = "imap.example.org"
//! login = "sports"
//! password = "secret"
//! ```
//!
//! Files that fail to parse are logged and skipped when listing, so one bad
//! file does not hide every other scheme.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::model::{ModuleType, Scheme};
use crate::module::traits::{ExchangeError, SchemeStore};

/// Scheme store backed by a directory of TOML files
#[derive(Debug, Clone)]
pub struct FileSchemeStore {
    dir: PathBuf,
}

impl FileSchemeStore {
    /// Use `dir`, creating it if needed
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, ExchangeError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, ExchangeError> {
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            || id.starts_with('.')
        {
            return Err(ExchangeError::Config(format!(
                "scheme id '{}' cannot be used as a file name",
                id
            )));
        }
        Ok(self.dir.join(format!("{}.toml", id)))
    }

    async fn read_scheme(path: &Path) -> Result<Scheme, ExchangeError> {
        let contents = tokio::fs::read_to_string(path).await?;
        Ok(toml::from_str(&contents)?)
    }

    /// Every parseable scheme in the directory, sorted by file name
    pub async fn load_all(&self) -> Result<Vec<Scheme>, ExchangeError> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut schemes = Vec::with_capacity(paths.len());
        for path in paths {
            match Self::read_scheme(&path).await {
                Ok(scheme) => schemes.push(scheme),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable scheme file"),
            }
        }
        Ok(schemes)
    }
}

#[async_trait]
impl SchemeStore for FileSchemeStore {
    async fn load(&self, id: &str) -> Result<Scheme, ExchangeError> {
        let path = self.path_for(id)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(ExchangeError::NotFound(format!("scheme {}", id)));
        }
        let scheme = Self::read_scheme(&path).await?;
        if scheme.id != id {
            return Err(ExchangeError::Config(format!(
                "{} declares id '{}'",
                path.display(),
                scheme.id
            )));
        }
        Ok(scheme)
    }

    async fn load_active_by_type(&self, module_type: ModuleType) -> Result<Vec<Scheme>, ExchangeError> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|s| s.enabled && s.module_type == module_type)
            .collect())
    }

    /// Writes to a temporary file and renames it into place
    async fn save(&self, scheme: Scheme) -> Result<(), ExchangeError> {
        let path = self.path_for(&scheme.id)?;
        let contents = toml::to_string_pretty(&scheme)?;
        let tmp = path.with_extension("toml.tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(scheme = %scheme.id, path = %path.display(), "Scheme saved");
        Ok(())
    }
}
