//! In-memory scheme store

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::model::{ModuleType, Scheme};
use crate::module::traits::{ExchangeError, SchemeStore};

/// Schemes kept in a map keyed by id
#[derive(Default)]
pub struct InMemorySchemeStore {
    schemes: RwLock<BTreeMap<String, Scheme>>,
}

impl InMemorySchemeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `schemes`
    pub fn with_schemes(schemes: impl IntoIterator<Item = Scheme>) -> Self {
        Self {
            schemes: RwLock::new(schemes.into_iter().map(|s| (s.id.clone(), s)).collect()),
        }
    }

    pub async fn len(&self) -> usize {
        self.schemes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.schemes.read().await.is_empty()
    }
}

#[async_trait]
impl SchemeStore for InMemorySchemeStore {
    async fn load(&self, id: &str) -> Result<Scheme, ExchangeError> {
        self.schemes
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ExchangeError::NotFound(format!("scheme {}", id)))
    }

    async fn load_active_by_type(&self, module_type: ModuleType) -> Result<Vec<Scheme>, ExchangeError> {
        Ok(self
            .schemes
            .read()
            .await
            .values()
            .filter(|s| s.enabled && s.module_type == module_type)
            .cloned()
            .collect())
    }

    async fn save(&self, scheme: Scheme) -> Result<(), ExchangeError> {
        self.schemes.write().await.insert(scheme.id.clone(), scheme);
        Ok(())
    }
}
