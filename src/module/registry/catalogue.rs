//! Module registry
//!
//! Holds every protocol module registered at startup, keyed by id and by
//! `(type, protocol)`. Written rarely, read on every scheme activation and
//! every export drain.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::model::{ModuleRegistration, ModuleType};
use crate::module::events::{EventManager, ModuleEvent};
use crate::module::traits::{ExchangeError, ModuleCapability};
use crate::module::validation::ManifestValidator;

/// A registration together with its capability table entry
#[derive(Debug, Clone)]
pub struct RegisteredModule {
    pub registration: ModuleRegistration,
    pub capability: ModuleCapability,
}

/// Result of a successful `register` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// New module accepted and announced
    Registered,
    /// Same id and protocol already present, nothing changed
    AlreadyRegistered,
}

#[derive(Default)]
struct RegistryState {
    by_id: HashMap<String, Arc<RegisteredModule>>,
    by_protocol: HashMap<(ModuleType, String), String>,
}

/// Registry of import/export modules
pub struct ModuleRegistry {
    state: RwLock<RegistryState>,
    events: Arc<EventManager>,
}

impl ModuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::with_event_manager(Arc::new(EventManager::new()))
    }

    /// Create an empty registry publishing to an existing event manager
    pub fn with_event_manager(events: Arc<EventManager>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            events,
        }
    }

    /// Event manager carrying "module registered" notifications
    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    /// Register a module
    ///
    /// Idempotent by id. A second registration with the same id but a
    /// different protocol or type, or a new id claiming a protocol that is
    /// already served for that type, is rejected.
    pub async fn register(
        &self,
        registration: ModuleRegistration,
        capability: ModuleCapability,
    ) -> Result<RegisterOutcome, ExchangeError> {
        ManifestValidator::new()
            .validate(&registration)
            .into_result(&format!("module {}", registration.id))?;
        if capability.module_type() != registration.module_type {
            return Err(ExchangeError::Config(format!(
                "module {} is declared {} but provides a {} capability",
                registration.id,
                registration.module_type,
                capability.module_type()
            )));
        }

        let snapshot = {
            let mut state = self.state.write().await;

            if let Some(existing) = state.by_id.get(&registration.id) {
                let current = &existing.registration;
                if current.protocol == registration.protocol
                    && current.module_type == registration.module_type
                {
                    debug!(module = %registration.id, "Module already registered");
                    return Ok(RegisterOutcome::AlreadyRegistered);
                }
                warn!(
                    module = %registration.id,
                    existing = %current.protocol,
                    requested = %registration.protocol,
                    "Rejected conflicting module registration"
                );
                return Err(ExchangeError::Config(format!(
                    "module {} already registered for {} protocol {}",
                    registration.id, current.module_type, current.protocol
                )));
            }

            let protocol_key = (registration.module_type, registration.protocol.clone());
            if let Some(owner) = state.by_protocol.get(&protocol_key) {
                return Err(ExchangeError::Config(format!(
                    "{} protocol {} is already served by module {}",
                    registration.module_type, registration.protocol, owner
                )));
            }

            let module = Arc::new(RegisteredModule {
                registration,
                capability,
            });
            state.by_protocol.insert(protocol_key, module.registration.id.clone());
            state
                .by_id
                .insert(module.registration.id.clone(), Arc::clone(&module));
            module.registration.clone()
        };

        info!(
            module = %snapshot.id,
            module_type = %snapshot.module_type,
            protocol = %snapshot.protocol,
            "Module registered"
        );
        self.events
            .publish(ModuleEvent::Registered(snapshot))
            .await;

        Ok(RegisterOutcome::Registered)
    }

    /// Look up the module serving `protocol` for `module_type`
    pub async fn find_by_protocol(
        &self,
        module_type: ModuleType,
        protocol: &str,
    ) -> Result<Arc<RegisteredModule>, ExchangeError> {
        let state = self.state.read().await;
        state
            .by_protocol
            .get(&(module_type, protocol.to_string()))
            .and_then(|id| state.by_id.get(id))
            .cloned()
            .ok_or_else(|| {
                ExchangeError::NotFound(format!("no {} module for protocol {}", module_type, protocol))
            })
    }

    /// Look up a module by id
    pub async fn find_by_id(&self, id: &str) -> Result<Arc<RegisteredModule>, ExchangeError> {
        let state = self.state.read().await;
        state
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| ExchangeError::NotFound(format!("module {}", id)))
    }

    /// Registrations, optionally filtered by type, ordered by id
    pub async fn list(&self, module_type: Option<ModuleType>) -> Vec<ModuleRegistration> {
        let state = self.state.read().await;
        let mut registrations: Vec<ModuleRegistration> = state
            .by_id
            .values()
            .filter(|m| module_type.map_or(true, |t| m.registration.module_type == t))
            .map(|m| m.registration.clone())
            .collect();
        registrations.sort_by(|a, b| a.id.cmp(&b.id));
        registrations
    }

    /// Record that a scheme is bound to a module
    ///
    /// Replaces the module's snapshot; readers holding the old one are
    /// unaffected.
    pub async fn bind_scheme(&self, module_id: &str, scheme_name: &str) -> Result<(), ExchangeError> {
        let mut state = self.state.write().await;
        let current = state
            .by_id
            .get(module_id)
            .cloned()
            .ok_or_else(|| ExchangeError::NotFound(format!("module {}", module_id)))?;

        if current.registration.schemes.iter().any(|s| s == scheme_name) {
            return Ok(());
        }

        let mut updated = (*current).clone();
        updated.registration.schemes.push(scheme_name.to_string());
        debug!(module = module_id, scheme = scheme_name, "Scheme bound to module");
        state.by_id.insert(module_id.to_string(), Arc::new(updated));
        Ok(())
    }

    /// Number of registered modules
    pub async fn len(&self) -> usize {
        self.state.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Scheme;
    use crate::module::traits::{Exporter, ImportSource};

    fn import_capability() -> ModuleCapability {
        ModuleCapability::Import(Arc::new(|_: &Scheme| -> Result<Box<dyn ImportSource>, ExchangeError> {
            Err(ExchangeError::Import("not used".to_string()))
        }))
    }

    fn export_capability() -> ModuleCapability {
        ModuleCapability::Export(Arc::new(|_: &Scheme| -> Result<Arc<dyn Exporter>, ExchangeError> {
            Err(ExchangeError::Export("not used".to_string()))
        }))
    }

    fn mail_import() -> ModuleRegistration {
        ModuleRegistration::new("import:mail", ModuleType::Import, "mail", ["host"])
    }

    #[tokio::test]
    async fn test_register_is_idempotent_by_id() {
        let registry = ModuleRegistry::new();
        let mut rx = registry.events().subscribe().await;

        let first = registry.register(mail_import(), import_capability()).await.unwrap();
        let second = registry.register(mail_import(), import_capability()).await.unwrap();

        assert_eq!(first, RegisterOutcome::Registered);
        assert_eq!(second, RegisterOutcome::AlreadyRegistered);
        assert_eq!(registry.len().await, 1);

        // Only the first registration is announced
        assert!(matches!(rx.try_recv(), Ok(ModuleEvent::Registered(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_same_id_different_protocol_rejected() {
        let registry = ModuleRegistry::new();
        registry.register(mail_import(), import_capability()).await.unwrap();

        let conflicting = ModuleRegistration::new("import:mail", ModuleType::Import, "imap", ["host"]);
        let err = registry.register(conflicting, import_capability()).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Config(_)));
    }

    #[tokio::test]
    async fn test_protocol_unique_per_type() {
        let registry = ModuleRegistry::new();
        registry.register(mail_import(), import_capability()).await.unwrap();

        let duplicate = ModuleRegistration::new("import:mail2", ModuleType::Import, "mail", Vec::<String>::new());
        assert!(registry.register(duplicate, import_capability()).await.is_err());

        // Same protocol for the other direction is fine
        let export = ModuleRegistration::new("export:mail", ModuleType::Export, "mail", Vec::<String>::new());
        assert_eq!(
            registry.register(export, export_capability()).await.unwrap(),
            RegisterOutcome::Registered
        );
    }

    #[tokio::test]
    async fn test_capability_type_must_match() {
        let registry = ModuleRegistry::new();
        let err = registry.register(mail_import(), export_capability()).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Config(_)));
    }

    #[tokio::test]
    async fn test_lookup_and_list() {
        let registry = ModuleRegistry::new();
        registry.register(mail_import(), import_capability()).await.unwrap();
        registry
            .register(
                ModuleRegistration::new("export:rss", ModuleType::Export, "rss", Vec::<String>::new()),
                export_capability(),
            )
            .await
            .unwrap();

        let found = registry.find_by_protocol(ModuleType::Import, "mail").await.unwrap();
        assert_eq!(found.registration.id, "import:mail");
        assert!(registry.find_by_protocol(ModuleType::Export, "mail").await.is_err());
        assert!(registry.find_by_id("import:rss").await.is_err());

        let all: Vec<String> = registry.list(None).await.into_iter().map(|r| r.id).collect();
        assert_eq!(all, vec!["export:rss", "import:mail"]);
        assert_eq!(registry.list(Some(ModuleType::Export)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_bind_scheme_replaces_snapshot() {
        let registry = ModuleRegistry::new();
        registry.register(mail_import(), import_capability()).await.unwrap();

        let before = registry.find_by_id("import:mail").await.unwrap();
        registry.bind_scheme("import:mail", "newsroom").await.unwrap();
        registry.bind_scheme("import:mail", "newsroom").await.unwrap();
        let after = registry.find_by_id("import:mail").await.unwrap();

        assert!(before.registration.schemes.is_empty());
        assert_eq!(after.registration.schemes, vec!["newsroom"]);
    }
}
