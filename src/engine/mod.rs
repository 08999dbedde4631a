//! Engine orchestration
//!
//! Wires the module registry, permission cache, import scheduler and export
//! queue processor together and owns their background tasks.

pub mod health;

pub use health::{CacheSummary, EngineStatus, HealthStatus};

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ExchangeConfig;
use crate::export::{ExportQueueProcessor, ExportQueueStore, InMemoryExportQueue};
use crate::import::{ImportScheduler, SchedulerSettings};
use crate::model::{ExportQueueEntry, ModuleRegistration, ModuleType, NewExportEntry};
use crate::module::registry::{ModuleRegistry, RegisterOutcome};
use crate::module::traits::{
    ExchangeError, MessageDelivery, ModuleCapability, PermissionResolver, SchemeStore,
};
use crate::module::validation::ManifestValidator;
use crate::permission::{PermissionCache, PermissionChange};
use crate::template::{PlaceholderRenderer, TemplateRenderer};
use crate::utils::{retry_if_retryable, RetryConfig, ShutdownController};

/// Buffer of the permission-change channel
const PERMISSION_CHANGE_BUFFER: usize = 256;

/// Builder for [`ExchangeEngine`]
pub struct EngineBuilder {
    config: ExchangeConfig,
    registry: Option<Arc<ModuleRegistry>>,
    queue: Option<Arc<dyn ExportQueueStore>>,
    renderer: Option<Arc<dyn TemplateRenderer>>,
}

impl EngineBuilder {
    /// Share an existing registry instead of starting empty
    pub fn registry(mut self, registry: Arc<ModuleRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use another export queue store (default: in memory)
    pub fn export_queue(mut self, queue: Arc<dyn ExportQueueStore>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Use another template engine (default: `${path}` placeholders)
    pub fn renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn build(
        self,
        schemes: Arc<dyn SchemeStore>,
        resolver: Arc<dyn PermissionResolver>,
        delivery: Arc<dyn MessageDelivery>,
    ) -> anyhow::Result<ExchangeEngine> {
        self.config.validate()?;
        let config = self.config;

        let registry = self.registry.unwrap_or_default();
        let queue: Arc<dyn ExportQueueStore> = match self.queue {
            Some(queue) => queue,
            None => Arc::new(InMemoryExportQueue::with_archive_limit(config.archive_limit)),
        };
        let renderer: Arc<dyn TemplateRenderer> = match self.renderer {
            Some(renderer) => renderer,
            None => Arc::new(PlaceholderRenderer::new(config.missing_variable)),
        };

        let permissions = Arc::new(PermissionCache::new(resolver, config.permission_cache_config()));
        let shutdown = ShutdownController::new();

        let scheduler = ImportScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&schemes),
            Arc::clone(&permissions),
            delivery,
            SchedulerSettings::from_config(&config),
        )
        .with_shutdown(shutdown.subscribe());

        let processor = ExportQueueProcessor::new(
            Arc::clone(&registry),
            Arc::clone(&schemes),
            Arc::clone(&queue),
            Arc::clone(&permissions),
            renderer,
            config.retry_config(),
            config.timeouts.clone(),
            config.queue_period(),
        )
        .with_principal(config.principal.clone());

        Ok(ExchangeEngine {
            config,
            registry,
            schemes,
            permissions,
            queue,
            scheduler: Arc::new(scheduler),
            processor: Arc::new(processor),
            shutdown,
            tasks: Mutex::new(Vec::new()),
            started_at: Instant::now(),
        })
    }
}

/// The IO exchange engine
pub struct ExchangeEngine {
    config: ExchangeConfig,
    registry: Arc<ModuleRegistry>,
    schemes: Arc<dyn SchemeStore>,
    permissions: Arc<PermissionCache>,
    queue: Arc<dyn ExportQueueStore>,
    scheduler: Arc<ImportScheduler>,
    processor: Arc<ExportQueueProcessor>,
    shutdown: ShutdownController,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started_at: Instant,
}

impl ExchangeEngine {
    pub fn builder(config: ExchangeConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            registry: None,
            queue: None,
            renderer: None,
        }
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<ImportScheduler> {
        &self.scheduler
    }

    pub fn processor(&self) -> &Arc<ExportQueueProcessor> {
        &self.processor
    }

    pub fn permissions(&self) -> &Arc<PermissionCache> {
        &self.permissions
    }

    pub fn export_queue(&self) -> &Arc<dyn ExportQueueStore> {
        &self.queue
    }

    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// Register a protocol module
    pub async fn register_module(
        &self,
        registration: ModuleRegistration,
        capability: ModuleCapability,
    ) -> Result<RegisterOutcome, ExchangeError> {
        self.registry.register(registration, capability).await
    }

    /// Activate every enabled scheme in the store
    ///
    /// Import schemes get a source and a poll schedule. Export schemes are
    /// checked against their module and bound to it. Returns the schemes
    /// that could not be activated.
    pub async fn activate_schemes(&self) -> Result<Vec<(String, ExchangeError)>, ExchangeError> {
        let mut failures = self.scheduler.activate_all().await?;

        let store = &self.schemes;
        let exports = retry_if_retryable(&RetryConfig::store(), move || {
            store.load_active_by_type(ModuleType::Export)
        })
        .await?;

        for scheme in exports {
            let bound = async {
                let module = self
                    .registry
                    .find_by_protocol(ModuleType::Export, &scheme.protocol)
                    .await
                    .map_err(|_| {
                        ExchangeError::Config(format!(
                            "no export module registered for protocol {}",
                            scheme.protocol
                        ))
                    })?;
                ManifestValidator::new()
                    .validate_scheme(&scheme, &module.registration)
                    .into_result(&format!("scheme {}", scheme.name))?;
                self.registry
                    .bind_scheme(&module.registration.id, &scheme.name)
                    .await
            }
            .await;

            if let Err(e) = bound {
                error!(scheme = %scheme.name, protocol = %scheme.protocol, error = %e, "Export scheme not usable");
                failures.push((scheme.name.clone(), e));
            }
        }

        if failures.is_empty() {
            info!("All schemes activated");
        } else {
            warn!(failed = failures.len(), "Some schemes could not be activated");
        }
        Ok(failures)
    }

    /// Route a message into the export queue
    pub async fn enqueue_export(&self, entry: NewExportEntry) -> Result<Uuid, ExchangeError> {
        self.queue.enqueue(entry).await
    }

    pub async fn dead_letters(&self) -> Result<Vec<ExportQueueEntry>, ExchangeError> {
        self.queue.dead_letters().await
    }

    pub async fn requeue_dead_letter(&self, id: Uuid) -> Result<ExportQueueEntry, ExchangeError> {
        self.processor.requeue(id).await
    }

    pub async fn archived(&self) -> Result<Vec<ExportQueueEntry>, ExchangeError> {
        self.queue.archived().await
    }

    /// Channel feeding "permission changed" notifications into the cache
    pub fn permission_changes(&self) -> mpsc::Sender<PermissionChange> {
        let (tx, rx) = mpsc::channel(PERMISSION_CHANGE_BUFFER);
        let handle = self.permissions.spawn_invalidation_listener(rx);
        // The listener ends when every sender is dropped; no need to track it
        drop(handle);
        tx
    }

    /// Spawn the import scheduler and export processor loops
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            warn!("Engine already started");
            return;
        }
        info!(
            pool = self.config.thread_pool_size,
            queue_period = self.config.queue_period,
            "Starting exchange engine"
        );

        let scheduler = Arc::clone(&self.scheduler);
        tasks.push(tokio::spawn(scheduler.run()));

        let processor = Arc::clone(&self.processor);
        let shutdown = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move { processor.run(shutdown).await }));

        if self.permissions.is_enabled() {
            let permissions = Arc::clone(&self.permissions);
            let mut shutdown = self.shutdown.subscribe();
            let period = self.config.permission_cache_config().expiry;
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    tokio::select! {
                        _ = crate::utils::shutdown_requested(&mut shutdown) => break,
                        _ = interval.tick() => {
                            let purged = permissions.purge_expired().await;
                            if purged > 0 {
                                tracing::debug!(purged, "Expired permission answers purged");
                            }
                        }
                    }
                }
            }));
        }
    }

    /// Signal shutdown and wait for running cycles to finish
    pub async fn shutdown(&self) {
        info!("Stopping exchange engine");
        self.shutdown.trigger();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Engine task ended abnormally");
            }
        }
        info!("Exchange engine stopped");
    }

    /// Operator status board
    pub async fn status(&self) -> Result<EngineStatus, ExchangeError> {
        let stats = self.permissions.stats();
        Ok(EngineStatus::new(
            self.scheduler.statuses().await,
            self.queue.pending_protocols().await?,
            self.queue.dead_letters().await?.len(),
            self.queue.archived().await?.len(),
            CacheSummary {
                enabled: self.permissions.is_enabled(),
                hits: stats.hits,
                misses: stats.misses,
                invalidations: stats.invalidations,
            },
            self.started_at.elapsed().as_secs(),
        ))
    }
}
