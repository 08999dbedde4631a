//! Export queue processor
//!
//! Drains the export queue on a fixed period. Protocols drain concurrently;
//! within a protocol entries go out strictly in enqueue order, so an entry
//! that is waiting for a retry holds back the entries behind it.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::queue::ExportQueueStore;
use crate::config::TimeoutConfig;
use crate::model::{EntryStatus, ExchangeContext, ExportQueueEntry, ModuleType, Scheme};
use crate::module::registry::{ModuleRegistry, RegisteredModule};
use crate::module::traits::{ExchangeError, ExportMessage, Exporter, ModuleCapability, SchemeStore};
use crate::module::validation::ManifestValidator;
use crate::permission::{PermissionCache, PermissionKey};
use crate::template::{TemplateContext, TemplateRenderer};
use crate::utils::{
    bounded, current_timestamp, is_shutdown, retry_if_retryable, shutdown_requested, RetryConfig,
};

/// Outcome counts of one drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Exported and archived
    pub exported: usize,
    /// Failed and scheduled for another attempt
    pub retried: usize,
    /// Moved to the dead-letter list
    pub dead_lettered: usize,
    /// Protocols that stopped early to keep FIFO order
    pub held_back: usize,
    /// Entries another processor had already claimed
    pub skipped: usize,
}

impl DrainReport {
    fn merge(&mut self, other: DrainReport) {
        self.exported += other.exported;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
        self.held_back += other.held_back;
        self.skipped += other.skipped;
    }
}

/// What to do with the rest of a protocol after one entry
enum Flow {
    Continue,
    Stop,
}

struct CachedExporter {
    scheme: Scheme,
    exporter: Arc<dyn Exporter>,
}

/// Periodic drain of the export queue
pub struct ExportQueueProcessor {
    registry: Arc<ModuleRegistry>,
    schemes: Arc<dyn SchemeStore>,
    queue: Arc<dyn ExportQueueStore>,
    permissions: Arc<PermissionCache>,
    renderer: Arc<dyn TemplateRenderer>,
    retry: RetryConfig,
    timeouts: TimeoutConfig,
    period: Duration,
    principal: String,
    /// Exporter instances by scheme name, rebuilt when the scheme changes
    exporters: Mutex<HashMap<String, CachedExporter>>,
}

impl ExportQueueProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ModuleRegistry>,
        schemes: Arc<dyn SchemeStore>,
        queue: Arc<dyn ExportQueueStore>,
        permissions: Arc<PermissionCache>,
        renderer: Arc<dyn TemplateRenderer>,
        retry: RetryConfig,
        timeouts: TimeoutConfig,
        period: Duration,
    ) -> Self {
        Self {
            registry,
            schemes,
            queue,
            permissions,
            renderer,
            retry,
            timeouts,
            period,
            principal: crate::model::context::SYSTEM_PRINCIPAL.to_string(),
            exporters: Mutex::new(HashMap::new()),
        }
    }

    /// Act as `principal` instead of the system principal
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = principal.into();
        self
    }

    pub fn queue(&self) -> &Arc<dyn ExportQueueStore> {
        &self.queue
    }

    /// Drain every protocol once
    pub async fn tick(&self, shutdown: &watch::Receiver<bool>) -> Result<DrainReport, ExchangeError> {
        let store_retry = RetryConfig::store();
        let schemes = &self.schemes;
        let active = retry_if_retryable(&store_retry, move || {
            schemes.load_active_by_type(ModuleType::Export)
        })
        .await?;
        let active: HashMap<String, Scheme> =
            active.into_iter().map(|s| (s.name.clone(), s)).collect();
        self.prune_exporters(&active).await;

        let protocols = self.queue.pending_protocols().await?;
        if protocols.is_empty() {
            return Ok(DrainReport::default());
        }
        debug!(protocols = protocols.len(), "Draining export queue");

        let drains = protocols
            .iter()
            .map(|protocol| self.drain_protocol(protocol, &active, shutdown));

        let mut report = DrainReport::default();
        for (protocol, result) in protocols.iter().zip(join_all(drains).await) {
            match result {
                Ok(r) => report.merge(r),
                Err(e) => warn!(protocol = %protocol, error = %e, "Export drain aborted"),
            }
        }

        if report != DrainReport::default() {
            info!(
                exported = report.exported,
                retried = report.retried,
                dead_lettered = report.dead_lettered,
                "Export queue drained"
            );
        }
        Ok(report)
    }

    async fn drain_protocol(
        &self,
        protocol: &str,
        active: &HashMap<String, Scheme>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<DrainReport, ExchangeError> {
        let mut report = DrainReport::default();
        let module = self.registry.find_by_protocol(ModuleType::Export, protocol).await;
        let key = PermissionKey::export(protocol);

        for entry in self.queue.pending_for(protocol).await? {
            if is_shutdown(shutdown) {
                debug!(protocol, "Shutdown requested, stopping export drain");
                break;
            }

            let module = match &module {
                Ok(module) => module,
                Err(_) => {
                    let error = ExchangeError::Config(format!(
                        "no export module registered for protocol {}",
                        protocol
                    ));
                    match self.queue.claim(entry.id).await? {
                        Some(claimed) => {
                            self.dead_letter(claimed, &error).await?;
                            report.dead_lettered += 1;
                        }
                        None => report.skipped += 1,
                    }
                    continue;
                }
            };

            if !entry.is_due(Instant::now()) {
                debug!(protocol, entry = %entry.id, "Head entry still backing off");
                report.held_back += 1;
                break;
            }

            let allowed = match self.permissions.check(&entry.directory, &key).await {
                Ok(allowed) => allowed,
                Err(e) => {
                    warn!(protocol, directory = %entry.directory, error = %e, "Permission check failed, retrying next tick");
                    report.held_back += 1;
                    break;
                }
            };

            let Some(claimed) = self.queue.claim(entry.id).await? else {
                report.skipped += 1;
                continue;
            };

            if !allowed {
                let error = ExchangeError::permission_denied(&claimed.directory, &key);
                self.dead_letter(claimed, &error).await?;
                report.dead_lettered += 1;
                continue;
            }

            match self.process_claimed(claimed, module, active, &mut report).await? {
                Flow::Continue => {}
                Flow::Stop => {
                    report.held_back += 1;
                    break;
                }
            }
        }
        Ok(report)
    }

    async fn process_claimed(
        &self,
        mut entry: ExportQueueEntry,
        module: &RegisteredModule,
        active: &HashMap<String, Scheme>,
        report: &mut DrainReport,
    ) -> Result<Flow, ExchangeError> {
        let scheme = match active.get(&entry.scheme_name) {
            Some(scheme) if scheme.protocol == entry.protocol => scheme,
            Some(scheme) => {
                let error = ExchangeError::Config(format!(
                    "scheme {} serves protocol {}, not {}",
                    scheme.name, scheme.protocol, entry.protocol
                ));
                self.dead_letter(entry, &error).await?;
                report.dead_lettered += 1;
                return Ok(Flow::Continue);
            }
            None => {
                let error =
                    ExchangeError::Config(format!("export scheme {} is not active", entry.scheme_name));
                self.dead_letter(entry, &error).await?;
                report.dead_lettered += 1;
                return Ok(Flow::Continue);
            }
        };

        if let Err(error) = ManifestValidator::new()
            .validate_scheme(scheme, &module.registration)
            .into_result(&format!("scheme {}", scheme.name))
        {
            self.dead_letter(entry, &error).await?;
            report.dead_lettered += 1;
            return Ok(Flow::Continue);
        }

        let attempt = entry.attempts + 1;
        let ctx = ExchangeContext::new(self.principal.clone(), scheme.name.clone());
        let result = self.export_entry(&ctx, &entry, scheme, module, attempt).await;

        match result {
            Ok(external_id) => {
                info!(
                    entry = %entry.id,
                    protocol = %entry.protocol,
                    external_id = %external_id,
                    attempt,
                    "Entry exported"
                );
                entry.attempts = attempt;
                entry.status = EntryStatus::Done;
                entry.external_id = Some(external_id);
                entry.last_error = None;
                entry.not_before = None;
                self.queue.release(entry).await?;
                report.exported += 1;
                Ok(Flow::Continue)
            }
            Err(e) if e.is_fatal() || matches!(e, ExchangeError::PermissionDenied { .. }) => {
                entry.attempts = attempt;
                self.dead_letter(entry, &e).await?;
                report.dead_lettered += 1;
                Ok(Flow::Continue)
            }
            Err(e) => {
                entry.attempts = attempt;
                entry.last_error = Some(e.to_string());
                if entry.attempts < self.retry.max_attempts {
                    let delay = self.retry.delay_for_attempt(entry.attempts);
                    warn!(
                        entry = %entry.id,
                        protocol = %entry.protocol,
                        attempt,
                        retry_in = ?delay,
                        error = %e,
                        "Export failed, will retry"
                    );
                    entry.status = EntryStatus::Pending;
                    entry.not_before = Some(Instant::now() + delay);
                    self.queue.release(entry).await?;
                    report.retried += 1;
                    Ok(Flow::Stop)
                } else {
                    self.dead_letter(entry, &e).await?;
                    report.dead_lettered += 1;
                    Ok(Flow::Continue)
                }
            }
        }
    }

    async fn export_entry(
        &self,
        ctx: &ExchangeContext,
        entry: &ExportQueueEntry,
        scheme: &Scheme,
        module: &RegisteredModule,
        attempt: u32,
    ) -> Result<String, ExchangeError> {
        let exporter = self.exporter_for(scheme, module).await?;
        let content = self.render(entry, scheme, attempt).await?;

        let message = ExportMessage {
            entry_id: entry.id,
            directory: entry.directory.clone(),
            scheme_name: entry.scheme_name.clone(),
            transaction_id: entry.transaction_id.clone(),
            content,
            attempt,
        };
        bounded(self.timeouts.export(), "export", exporter.export(ctx, &message)).await
    }

    /// Template output if the scheme names a template, else the raw body
    async fn render(
        &self,
        entry: &ExportQueueEntry,
        scheme: &Scheme,
        attempt: u32,
    ) -> Result<String, ExchangeError> {
        let template = match scheme.config.get("template") {
            None => return Ok(entry.payload.body.clone()),
            Some(serde_json::Value::String(t)) => t.clone(),
            Some(_) => {
                return Err(ExchangeError::Template(format!(
                    "template of scheme {} is not a string",
                    scheme.name
                )))
            }
        };

        let context = TemplateContext::for_export(entry, scheme, current_timestamp(), attempt);
        let renderer = Arc::clone(&self.renderer);
        let job = tokio::task::spawn_blocking(move || renderer.render(&template, &context));
        bounded(self.timeouts.render(), "render", async {
            job.await
                .map_err(|e| ExchangeError::Template(format!("renderer panicked: {}", e)))?
        })
        .await
    }

    /// Drop exporters whose scheme is no longer active
    async fn prune_exporters(&self, active: &HashMap<String, Scheme>) {
        let mut exporters = self.exporters.lock().await;
        let before = exporters.len();
        exporters.retain(|name, _| active.contains_key(name));
        let dropped = before - exporters.len();
        if dropped > 0 {
            debug!(dropped, "Exporters for inactive schemes released");
        }
    }

    async fn exporter_for(
        &self,
        scheme: &Scheme,
        module: &RegisteredModule,
    ) -> Result<Arc<dyn Exporter>, ExchangeError> {
        let mut exporters = self.exporters.lock().await;
        if let Some(cached) = exporters.get(&scheme.name) {
            if cached.scheme == *scheme {
                return Ok(Arc::clone(&cached.exporter));
            }
        }

        let exporter = match &module.capability {
            ModuleCapability::Export(factory) => factory.create(scheme)?,
            ModuleCapability::Import(_) => {
                return Err(ExchangeError::Config(format!(
                    "module {} has no export capability",
                    module.registration.id
                )))
            }
        };
        debug!(scheme = %scheme.name, module = %module.registration.id, "Exporter created");
        exporters.insert(
            scheme.name.clone(),
            CachedExporter {
                scheme: scheme.clone(),
                exporter: Arc::clone(&exporter),
            },
        );
        Ok(exporter)
    }

    async fn dead_letter(
        &self,
        mut entry: ExportQueueEntry,
        error: &ExchangeError,
    ) -> Result<(), ExchangeError> {
        error!(
            entry = %entry.id,
            protocol = %entry.protocol,
            directory = %entry.directory,
            attempts = entry.attempts,
            error = %error,
            "Export entry dead-lettered"
        );
        entry.status = EntryStatus::DeadLetter;
        entry.last_error = Some(error.to_string());
        entry.not_before = None;
        self.queue.release(entry).await
    }

    /// Operator action: give a dead letter a fresh attempt budget
    pub async fn requeue(&self, id: Uuid) -> Result<ExportQueueEntry, ExchangeError> {
        self.queue.requeue(id).await
    }

    /// Drain every `period` until shutdown
    ///
    /// A drain in progress when shutdown is requested stops after its
    /// current entry.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period = ?self.period, "Export queue processor started");

        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick(&shutdown).await {
                        warn!(error = %e, "Export tick failed");
                    }
                }
            }
        }
        info!("Export queue processor stopped");
    }
}
