//! Import scheduler
//!
//! Owns one import source per active scheme and drives its poll cycle:
//! `IDLE -> OPENING -> POLLING -> DELIVERING -> IDLE`, with `ERROR -> IDLE`
//! when opening, fetching or closing fails.
//!
//! Each source sits behind its own async mutex. A tick takes it with
//! `try_lock_owned`, so a tick that arrives while the previous cycle of the
//! same scheme is still running is skipped instead of queued. Different
//! schemes run concurrently, bounded by a semaphore of `thread_pool_size`
//! permits. A scheme keeps the same mutex across deactivation and
//! re-activation, so a new source is only swapped in once the cycle running
//! on the old one has finished.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify, OwnedMutexGuard, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use super::status::{CycleReport, CycleState, SchemeStatus, TickOutcome};
use crate::config::{ExchangeConfig, TimeoutConfig};
use crate::model::{ExchangeContext, ModuleType, Scheme};
use crate::module::registry::ModuleRegistry;
use crate::module::traits::{
    ExchangeError, ImportMessage, ImportSource, MessageDelivery, ModuleCapability, SchemeStore,
};
use crate::module::validation::ManifestValidator;
use crate::permission::{PermissionCache, PermissionKey};
use crate::utils::{bounded, current_timestamp, is_shutdown, retry_if_retryable, RetryConfig};

/// Scheme config key overriding the global import period (seconds)
pub const POLL_INTERVAL_KEY: &str = "poll_interval";

/// Scheduler tuning
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub thread_pool_size: usize,
    pub import_period: Duration,
    /// 0 disables the stuck-message alarm
    pub stuck_message_threshold: u32,
    pub timeouts: TimeoutConfig,
    pub principal: String,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&ExchangeConfig::default())
    }
}

impl SchedulerSettings {
    pub fn from_config(config: &ExchangeConfig) -> Self {
        Self {
            thread_pool_size: config.thread_pool_size,
            import_period: config.import_period(),
            stuck_message_threshold: config.stuck_message_threshold,
            timeouts: config.timeouts.clone(),
            principal: config.principal.clone(),
        }
    }
}

/// Source plus the per-message denial counters, guarded together
struct SourceSlot {
    source: Box<dyn ImportSource>,
    denials: HashMap<String, u32>,
}

struct ActiveScheme {
    scheme: Scheme,
    period: Duration,
    slot: Arc<Mutex<SourceSlot>>,
    next_due: Mutex<Instant>,
}

/// Polls every active import scheme
pub struct ImportScheduler {
    registry: Arc<ModuleRegistry>,
    schemes: Arc<dyn SchemeStore>,
    permissions: Arc<PermissionCache>,
    delivery: Arc<dyn MessageDelivery>,
    settings: SchedulerSettings,
    pool: Arc<Semaphore>,
    active: RwLock<BTreeMap<String, Arc<ActiveScheme>>>,
    /// One slot per scheme name, outliving activations
    slots: Mutex<HashMap<String, Arc<Mutex<SourceSlot>>>>,
    statuses: RwLock<BTreeMap<String, SchemeStatus>>,
    changed: Notify,
    shutdown: watch::Receiver<bool>,
    /// Keeps the default shutdown channel open until `with_shutdown`
    _idle_shutdown: watch::Sender<bool>,
}

impl ImportScheduler {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        schemes: Arc<dyn SchemeStore>,
        permissions: Arc<PermissionCache>,
        delivery: Arc<dyn MessageDelivery>,
        settings: SchedulerSettings,
    ) -> Self {
        let (idle_shutdown, shutdown) = watch::channel(false);
        Self {
            registry,
            schemes,
            permissions,
            delivery,
            pool: Arc::new(Semaphore::new(settings.thread_pool_size.max(1))),
            settings,
            active: RwLock::new(BTreeMap::new()),
            slots: Mutex::new(HashMap::new()),
            statuses: RwLock::new(BTreeMap::new()),
            changed: Notify::new(),
            shutdown,
            _idle_shutdown: idle_shutdown,
        }
    }

    /// Observe `shutdown` between messages
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Activate one scheme
    ///
    /// A scheme whose module cannot be resolved, whose capability is not an
    /// import source, or whose config misses a required key is marked
    /// disabled and a `Config` error is returned. Nothing is polled.
    ///
    /// Re-activating a scheme whose cycle is still running waits for that
    /// cycle to finish before the new source takes over.
    pub async fn activate(&self, scheme: Scheme) -> Result<(), ExchangeError> {
        match self.prepare(&scheme).await {
            Ok((module_id, source)) => {
                self.registry.bind_scheme(&module_id, &scheme.name).await?;
                let period = scheme
                    .config_u64(POLL_INTERVAL_KEY)
                    .filter(|s| *s > 0)
                    .map(Duration::from_secs)
                    .unwrap_or(self.settings.import_period);

                let slot = self.install_source(&scheme.name, source).await;
                let entry = Arc::new(ActiveScheme {
                    scheme: scheme.clone(),
                    period,
                    slot,
                    next_due: Mutex::new(Instant::now()),
                });
                self.active.write().await.insert(scheme.name.clone(), entry);

                let mut status = SchemeStatus::new(&scheme.name, &scheme.protocol);
                status.module_id = Some(module_id.clone());
                self.statuses.write().await.insert(scheme.name.clone(), status);

                info!(scheme = %scheme.name, module = %module_id, period = ?period, "Import scheme activated");
                self.changed.notify_one();
                Ok(())
            }
            Err(e) => {
                self.disable(&scheme, &e).await;
                Err(e)
            }
        }
    }

    async fn install_source(&self, name: &str, source: Box<dyn ImportSource>) -> Arc<Mutex<SourceSlot>> {
        let mut slots = self.slots.lock().await;
        match slots.get(name) {
            Some(existing) => {
                let existing = Arc::clone(existing);
                drop(slots);
                let mut guard = existing.lock().await;
                guard.source = source;
                drop(guard);
                debug!(scheme = name, "Import source replaced");
                existing
            }
            None => {
                let slot = Arc::new(Mutex::new(SourceSlot {
                    source,
                    denials: HashMap::new(),
                }));
                slots.insert(name.to_string(), Arc::clone(&slot));
                slot
            }
        }
    }

    async fn prepare(&self, scheme: &Scheme) -> Result<(String, Box<dyn ImportSource>), ExchangeError> {
        if scheme.module_type != ModuleType::Import {
            return Err(ExchangeError::Config(format!(
                "scheme {} is an {} scheme",
                scheme.name, scheme.module_type
            )));
        }
        let module = self
            .registry
            .find_by_protocol(ModuleType::Import, &scheme.protocol)
            .await
            .map_err(|_| {
                ExchangeError::Config(format!(
                    "no import module registered for protocol {}",
                    scheme.protocol
                ))
            })?;

        ManifestValidator::new()
            .validate_scheme(scheme, &module.registration)
            .into_result(&format!("scheme {}", scheme.name))?;

        let source = match &module.capability {
            ModuleCapability::Import(factory) => factory.create(scheme)?,
            ModuleCapability::Export(_) => {
                return Err(ExchangeError::Config(format!(
                    "module {} has no import capability",
                    module.registration.id
                )))
            }
        };
        Ok((module.registration.id.clone(), source))
    }

    async fn disable(&self, scheme: &Scheme, error: &ExchangeError) {
        error!(scheme = %scheme.name, protocol = %scheme.protocol, error = %error, "Import scheme disabled");
        self.active.write().await.remove(&scheme.name);
        let mut statuses = self.statuses.write().await;
        let status = statuses
            .entry(scheme.name.clone())
            .or_insert_with(|| SchemeStatus::new(&scheme.name, &scheme.protocol));
        status.disabled = Some(error.to_string());
        status.last_error = Some(error.to_string());
        status.state = CycleState::Idle;
    }

    /// Activate every enabled import scheme in the store
    ///
    /// Returns the schemes that failed activation with their errors.
    pub async fn activate_all(&self) -> Result<Vec<(String, ExchangeError)>, ExchangeError> {
        let store = &self.schemes;
        let schemes = retry_if_retryable(&RetryConfig::store(), move || {
            store.load_active_by_type(ModuleType::Import)
        })
        .await?;

        let mut failures = Vec::new();
        for scheme in schemes {
            let name = scheme.name.clone();
            if let Err(e) = self.activate(scheme).await {
                failures.push((name, e));
            }
        }
        Ok(failures)
    }

    /// Stop polling a scheme; a running cycle finishes normally
    pub async fn deactivate(&self, name: &str) -> bool {
        let removed = self.active.write().await.remove(name).is_some();
        if removed {
            self.statuses.write().await.remove(name);
            info!(scheme = name, "Import scheme deactivated");
            self.changed.notify_one();
        }
        removed
    }

    pub async fn active_schemes(&self) -> Vec<String> {
        self.active.read().await.keys().cloned().collect()
    }

    pub async fn status(&self, name: &str) -> Option<SchemeStatus> {
        self.statuses.read().await.get(name).cloned()
    }

    /// Status of every known scheme, disabled ones included
    pub async fn statuses(&self) -> Vec<SchemeStatus> {
        self.statuses.read().await.values().cloned().collect()
    }

    /// Run one poll cycle for `name` now
    pub async fn tick(&self, name: &str) -> Result<TickOutcome, ExchangeError> {
        let active = self.active.read().await.get(name).cloned();
        let active = match active {
            Some(active) => active,
            None => {
                return match self.statuses.read().await.get(name) {
                    Some(status) if status.is_disabled() => Ok(TickOutcome::Disabled),
                    _ => Err(ExchangeError::NotFound(format!("import scheme {}", name))),
                }
            }
        };

        let slot = match Arc::clone(&active.slot).try_lock_owned() {
            Ok(slot) => slot,
            Err(_) => {
                warn!(scheme = name, "Previous cycle still running, tick skipped");
                return Ok(TickOutcome::Skipped);
            }
        };

        let _permit = Arc::clone(&self.pool)
            .acquire_owned()
            .await
            .map_err(|_| ExchangeError::Config("import pool closed".to_string()))?;

        let report = self.run_cycle(&active.scheme, slot).await;
        self.record(&report).await;
        Ok(TickOutcome::Completed(report))
    }

    /// Tick every active scheme concurrently
    pub async fn tick_all(self: &Arc<Self>) -> Vec<(String, Result<TickOutcome, ExchangeError>)> {
        let names = self.active_schemes().await;
        let mut tasks = JoinSet::new();
        for name in names {
            let scheduler = Arc::clone(self);
            tasks.spawn(async move {
                let outcome = scheduler.tick(&name).await;
                (name, outcome)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "Import cycle task failed"),
            }
        }
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        outcomes
    }

    async fn set_state(&self, scheme: &str, state: CycleState) {
        if let Some(status) = self.statuses.write().await.get_mut(scheme) {
            status.state = state;
        }
    }

    async fn run_cycle(&self, scheme: &Scheme, mut slot: OwnedMutexGuard<SourceSlot>) -> CycleReport {
        let ctx = ExchangeContext::new(self.settings.principal.clone(), scheme.name.clone());
        let mut report = CycleReport::new(&scheme.name, ctx.cycle_id);
        let timeouts = &self.settings.timeouts;

        if let Some(status) = self.statuses.write().await.get_mut(&scheme.name) {
            status.last_run = Some(current_timestamp());
        }
        debug!(scheme = %scheme.name, cycle = %ctx.cycle_id, "Import cycle started");

        self.set_state(&scheme.name, CycleState::Opening).await;
        let opened = bounded(timeouts.open(), "open", slot.source.open(&ctx)).await;

        let outcome = match opened {
            Err(e) => Err(e),
            Ok(()) => {
                self.set_state(&scheme.name, CycleState::Polling).await;
                match bounded(timeouts.fetch(), "fetch", slot.source.get_unread_messages()).await {
                    Err(e) => Err(e),
                    Ok(messages) => {
                        self.set_state(&scheme.name, CycleState::Delivering).await;
                        self.deliver_all(&ctx, scheme, &mut slot, messages, &mut report)
                            .await;
                        Ok(())
                    }
                }
            }
        };

        let closed = bounded(timeouts.close(), "close", slot.source.close()).await;
        let failure = match (outcome, closed) {
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!(scheme = %scheme.name, error = %close_err, "Close after failed cycle also failed");
                }
                Some(e)
            }
            (Ok(()), Err(e)) => Some(e),
            (Ok(()), Ok(())) => None,
        };

        if let Some(e) = failure {
            warn!(scheme = %scheme.name, cycle = %ctx.cycle_id, error = %e, "Import cycle failed");
            report.final_state = CycleState::Error;
            report.error = Some(e.to_string());
        }
        report.stuck = self.stuck_ids(&slot.denials);
        debug!(
            scheme = %scheme.name,
            delivered = report.delivered,
            denied = report.denied,
            failed = report.failed,
            "Import cycle finished"
        );
        report
    }

    async fn deliver_all(
        &self,
        ctx: &ExchangeContext,
        scheme: &Scheme,
        slot: &mut SourceSlot,
        messages: Vec<Box<dyn ImportMessage>>,
        report: &mut CycleReport,
    ) {
        let key = PermissionKey::import(&scheme.protocol);
        let threshold = self.settings.stuck_message_threshold;
        let seen: Vec<String> = messages.iter().map(|m| m.id().to_string()).collect();

        for message in &messages {
            if is_shutdown(&self.shutdown) {
                info!(scheme = %scheme.name, "Shutdown requested, stopping after current message");
                report.interrupted = true;
                break;
            }

            let directory = message.header().directory.clone();
            let allowed = match self.permissions.check(&directory, &key).await {
                Ok(allowed) => allowed,
                Err(e) => {
                    self.report_error(slot, message.as_ref(), &e).await;
                    report.failed += 1;
                    continue;
                }
            };

            if !allowed {
                let denied = ExchangeError::permission_denied(&directory, &key);
                self.report_error(slot, message.as_ref(), &denied).await;
                report.denied += 1;

                let count = slot.denials.entry(message.id().to_string()).or_insert(0);
                *count += 1;
                if threshold > 0 && *count == threshold {
                    error!(
                        scheme = %scheme.name,
                        msg_id = message.id(),
                        directory = %directory,
                        denials = *count,
                        "Message stuck: import permission denied repeatedly"
                    );
                    report.newly_stuck.push(message.id().to_string());
                }
                continue;
            }

            match self.deliver_one(ctx, scheme, message.as_ref()).await {
                Ok(delivered_id) => {
                    slot.denials.remove(message.id());
                    let acked = bounded(
                        self.settings.timeouts.deliver(),
                        "acknowledge",
                        slot.source.on_success(message.as_ref(), &delivered_id),
                    )
                    .await;
                    match acked {
                        Ok(()) => report.delivered += 1,
                        Err(e) => {
                            warn!(
                                scheme = %scheme.name,
                                msg_id = message.id(),
                                delivered_id = %delivered_id,
                                error = %e,
                                "Delivered message could not be marked consumed"
                            );
                            report.failed += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(scheme = %scheme.name, msg_id = message.id(), error = %e, "Delivery failed");
                    self.report_error(slot, message.as_ref(), &e).await;
                    report.failed += 1;
                }
            }
        }

        // Messages that left the source no longer count as stuck
        slot.denials.retain(|id, _| seen.contains(id));
    }

    async fn deliver_one(
        &self,
        ctx: &ExchangeContext,
        scheme: &Scheme,
        message: &dyn ImportMessage,
    ) -> Result<String, ExchangeError> {
        let timeouts = &self.settings.timeouts;
        let payload = bounded(timeouts.fetch(), "payload", message.payload()).await?;
        bounded(
            timeouts.deliver(),
            "deliver",
            self.delivery.deliver(ctx, scheme, message.header(), payload),
        )
        .await
    }

    async fn report_error(&self, slot: &mut SourceSlot, message: &dyn ImportMessage, error: &ExchangeError) {
        let limit = self.settings.timeouts.deliver();
        if tokio::time::timeout(limit, slot.source.on_error(message, error))
            .await
            .is_err()
        {
            warn!(msg_id = message.id(), "on_error callback timed out");
        }
    }

    async fn record(&self, report: &CycleReport) {
        let mut statuses = self.statuses.write().await;
        let Some(status) = statuses.get_mut(&report.scheme) else {
            return;
        };
        status.state = CycleState::Idle;
        status.cycles += 1;
        status.delivered_total += report.delivered as u64;
        status.stuck_messages = report.stuck.clone();
        match &report.error {
            Some(e) => {
                status.consecutive_failures += 1;
                status.last_error = Some(e.clone());
            }
            None => status.consecutive_failures = 0,
        }
    }

    fn stuck_ids(&self, denials: &HashMap<String, u32>) -> Vec<String> {
        let threshold = self.settings.stuck_message_threshold;
        if threshold == 0 {
            return Vec::new();
        }
        let mut ids: Vec<String> = denials
            .iter()
            .filter(|(_, count)| **count >= threshold)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Poll every scheme on its period until shutdown, then wait for the
    /// cycles still running
    pub async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown.clone();
        let mut cycles: JoinSet<()> = JoinSet::new();
        info!(
            pool = self.settings.thread_pool_size,
            period = ?self.settings.import_period,
            "Import scheduler started"
        );

        loop {
            if is_shutdown(&shutdown) {
                break;
            }

            let now = Instant::now();
            let mut next_wake = now + self.settings.import_period;
            let due: Vec<String> = {
                let active = self.active.read().await;
                let mut due = Vec::new();
                for (name, scheme) in active.iter() {
                    let mut next_due = scheme.next_due.lock().await;
                    if *next_due <= now {
                        due.push(name.clone());
                        *next_due = now + scheme.period;
                    }
                    next_wake = next_wake.min(*next_due);
                }
                due
            };

            for name in due {
                let scheduler = Arc::clone(&self);
                cycles.spawn(async move {
                    match scheduler.tick(&name).await {
                        Ok(TickOutcome::Completed(report)) if !report.newly_stuck.is_empty() => {
                            warn!(scheme = %name, stuck = ?report.newly_stuck, "Messages reported stuck");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(scheme = %name, error = %e, "Import tick failed"),
                    }
                });
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        warn!("Shutdown channel closed, stopping import scheduler");
                        break;
                    }
                }
                _ = self.changed.notified() => {}
                _ = sleep_until(next_wake) => {}
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Import cycle task failed");
                    }
                }
            }
        }

        info!(in_flight = cycles.len(), "Import scheduler stopping, waiting for running cycles");
        while let Some(joined) = cycles.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Import cycle task failed");
            }
        }
        info!("Import scheduler stopped");
    }
}
