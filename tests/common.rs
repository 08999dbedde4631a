//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use iox_engine::model::{ExchangeContext, MessageHeader, MessagePayload, ModuleRegistration, ModuleType, Scheme};
use iox_engine::module::traits::{
    ExchangeError, ExportMessage, Exporter, ImportMessage, ImportSource, MessageDelivery,
    ModuleCapability, PermissionResolver,
};
use iox_engine::PermissionKey;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Import side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    header: MessageHeader,
    payload: MessagePayload,
}

#[derive(Default)]
struct MailboxState {
    unread: Vec<StoredMessage>,
    opens: usize,
    closes: usize,
    running: usize,
    max_running: usize,
    fail_open: bool,
    fail_fetch: bool,
}

/// Shared unread set behind every `MemorySource` created for it
#[derive(Default)]
pub struct Mailbox {
    state: Mutex<MailboxState>,
    fetch_delay: Mutex<Duration>,
}

impl Mailbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, id: &str, directory: &str, body: &str) {
        self.state.lock().unwrap().unread.push(StoredMessage {
            id: id.to_string(),
            header: MessageHeader::new(directory).with_field("subject", format!("subject {}", id)),
            payload: MessagePayload::new(body),
        });
    }

    pub fn unread_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().unread.iter().map(|m| m.id.clone()).collect()
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    /// Highest number of cycles that were between open and close at once
    pub fn max_concurrent_cycles(&self) -> usize {
        self.state.lock().unwrap().max_running
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    pub fn fail_open(&self, fail: bool) {
        self.state.lock().unwrap().fail_open = fail;
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.state.lock().unwrap().fail_fetch = fail;
    }

    fn consume(&self, id: &str) {
        self.state.lock().unwrap().unread.retain(|m| m.id != id);
    }
}

pub struct MemoryMessage {
    message: StoredMessage,
    mailbox: Arc<Mailbox>,
}

#[async_trait]
impl ImportMessage for MemoryMessage {
    fn id(&self) -> &str {
        &self.message.id
    }

    fn header(&self) -> &MessageHeader {
        &self.message.header
    }

    async fn payload(&self) -> Result<MessagePayload, ExchangeError> {
        Ok(self.message.payload.clone())
    }

    async fn mark_consumed(&self) -> Result<(), ExchangeError> {
        self.mailbox.consume(&self.message.id);
        Ok(())
    }
}

pub struct MemorySource {
    mailbox: Arc<Mailbox>,
    errors: Arc<Mutex<Vec<(String, ExchangeError)>>>,
}

#[async_trait]
impl ImportSource for MemorySource {
    async fn open(&mut self, _ctx: &ExchangeContext) -> Result<(), ExchangeError> {
        let mut state = self.mailbox.state.lock().unwrap();
        state.opens += 1;
        state.running += 1;
        state.max_running = state.max_running.max(state.running);
        if state.fail_open {
            return Err(ExchangeError::Import("connection refused".to_string()));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ExchangeError> {
        let mut state = self.mailbox.state.lock().unwrap();
        state.closes += 1;
        state.running = state.running.saturating_sub(1);
        Ok(())
    }

    async fn get_unread_messages(&mut self) -> Result<Vec<Box<dyn ImportMessage>>, ExchangeError> {
        let delay = *self.mailbox.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let state = self.mailbox.state.lock().unwrap();
        if state.fail_fetch {
            return Err(ExchangeError::Import("mailbox unavailable".to_string()));
        }
        Ok(state
            .unread
            .iter()
            .cloned()
            .map(|message| {
                Box::new(MemoryMessage {
                    message,
                    mailbox: Arc::clone(&self.mailbox),
                }) as Box<dyn ImportMessage>
            })
            .collect())
    }

    async fn on_error(&mut self, message: &dyn ImportMessage, error: &ExchangeError) {
        self.errors
            .lock()
            .unwrap()
            .push((message.id().to_string(), error.clone()));
    }
}

/// Import capability over a mailbox; errors reported through `on_error`
/// land in the returned log
pub fn import_capability(mailbox: &Arc<Mailbox>) -> (ModuleCapability, Arc<Mutex<Vec<(String, ExchangeError)>>>) {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let mailbox = Arc::clone(mailbox);
    let log = Arc::clone(&errors);
    let factory = move |_scheme: &Scheme| -> Result<Box<dyn ImportSource>, ExchangeError> {
        Ok(Box::new(MemorySource {
            mailbox: Arc::clone(&mailbox),
            errors: Arc::clone(&log),
        }))
    };
    (ModuleCapability::Import(Arc::new(factory)), errors)
}

pub fn mail_registration() -> ModuleRegistration {
    ModuleRegistration::new("import:mail", ModuleType::Import, "mail", ["host", "login", "password"])
}

pub fn mail_scheme(name: &str) -> Scheme {
    Scheme::new(name, name, ModuleType::Import, "mail")
        .with_config("host", "imap.example.org")
        .with_config("login", "news")
        .with_config("password", "secret")
}

/// Records delivered bodies; bodies listed in `fail_bodies` fail
#[derive(Default)]
pub struct RecordingDelivery {
    delivered: Mutex<Vec<(String, String, String)>>,
    fail_bodies: Mutex<HashSet<String>>,
}

impl RecordingDelivery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_body(&self, body: &str) {
        self.fail_bodies.lock().unwrap().insert(body.to_string());
    }

    /// `(scheme, directory, body)` in delivery order
    pub fn delivered(&self) -> Vec<(String, String, String)> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn delivered_bodies(&self) -> Vec<String> {
        self.delivered().into_iter().map(|(_, _, body)| body).collect()
    }
}

#[async_trait]
impl MessageDelivery for RecordingDelivery {
    async fn deliver(
        &self,
        _ctx: &ExchangeContext,
        scheme: &Scheme,
        header: &MessageHeader,
        payload: MessagePayload,
    ) -> Result<String, ExchangeError> {
        if self.fail_bodies.lock().unwrap().contains(&payload.body) {
            return Err(ExchangeError::Store(format!("cannot store {}", payload.body)));
        }
        let mut delivered = self.delivered.lock().unwrap();
        delivered.push((scheme.name.clone(), header.directory.clone(), payload.body));
        Ok(format!("doc-{}", delivered.len()))
    }
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

/// Answers from a fixed table, counting calls
pub struct StaticResolver {
    default: bool,
    rules: Mutex<HashMap<(String, String), bool>>,
    calls: AtomicUsize,
    delay: Duration,
    fail: Mutex<bool>,
}

impl StaticResolver {
    pub fn allow_all() -> Arc<Self> {
        Arc::new(Self::with_default(true, Duration::ZERO))
    }

    pub fn deny_all() -> Arc<Self> {
        Arc::new(Self::with_default(false, Duration::ZERO))
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self::with_default(true, delay))
    }

    fn with_default(default: bool, delay: Duration) -> Self {
        Self {
            default,
            rules: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            delay,
            fail: Mutex::new(false),
        }
    }

    pub fn set(&self, directory: &str, key: &PermissionKey, allowed: bool) {
        self.rules
            .lock()
            .unwrap()
            .insert((directory.to_string(), key.to_string()), allowed);
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionResolver for StaticResolver {
    async fn resolve(&self, directory: &str, key: &PermissionKey) -> Result<bool, ExchangeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if *self.fail.lock().unwrap() {
            return Err(ExchangeError::Store("permission service unavailable".to_string()));
        }
        Ok(self
            .rules
            .lock()
            .unwrap()
            .get(&(directory.to_string(), key.to_string()))
            .copied()
            .unwrap_or(self.default))
    }
}

// ---------------------------------------------------------------------------
// Export side
// ---------------------------------------------------------------------------

/// Records exported content; fails the first `failures` calls (or all)
#[derive(Default)]
pub struct RecordingExporter {
    exported: Mutex<Vec<ExportMessage>>,
    calls: AtomicUsize,
    failures: Mutex<Option<usize>>,
}

impl RecordingExporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn always_failing() -> Arc<Self> {
        let exporter = Self::default();
        *exporter.failures.lock().unwrap() = Some(usize::MAX);
        Arc::new(exporter)
    }

    pub fn failing_first(n: usize) -> Arc<Self> {
        let exporter = Self::default();
        *exporter.failures.lock().unwrap() = Some(n);
        Arc::new(exporter)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Transaction ids of successful exports, in order
    pub fn exported_ids(&self) -> Vec<String> {
        self.exported
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.transaction_id.clone())
            .collect()
    }

    pub fn exported(&self) -> Vec<ExportMessage> {
        self.exported.lock().unwrap().clone()
    }
}

#[async_trait]
impl Exporter for RecordingExporter {
    async fn export(&self, _ctx: &ExchangeContext, message: &ExportMessage) -> Result<String, ExchangeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failures) = *self.failures.lock().unwrap() {
            if call < failures {
                return Err(ExchangeError::Export(format!("remote rejected {}", message.transaction_id)));
            }
        }
        self.exported.lock().unwrap().push(message.clone());
        Ok(format!("ext-{}", message.transaction_id))
    }
}

pub fn export_capability(exporter: &Arc<RecordingExporter>) -> ModuleCapability {
    let exporter = Arc::clone(exporter);
    let factory = move |_scheme: &Scheme| -> Result<Arc<dyn Exporter>, ExchangeError> {
        Ok(Arc::clone(&exporter) as Arc<dyn Exporter>)
    };
    ModuleCapability::Export(Arc::new(factory))
}

pub fn rss_registration() -> ModuleRegistration {
    ModuleRegistration::new("export:rss", ModuleType::Export, "rss", ["feed_url"])
}

pub fn rss_scheme(name: &str) -> Scheme {
    Scheme::new(name, name, ModuleType::Export, "rss").with_config("feed_url", "https://example.org/feed")
}
