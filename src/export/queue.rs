//! Export queue storage
//!
//! Entries move `PENDING -> IN_FLIGHT -> {DONE | PENDING | DEAD_LETTER}`.
//! Only `claim` may move an entry out of `PENDING`, and it does so atomically,
//! so two processors can never export the same entry.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::model::{EntryStatus, ExportQueueEntry, NewExportEntry};
use crate::module::traits::ExchangeError;
use crate::utils::current_timestamp;

/// Default number of exported entries kept for traceability
pub const DEFAULT_ARCHIVE_LIMIT: usize = 1000;

/// Persistence of export queue entries
#[async_trait]
pub trait ExportQueueStore: Send + Sync {
    /// Add a new `PENDING` entry at the end of its protocol's queue
    async fn enqueue(&self, entry: NewExportEntry) -> Result<Uuid, ExchangeError>;

    /// Protocols with at least one `PENDING` entry, sorted
    async fn pending_protocols(&self) -> Result<Vec<String>, ExchangeError>;

    /// `PENDING` entries of a protocol in enqueue order
    async fn pending_for(&self, protocol: &str) -> Result<Vec<ExportQueueEntry>, ExchangeError>;

    /// Compare-and-swap `PENDING -> IN_FLIGHT`
    ///
    /// Returns `None` if the entry is gone or no longer pending.
    async fn claim(&self, id: Uuid) -> Result<Option<ExportQueueEntry>, ExchangeError>;

    /// Write back a claimed entry in its new state
    ///
    /// `DONE` entries move to the archive, `DEAD_LETTER` entries to the
    /// dead-letter list, `PENDING` entries stay queued.
    async fn release(&self, entry: ExportQueueEntry) -> Result<(), ExchangeError>;

    /// Dead-lettered entries in enqueue order
    async fn dead_letters(&self) -> Result<Vec<ExportQueueEntry>, ExchangeError>;

    /// Put a dead letter back at the end of its protocol's queue with a
    /// fresh attempt budget
    async fn requeue(&self, id: Uuid) -> Result<ExportQueueEntry, ExchangeError>;

    /// Most recently exported entries, oldest first
    async fn archived(&self) -> Result<Vec<ExportQueueEntry>, ExchangeError>;

    /// Look up an entry in any state
    async fn get(&self, id: Uuid) -> Result<Option<ExportQueueEntry>, ExchangeError>;
}

/// Entry counts by state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub dead_letters: usize,
    pub archived: usize,
}

struct QueueState {
    next_sequence: u64,
    /// `PENDING` and `IN_FLIGHT` entries
    active: HashMap<Uuid, ExportQueueEntry>,
    dead: HashMap<Uuid, ExportQueueEntry>,
    archive: VecDeque<ExportQueueEntry>,
}

/// In-memory export queue with a bounded archive
pub struct InMemoryExportQueue {
    state: Mutex<QueueState>,
    archive_limit: usize,
}

impl InMemoryExportQueue {
    pub fn new() -> Self {
        Self::with_archive_limit(DEFAULT_ARCHIVE_LIMIT)
    }

    pub fn with_archive_limit(archive_limit: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                next_sequence: 1,
                active: HashMap::new(),
                dead: HashMap::new(),
                archive: VecDeque::new(),
            }),
            archive_limit,
        }
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        let in_flight = state
            .active
            .values()
            .filter(|e| e.status == EntryStatus::InFlight)
            .count();
        QueueStats {
            pending: state.active.len() - in_flight,
            in_flight,
            dead_letters: state.dead.len(),
            archived: state.archive.len(),
        }
    }
}

impl Default for InMemoryExportQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_by_sequence(mut entries: Vec<ExportQueueEntry>) -> Vec<ExportQueueEntry> {
    entries.sort_by_key(|e| e.sequence);
    entries
}

#[async_trait]
impl ExportQueueStore for InMemoryExportQueue {
    async fn enqueue(&self, entry: NewExportEntry) -> Result<Uuid, ExchangeError> {
        let mut state = self.state.lock().await;
        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let entry = ExportQueueEntry::from_new(entry, sequence, current_timestamp());
        let id = entry.id;
        debug!(entry = %id, protocol = %entry.protocol, sequence, "Export entry queued");
        state.active.insert(id, entry);
        Ok(id)
    }

    async fn pending_protocols(&self) -> Result<Vec<String>, ExchangeError> {
        let state = self.state.lock().await;
        let protocols: BTreeSet<&str> = state
            .active
            .values()
            .filter(|e| e.status == EntryStatus::Pending)
            .map(|e| e.protocol.as_str())
            .collect();
        Ok(protocols.into_iter().map(str::to_string).collect())
    }

    async fn pending_for(&self, protocol: &str) -> Result<Vec<ExportQueueEntry>, ExchangeError> {
        let state = self.state.lock().await;
        Ok(sorted_by_sequence(
            state
                .active
                .values()
                .filter(|e| e.status == EntryStatus::Pending && e.protocol == protocol)
                .cloned()
                .collect(),
        ))
    }

    async fn claim(&self, id: Uuid) -> Result<Option<ExportQueueEntry>, ExchangeError> {
        let mut state = self.state.lock().await;
        match state.active.get_mut(&id) {
            Some(entry) if entry.status == EntryStatus::Pending => {
                entry.status = EntryStatus::InFlight;
                Ok(Some(entry.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn release(&self, entry: ExportQueueEntry) -> Result<(), ExchangeError> {
        let mut state = self.state.lock().await;
        match state.active.get(&entry.id) {
            Some(current) if current.status == EntryStatus::InFlight => {}
            Some(_) => {
                return Err(ExchangeError::Store(format!(
                    "export entry {} was released without being claimed",
                    entry.id
                )))
            }
            None => return Err(ExchangeError::NotFound(format!("export entry {}", entry.id))),
        }

        match entry.status {
            EntryStatus::Done => {
                state.active.remove(&entry.id);
                state.archive.push_back(entry);
                while state.archive.len() > self.archive_limit {
                    state.archive.pop_front();
                }
            }
            EntryStatus::DeadLetter => {
                state.active.remove(&entry.id);
                state.dead.insert(entry.id, entry);
            }
            EntryStatus::Pending | EntryStatus::InFlight => {
                state.active.insert(entry.id, entry);
            }
        }
        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<ExportQueueEntry>, ExchangeError> {
        let state = self.state.lock().await;
        Ok(sorted_by_sequence(state.dead.values().cloned().collect()))
    }

    async fn requeue(&self, id: Uuid) -> Result<ExportQueueEntry, ExchangeError> {
        let mut state = self.state.lock().await;
        let mut entry = state
            .dead
            .remove(&id)
            .ok_or_else(|| ExchangeError::NotFound(format!("dead letter {}", id)))?;

        entry.sequence = state.next_sequence;
        state.next_sequence += 1;
        entry.status = EntryStatus::Pending;
        entry.attempts = 0;
        entry.not_before = None;

        info!(entry = %id, protocol = %entry.protocol, "Dead letter requeued");
        state.active.insert(id, entry.clone());
        Ok(entry)
    }

    async fn archived(&self) -> Result<Vec<ExportQueueEntry>, ExchangeError> {
        let state = self.state.lock().await;
        Ok(state.archive.iter().cloned().collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExportQueueEntry>, ExchangeError> {
        let state = self.state.lock().await;
        Ok(state
            .active
            .get(&id)
            .or_else(|| state.dead.get(&id))
            .or_else(|| state.archive.iter().find(|e| e.id == id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessagePayload;

    fn new_entry(protocol: &str, body: &str) -> NewExportEntry {
        NewExportEntry {
            directory: "sports".to_string(),
            protocol: protocol.to_string(),
            scheme_name: format!("{}-out", protocol),
            transaction_id: body.to_string(),
            payload: MessagePayload::new(body),
        }
    }

    #[tokio::test]
    async fn test_pending_for_keeps_enqueue_order() {
        let queue = InMemoryExportQueue::new();
        let a = queue.enqueue(new_entry("rss", "a")).await.unwrap();
        queue.enqueue(new_entry("mail", "x")).await.unwrap();
        let b = queue.enqueue(new_entry("rss", "b")).await.unwrap();

        let ids: Vec<Uuid> = queue.pending_for("rss").await.unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![a, b]);
        assert_eq!(queue.pending_protocols().await.unwrap(), vec!["mail", "rss"]);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let queue = InMemoryExportQueue::new();
        let id = queue.enqueue(new_entry("rss", "a")).await.unwrap();

        let claimed = queue.claim(id).await.unwrap().unwrap();
        assert_eq!(claimed.status, EntryStatus::InFlight);
        assert!(queue.claim(id).await.unwrap().is_none());
        assert!(queue.pending_for("rss").await.unwrap().is_empty());
        assert!(queue.claim(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_release_requires_claim() {
        let queue = InMemoryExportQueue::new();
        let id = queue.enqueue(new_entry("rss", "a")).await.unwrap();
        let mut entry = queue.get(id).await.unwrap().unwrap();
        entry.status = EntryStatus::Done;

        assert!(matches!(queue.release(entry).await, Err(ExchangeError::Store(_))));
    }

    #[tokio::test]
    async fn test_archive_is_bounded() {
        let queue = InMemoryExportQueue::with_archive_limit(2);
        for body in ["a", "b", "c"] {
            let id = queue.enqueue(new_entry("rss", body)).await.unwrap();
            let mut entry = queue.claim(id).await.unwrap().unwrap();
            entry.status = EntryStatus::Done;
            entry.external_id = Some(format!("ext-{}", body));
            queue.release(entry).await.unwrap();
        }

        let archived: Vec<String> = queue
            .archived()
            .await
            .unwrap()
            .into_iter()
            .filter_map(|e| e.external_id)
            .collect();
        assert_eq!(archived, vec!["ext-b", "ext-c"]);
        assert_eq!(queue.stats().await.archived, 2);
    }

    #[tokio::test]
    async fn test_requeue_resets_attempts_and_moves_to_back() {
        let queue = InMemoryExportQueue::new();
        let first = queue.enqueue(new_entry("rss", "a")).await.unwrap();
        let second = queue.enqueue(new_entry("rss", "b")).await.unwrap();

        let mut entry = queue.claim(first).await.unwrap().unwrap();
        entry.status = EntryStatus::DeadLetter;
        entry.attempts = 5;
        queue.release(entry).await.unwrap();
        assert_eq!(queue.dead_letters().await.unwrap().len(), 1);

        let requeued = queue.requeue(first).await.unwrap();
        assert_eq!(requeued.attempts, 0);
        assert_eq!(requeued.status, EntryStatus::Pending);
        assert!(queue.dead_letters().await.unwrap().is_empty());

        let ids: Vec<Uuid> = queue.pending_for("rss").await.unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![second, first]);
        assert!(matches!(queue.requeue(first).await, Err(ExchangeError::NotFound(_))));
    }
}
