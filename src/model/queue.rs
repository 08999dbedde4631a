//! Export queue entries

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use super::message::MessagePayload;

/// Lifecycle state of an export queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    /// Waiting to be exported
    Pending,
    /// Claimed by a processor
    InFlight,
    /// Exported, external id recorded
    Done,
    /// Terminal failure, needs operator attention
    DeadLetter,
}

/// Data supplied when routing a message into the export queue
#[derive(Debug, Clone)]
pub struct NewExportEntry {
    pub directory: String,
    pub protocol: String,
    pub scheme_name: String,
    pub transaction_id: String,
    pub payload: MessagePayload,
}

/// An outgoing message waiting for (or done with) export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportQueueEntry {
    pub id: Uuid,
    /// Monotonic enqueue order, FIFO key within a protocol
    pub sequence: u64,
    pub directory: String,
    pub protocol: String,
    pub scheme_name: String,
    pub transaction_id: String,
    pub payload: MessagePayload,
    /// Unix timestamp (seconds)
    pub enqueued_at: u64,
    pub attempts: u32,
    pub status: EntryStatus,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Id assigned by the external system on success
    #[serde(default)]
    pub external_id: Option<String>,
    /// Earliest time the next attempt may run
    #[serde(skip)]
    pub not_before: Option<Instant>,
}

impl ExportQueueEntry {
    pub fn from_new(entry: NewExportEntry, sequence: u64, enqueued_at: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence,
            directory: entry.directory,
            protocol: entry.protocol,
            scheme_name: entry.scheme_name,
            transaction_id: entry.transaction_id,
            payload: entry.payload,
            enqueued_at,
            attempts: 0,
            status: EntryStatus::Pending,
            last_error: None,
            external_id: None,
            not_before: None,
        }
    }

    /// Whether the backoff window (if any) has passed
    pub fn is_due(&self, now: Instant) -> bool {
        self.not_before.map_or(true, |t| t <= now)
    }
}
