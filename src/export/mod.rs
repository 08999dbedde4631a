//! Outgoing message queue and its periodic processor

pub mod processor;
pub mod queue;

pub use processor::{DrainReport, ExportQueueProcessor};
pub use queue::{ExportQueueStore, InMemoryExportQueue, QueueStats, DEFAULT_ARCHIVE_LIMIT};
