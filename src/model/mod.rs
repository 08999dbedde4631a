//! Shared data model for the exchange engine
//!
//! Plain data types passed between the registry, the scheduler, the export
//! queue and the external collaborators.

pub mod context;
pub mod message;
pub mod queue;
pub mod scheme;

pub use context::ExchangeContext;
pub use message::{MessageHeader, MessagePayload};
pub use queue::{EntryStatus, ExportQueueEntry, NewExportEntry};
pub use scheme::{ModuleRegistration, ModuleType, Scheme};
