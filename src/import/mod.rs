//! Import scheduling
//!
//! One poll cycle per active import scheme, never two at once for the same
//! scheme.

pub mod scheduler;
pub mod status;

pub use scheduler::{ImportScheduler, SchedulerSettings, POLL_INTERVAL_KEY};
pub use status::{CycleReport, CycleState, SchemeStatus, TickOutcome};
