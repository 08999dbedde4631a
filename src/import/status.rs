//! Operator-visible import scheme state

use serde::Serialize;
use uuid::Uuid;

/// Step of an import cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleState {
    Idle,
    Opening,
    Polling,
    Delivering,
    Error,
}

/// Result of one poll cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub scheme: String,
    pub cycle_id: Uuid,
    /// Messages delivered and acknowledged
    pub delivered: usize,
    /// Messages left unread because the directory may not import
    pub denied: usize,
    /// Messages left unread because delivery failed
    pub failed: usize,
    /// `Idle` for a clean cycle, `Error` if open, fetch or close failed
    pub final_state: CycleState,
    pub error: Option<String>,
    /// Message ids that just crossed the stuck threshold
    pub newly_stuck: Vec<String>,
    /// Every message id currently at or over the threshold
    pub stuck: Vec<String>,
    /// Cycle stopped early because of shutdown
    pub interrupted: bool,
}

impl CycleReport {
    pub(crate) fn new(scheme: &str, cycle_id: Uuid) -> Self {
        Self {
            scheme: scheme.to_string(),
            cycle_id,
            delivered: 0,
            denied: 0,
            failed: 0,
            final_state: CycleState::Idle,
            error: None,
            newly_stuck: Vec::new(),
            stuck: Vec::new(),
            interrupted: false,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.final_state == CycleState::Idle
    }
}

/// What a tick did for one scheme
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Completed(CycleReport),
    /// A cycle for the scheme was still running
    Skipped,
    /// The scheme is disabled by a configuration error
    Disabled,
}

/// Status of one import scheme
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemeStatus {
    pub scheme: String,
    pub protocol: String,
    /// Module the scheme is bound to, if it resolved
    pub module_id: Option<String>,
    pub state: CycleState,
    /// Set by a fatal configuration error; cleared by re-activation
    pub disabled: Option<String>,
    /// Unix timestamp of the last cycle start
    pub last_run: Option<u64>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub cycles: u64,
    pub delivered_total: u64,
    /// Messages denied at least `stuck_message_threshold` times in a row
    pub stuck_messages: Vec<String>,
}

impl SchemeStatus {
    pub(crate) fn new(scheme: &str, protocol: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            protocol: protocol.to_string(),
            module_id: None,
            state: CycleState::Idle,
            disabled: None,
            last_run: None,
            last_error: None,
            consecutive_failures: 0,
            cycles: 0,
            delivered_total: 0,
            stuck_messages: Vec::new(),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.is_some()
    }
}
