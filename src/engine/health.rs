//! Engine status board
//!
//! Summarizes scheme states, the export queue and the permission cache for
//! operators.

use serde::Serialize;

use crate::import::SchemeStatus;
use crate::utils::current_timestamp;

/// Overall engine health
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum HealthStatus {
    /// Every scheme active, nothing dead-lettered
    Healthy,
    /// Working, but something needs operator attention
    Degraded,
}

/// Permission cache counters
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CacheSummary {
    pub enabled: bool,
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

/// Snapshot of the engine
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub overall_status: HealthStatus,
    /// Import schemes, disabled ones included
    pub import_schemes: Vec<SchemeStatus>,
    pub export_pending_protocols: Vec<String>,
    pub dead_letters: usize,
    pub archived: usize,
    pub permission_cache: CacheSummary,
    /// Unix timestamp of the snapshot
    pub timestamp: u64,
    pub uptime_seconds: u64,
}

impl EngineStatus {
    pub(crate) fn new(
        import_schemes: Vec<SchemeStatus>,
        export_pending_protocols: Vec<String>,
        dead_letters: usize,
        archived: usize,
        permission_cache: CacheSummary,
        uptime_seconds: u64,
    ) -> Self {
        let attention = dead_letters > 0
            || import_schemes
                .iter()
                .any(|s| s.is_disabled() || s.consecutive_failures > 0 || !s.stuck_messages.is_empty());

        Self {
            overall_status: if attention {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            },
            import_schemes,
            export_pending_protocols,
            dead_letters,
            archived,
            permission_cache,
            timestamp: current_timestamp(),
            uptime_seconds,
        }
    }

    /// Names of disabled import schemes with the reason
    pub fn disabled_schemes(&self) -> Vec<(&str, &str)> {
        self.import_schemes
            .iter()
            .filter_map(|s| s.disabled.as_deref().map(|reason| (s.scheme.as_str(), reason)))
            .collect()
    }
}
