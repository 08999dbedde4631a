//! Explicit per-call context
//!
//! Threaded through every poll, export and render call so that cycles for
//! different schemes never share ambient state.

use uuid::Uuid;

/// Principal used when no scheme-specific principal is configured
pub const SYSTEM_PRINCIPAL: &str = "system";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeContext {
    /// Identity the engine acts as
    pub principal: String,
    /// Scheme the current cycle belongs to
    pub scheme: String,
    /// Unique id of the poll or drain cycle
    pub cycle_id: Uuid,
}

impl ExchangeContext {
    pub fn new(principal: impl Into<String>, scheme: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            scheme: scheme.into(),
            cycle_id: Uuid::new_v4(),
        }
    }

    /// Context acting as the system principal
    pub fn system(scheme: impl Into<String>) -> Self {
        Self::new(SYSTEM_PRINCIPAL, scheme)
    }
}
