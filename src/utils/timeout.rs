//! Timeout utilities for fault tolerance
//!
//! Every call into an external system (opening a source, fetching unread
//! messages, delivering, rendering, exporting, resolving permissions) is
//! individually bounded so one slow system cannot stall a whole cycle.
//!
//! Per-call limits come from `crate::config::TimeoutConfig`:
//!
//! ```rust,ignore
//! let limit = config.timeouts.export();
//! bounded(limit, "export", exporter.export(&ctx, &message)).await
//! ```

use std::time::Duration;
use tokio::time::timeout;

use crate::module::traits::ExchangeError;

/// Default bound for a single external call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Execute operation with custom timeout
pub async fn with_custom_timeout<F, T>(
    operation: F,
    duration: Duration,
) -> Result<T, tokio::time::error::Elapsed>
where
    F: std::future::Future<Output = T>,
{
    timeout(duration, operation).await
}

/// Execute a fallible operation with a timeout, mapping expiry to
/// `ExchangeError::Timeout(label)`
pub async fn bounded<F, T>(duration: Duration, label: &str, operation: F) -> Result<T, ExchangeError>
where
    F: std::future::Future<Output = Result<T, ExchangeError>>,
{
    match timeout(duration, operation).await {
        Ok(result) => result,
        Err(_) => Err(ExchangeError::Timeout(format!("{} (limit {:?})", label, duration))),
    }
}
