//! Utility modules for fault tolerance and resilience

pub mod logging;
pub mod retry;
pub mod signal;
pub mod time;
pub mod timeout;

// Re-export commonly used items
pub use logging::{init_logging, init_logging_from_config};
#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use retry::{retry_if_retryable, IsRetryable, RetryConfig};
pub use signal::{is_shutdown, shutdown_requested, wait_for_shutdown_signal, ShutdownController};
pub use time::current_timestamp;
pub use timeout::{bounded, with_custom_timeout, DEFAULT_CALL_TIMEOUT};
