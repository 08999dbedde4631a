//! Retry utilities for fault tolerance
//!
//! Provides exponential backoff for export retries and for transient
//! collaborator failures.

use std::time::Duration;
use tokio::time::sleep;

use crate::module::traits::ExchangeError;

/// Retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            ..Self::default()
        }
    }

    /// Configuration for loading schemes at startup
    pub fn store() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 1.5,
        }
    }

    /// Delay to wait after `failed_attempts` failures (1-based)
    pub fn delay_for_attempt(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 || self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = (failed_attempts - 1).min(32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Check if an error is retryable (transient failure)
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for ExchangeError {
    fn is_retryable(&self) -> bool {
        match self {
            ExchangeError::Import(_)
            | ExchangeError::Export(_)
            | ExchangeError::Template(_)
            | ExchangeError::Timeout(_)
            | ExchangeError::Store(_) => true,
            ExchangeError::Config(_)
            | ExchangeError::NotFound(_)
            | ExchangeError::PermissionDenied { .. } => false,
        }
    }
}

/// Retry only if error is retryable
pub async fn retry_if_retryable<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() || attempt >= config.max_attempts => return Err(e),
            Err(e) => {
                let delay = config.delay_for_attempt(attempt);
                tracing::debug!(
                    "Retryable error (attempt {}/{}): {}. Retrying in {:?}...",
                    attempt,
                    config.max_attempts,
                    e,
                    delay
                );
                sleep(delay).await;
            }
        }
    }
}
