//! Configuration management for the exchange engine
//!
//! Handles configuration loading (TOML or JSON) and validation. Keys are
//! snake_case; the camelCase names used by the admin surface
//! (`threadPoolSize`, `queuePeriod`, ...) are accepted as aliases.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::permission::PermissionCacheConfig;
use crate::template::MissingVariablePolicy;
use crate::utils::RetryConfig;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Maximum import cycles running at once
    #[serde(default = "default_thread_pool_size", alias = "threadPoolSize")]
    pub thread_pool_size: usize,

    /// Seconds between import ticks (schemes may override with `poll_interval`)
    #[serde(default = "default_import_period", alias = "importPeriod")]
    pub import_period: u64,

    /// Seconds between export queue drains
    #[serde(default = "default_queue_period", alias = "queuePeriod")]
    pub queue_period: u64,

    /// Cache permission answers
    #[serde(default = "default_true", alias = "enablePermissionCaching")]
    pub enable_permission_caching: bool,

    /// Seconds a cached permission answer stays valid
    #[serde(default = "default_permission_cache_expiry", alias = "permissionCacheExpiry")]
    pub permission_cache_expiry: u64,

    /// Export attempts before an entry is dead-lettered
    #[serde(default = "default_max_retries", alias = "maxRetries")]
    pub max_retries: u32,

    /// Permission denials of one message before it is reported stuck (0 = off)
    #[serde(default = "default_stuck_message_threshold", alias = "stuckMessageThreshold")]
    pub stuck_message_threshold: u32,

    /// Exported entries kept for traceability
    #[serde(default = "default_archive_limit", alias = "archiveLimit")]
    pub archive_limit: usize,

    /// How templates treat unresolvable variables
    #[serde(default, alias = "missingVariable")]
    pub missing_variable: MissingVariablePolicy,

    /// Principal the engine acts as
    #[serde(default = "default_principal")]
    pub principal: String,

    /// Export retry backoff
    #[serde(default)]
    pub retry: RetryPolicyConfig,

    /// Per-call timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

fn default_true() -> bool {
    true
}

fn default_thread_pool_size() -> usize {
    4
}

fn default_import_period() -> u64 {
    60
}

fn default_queue_period() -> u64 {
    30
}

fn default_permission_cache_expiry() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    5
}

fn default_stuck_message_threshold() -> u32 {
    10
}

fn default_archive_limit() -> usize {
    1000
}

fn default_principal() -> String {
    crate::model::context::SYSTEM_PRINCIPAL.to_string()
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: default_thread_pool_size(),
            import_period: default_import_period(),
            queue_period: default_queue_period(),
            enable_permission_caching: true,
            permission_cache_expiry: default_permission_cache_expiry(),
            max_retries: default_max_retries(),
            stuck_message_threshold: default_stuck_message_threshold(),
            archive_limit: default_archive_limit(),
            missing_variable: MissingVariablePolicy::default(),
            principal: default_principal(),
            retry: RetryPolicyConfig::default(),
            timeouts: TimeoutConfig::default(),
            logging: None,
        }
    }
}

/// Export retry backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    /// Delay after the first failure (ms); 0 retries on the next drain
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Backoff ceiling (ms)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    300_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// Per-call timeouts (seconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_call_timeout")]
    pub open_seconds: u64,
    #[serde(default = "default_call_timeout")]
    pub fetch_seconds: u64,
    #[serde(default = "default_call_timeout")]
    pub deliver_seconds: u64,
    #[serde(default = "default_render_timeout")]
    pub render_seconds: u64,
    #[serde(default = "default_call_timeout")]
    pub export_seconds: u64,
    #[serde(default = "default_call_timeout")]
    pub permission_seconds: u64,
    #[serde(default = "default_call_timeout")]
    pub close_seconds: u64,
}

fn default_call_timeout() -> u64 {
    30
}

fn default_render_timeout() -> u64 {
    5
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            open_seconds: default_call_timeout(),
            fetch_seconds: default_call_timeout(),
            deliver_seconds: default_call_timeout(),
            render_seconds: default_render_timeout(),
            export_seconds: default_call_timeout(),
            permission_seconds: default_call_timeout(),
            close_seconds: default_call_timeout(),
        }
    }
}

impl TimeoutConfig {
    /// Same limit for every call, handy in tests
    pub fn uniform(seconds: u64) -> Self {
        Self {
            open_seconds: seconds,
            fetch_seconds: seconds,
            deliver_seconds: seconds,
            render_seconds: seconds,
            export_seconds: seconds,
            permission_seconds: seconds,
            close_seconds: seconds,
        }
    }

    pub fn open(&self) -> Duration {
        Duration::from_secs(self.open_seconds)
    }

    pub fn fetch(&self) -> Duration {
        Duration::from_secs(self.fetch_seconds)
    }

    pub fn deliver(&self) -> Duration {
        Duration::from_secs(self.deliver_seconds)
    }

    pub fn render(&self) -> Duration {
        Duration::from_secs(self.render_seconds)
    }

    pub fn export(&self) -> Duration {
        Duration::from_secs(self.export_seconds)
    }

    pub fn permission(&self) -> Duration {
        Duration::from_secs(self.permission_seconds)
    }

    pub fn close(&self) -> Duration {
        Duration::from_secs(self.close_seconds)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter such as `"info"` or `"iox_engine::export=debug"`
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON lines (requires the `json-logging` feature)
    #[serde(default)]
    pub json_format: bool,
}

impl ExchangeConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: ExchangeConfig =
            toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: ExchangeConfig = serde_json::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, picking the format by extension (`.json` or TOML)
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_file(path),
            _ => Self::from_toml_file(path),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.thread_pool_size == 0 {
            return Err(anyhow::anyhow!("thread_pool_size must be greater than 0"));
        }
        if self.import_period == 0 {
            return Err(anyhow::anyhow!("import_period must be greater than 0"));
        }
        if self.queue_period == 0 {
            return Err(anyhow::anyhow!("queue_period must be greater than 0"));
        }
        if self.max_retries == 0 {
            return Err(anyhow::anyhow!(
                "max_retries must be at least 1 (the first attempt counts)"
            ));
        }
        if self.enable_permission_caching && self.permission_cache_expiry == 0 {
            return Err(anyhow::anyhow!(
                "permission_cache_expiry must be greater than 0 when caching is enabled"
            ));
        }
        if !(self.retry.backoff_multiplier >= 1.0) {
            return Err(anyhow::anyhow!("retry.backoff_multiplier must be at least 1.0"));
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err(anyhow::anyhow!(
                "retry.max_delay_ms must not be below retry.initial_delay_ms"
            ));
        }
        let t = &self.timeouts;
        for (name, seconds) in [
            ("open_seconds", t.open_seconds),
            ("fetch_seconds", t.fetch_seconds),
            ("deliver_seconds", t.deliver_seconds),
            ("render_seconds", t.render_seconds),
            ("export_seconds", t.export_seconds),
            ("permission_seconds", t.permission_seconds),
            ("close_seconds", t.close_seconds),
        ] {
            if seconds == 0 {
                return Err(anyhow::anyhow!("timeouts.{} must be greater than 0", name));
            }
        }
        Ok(())
    }

    pub fn import_period(&self) -> Duration {
        Duration::from_secs(self.import_period)
    }

    pub fn queue_period(&self) -> Duration {
        Duration::from_secs(self.queue_period)
    }

    /// Export retry policy
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retries,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            backoff_multiplier: self.retry.backoff_multiplier,
        }
    }

    pub fn permission_cache_config(&self) -> PermissionCacheConfig {
        PermissionCacheConfig {
            enabled: self.enable_permission_caching,
            expiry: Duration::from_secs(self.permission_cache_expiry),
            resolve_timeout: self.timeouts.permission(),
        }
    }
}
