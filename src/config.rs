//! Shard manager configuration module
//!
//! Settings are layered: built-in defaults, then an optional
//! `shard-manager.{toml,json,yaml}` file in the working directory, then
//! `SHARD_MANAGER_*` environment variables (after `.env` is loaded).
//!
//! The control plane is plaintext, unauthenticated TCP. Bind it to a private
//! network only; the default is loopback.

use crate::controller::ControllerSettings;
use crate::error::ManagerError;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Controller process configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    /// Control listener host
    #[serde(default = "default_host")]
    pub host: String,

    /// Control listener port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Discord max_concurrency; looked up with the bot token when unset
    #[serde(default)]
    pub max_concurrency: Option<u32>,

    /// Health/metrics HTTP port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,

    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    /// IDENTIFY window width; Discord's is 5000ms
    #[serde(default = "default_rate_window_ms")]
    pub rate_window_ms: u64,

    #[serde(default = "default_resend_delay_ms")]
    pub resend_delay_ms: u64,

    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
}

/// Per-bot-process gate configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    /// Whether identifies go through the shard manager at all
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// How long to wait for CONNECT_READY before asking again
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Pause before reconnecting when the controller is unreachable
    #[serde(default = "default_connect_backoff_secs")]
    pub connect_backoff_secs: u64,

    /// Give up after this many unanswered requests (unbounded when unset)
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8888
}

fn default_http_port() -> u16 {
    9090
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_dispatch_interval_ms() -> u64 {
    100
}

fn default_keepalive_interval_secs() -> u64 {
    15
}

fn default_rate_window_ms() -> u64 {
    5500
}

fn default_resend_delay_ms() -> u64 {
    1000
}

fn default_write_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_backoff_secs() -> u64 {
    10
}

impl ManagerConfig {
    /// Load configuration from the optional file and environment variables
    pub fn from_env() -> Result<Self, ManagerError> {
        dotenvy::dotenv().ok();

        let config: Self = Config::builder()
            .add_source(File::with_name("shard-manager").required(false))
            .add_source(Environment::with_prefix("SHARD_MANAGER").try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ManagerError> {
        if self.max_concurrency == Some(0) {
            return Err(ManagerError::Config(
                "SHARD_MANAGER_MAX_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if self.dispatch_interval_ms == 0 || self.keepalive_interval_secs == 0 {
            return Err(ManagerError::Config(
                "dispatch and keepalive intervals must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Control listener address
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Discord bot token, required only to look up max_concurrency
    pub fn discord_token() -> Result<String, ManagerError> {
        env::var("DISCORD_TOKEN")
            .or_else(|_| env::var("DISCORD_BOT_TOKEN"))
            .map_err(|_| {
                ManagerError::Config(
                    "DISCORD_TOKEN or DISCORD_BOT_TOKEN must be set when SHARD_MANAGER_MAX_CONCURRENCY is not"
                        .to_string(),
                )
            })
    }

    /// Controller settings for a resolved max_concurrency
    pub fn controller_settings(&self, max_concurrency: u32) -> ControllerSettings {
        ControllerSettings {
            max_concurrency: max_concurrency.max(1) as usize,
            dispatch_interval: Duration::from_millis(self.dispatch_interval_ms),
            keepalive_interval: Duration::from_secs(self.keepalive_interval_secs),
            rate_window: Duration::from_millis(self.rate_window_ms),
            resend_delay: Duration::from_millis(self.resend_delay_ms),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
        }
    }
}

impl GateConfig {
    /// Load gate configuration from `SHARD_MANAGER_GATE_*` variables
    pub fn from_env() -> Result<Self, ManagerError> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(Environment::with_prefix("SHARD_MANAGER_GATE").try_parsing(true))
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_secs(self.connect_backoff_secs)
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_backoff_secs: default_connect_backoff_secs(),
            max_attempts: None,
        }
    }
}
