use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_LEASE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_BRIDGE_URL: &str = "http://127.0.0.1:3001";
pub const DEFAULT_COUNTRY_CODE: &str = "91";
pub const DEFAULT_LOCAL_NUMBER_LENGTH: usize = 10;

/// Top-level config (relay.toml + RELAY_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Shared secret for the manual tick trigger (`x-cron-secret` header).
    /// When unset every trigger request is rejected.
    #[serde(default)]
    pub cron_secret: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            cron_secret: None,
        }
    }
}

impl GatewayConfig {
    /// The configured trigger secret, trimmed. Empty values count as unset.
    pub fn trigger_secret(&self) -> Option<&str> {
        self.cron_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Cadence of the scheduler loop.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// An in-progress job older than this is considered abandoned by a crashed worker.
    #[serde(default = "default_lease_timeout")]
    pub lease_timeout_secs: u64,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            lease_timeout_secs: DEFAULT_LEASE_TIMEOUT_SECS,
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// What happens to a job whose dispatch failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Archive as failed on the first error.
    #[default]
    FailFast,
    /// Re-queue with exponential backoff until `max_attempts` dispatches have failed.
    Retry { max_attempts: u32, backoff_secs: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Base URL of the WhatsApp bridge process that hosts the chat session.
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,
    /// Prefixed to numbers that have exactly `local_number_length` digits.
    #[serde(default = "default_country_code")]
    pub default_country_code: String,
    #[serde(default = "default_local_number_length")]
    pub local_number_length: usize,
    #[serde(default = "default_status_poll_ms")]
    pub status_poll_ms: u64,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
    #[serde(default = "bool_true")]
    pub connect_on_start: bool,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            bridge_url: default_bridge_url(),
            default_country_code: default_country_code(),
            local_number_length: DEFAULT_LOCAL_NUMBER_LENGTH,
            status_poll_ms: default_status_poll_ms(),
            send_timeout_secs: default_send_timeout(),
            connect_on_start: true,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_tick_interval() -> u64 {
    DEFAULT_TICK_INTERVAL_SECS
}
fn default_lease_timeout() -> u64 {
    DEFAULT_LEASE_TIMEOUT_SECS
}
fn default_bridge_url() -> String {
    DEFAULT_BRIDGE_URL.to_string()
}
fn default_country_code() -> String {
    DEFAULT_COUNTRY_CODE.to_string()
}
fn default_local_number_length() -> usize {
    DEFAULT_LOCAL_NUMBER_LENGTH
}
fn default_status_poll_ms() -> u64 {
    2_000
}
fn default_send_timeout() -> u64 {
    60
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.relay/relay.db", home)
}

impl RelayConfig {
    /// Load config from a TOML file with RELAY_* env var overrides.
    ///
    /// Nested keys use a double underscore: `RELAY_GATEWAY__CRON_SECRET`.
    /// A missing file is not an error; every section has defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::extract(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("RELAY_").split("__")),
        )
    }

    /// Extract from an already-assembled figment.
    pub fn extract(figment: Figment) -> crate::error::Result<Self> {
        figment
            .extract()
            .map_err(|e| crate::error::RelayError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.relay/relay.toml", home)
}
