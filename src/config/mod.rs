use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Complete hub configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub connectors: ConnectorConfig,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "hub.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Reconciliation loop timing
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerConfig {
    /// Delay between ticks (seconds)
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Minimum time between reconnect attempts for a disconnected tracker (seconds)
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_secs: u64,
}

fn default_interval() -> u64 {
    1
}

fn default_reconnect_backoff() -> u64 {
    10
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            reconnect_backoff_secs: default_reconnect_backoff(),
        }
    }
}

impl ReconcilerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Fails when the value does not fit a `chrono::Duration`.
    pub fn reconnect_backoff(&self) -> Result<chrono::Duration> {
        i64::try_from(self.reconnect_backoff_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                anyhow!(
                    "reconciler.reconnect_backoff_secs is out of range: {}",
                    self.reconnect_backoff_secs
                )
            })
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            bail!("reconciler.interval_secs must be at least 1");
        }
        self.reconnect_backoff()?;
        Ok(())
    }
}

/// Settings shared by all tracker connectors
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
    /// Per-request timeout for calls to external trackers (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ConnectorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            bail!("connectors.request_timeout_secs must be at least 1");
        }
        Ok(())
    }
}

impl HubConfig {
    /// Overrides file values with `HUB_*` environment variables.
    ///
    /// Unparseable values are ignored.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("HUB_DB_PATH") {
            self.database.path = v;
        }
        if let Some(n) = env_u64("HUB_RECONCILE_INTERVAL_SECS") {
            self.reconciler.interval_secs = n;
        }
        if let Some(n) = env_u64("HUB_RECONNECT_BACKOFF_SECS") {
            self.reconciler.reconnect_backoff_secs = n;
        }
        if let Some(n) = env_u64("HUB_CONNECTOR_TIMEOUT_SECS") {
            self.connectors.request_timeout_secs = n;
        }
    }

    /// Rejects timing values the reconciler cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.reconciler.validate()?;
        self.connectors.validate()
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse::<u64>().ok())
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<HubConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: HubConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file {}", path))?;
    Ok(config)
}
