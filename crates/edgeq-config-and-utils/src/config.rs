//! Queue configuration.
//!
//! Values come from built-in defaults, then an optional JSON file, then
//! `EDGEQ_*` environment variables. [`Config::validate`] runs last.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default MQTT broker port.
pub const DEFAULT_PORT: u16 = 1883;

/// Main queue configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Broker host name or address.
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// MQTT client identifier. Empty lets the transport pick one.
    pub client_identity: String,
    pub keepalive_seconds: u64,
    /// Store file. Defaults to `<base>/queue.db`.
    pub store_path: Option<PathBuf>,
    /// Records older than this are purged whatever their state. Absent
    /// disables purging.
    pub retention_window_seconds: Option<u64>,
    pub retention_sweep_seconds: u64,
    pub reconnect_min_delay: u64,
    pub reconnect_max_delay: u64,
    /// Fraction of the backoff delay added as random jitter.
    pub reconnect_jitter: f64,
    pub poll_interval_seconds: u64,
    pub ack_timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            client_identity: String::new(),
            keepalive_seconds: 60,
            store_path: None,
            retention_window_seconds: None,
            retention_sweep_seconds: 60,
            reconnect_min_delay: 1,
            reconnect_max_delay: 60,
            reconnect_jitter: 0.1,
            poll_interval_seconds: 5,
            ack_timeout_seconds: 10,
            connect_timeout_seconds: 10,
        }
    }
}

impl Config {
    /// Load configuration and validate it.
    ///
    /// `override_path` must exist when given; otherwise `<base>/config.json`
    /// is read if present.
    pub fn load(paths: &Paths, override_path: Option<&Path>) -> CoreResult<Self> {
        let mut config = match override_path {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let default_path = paths.config_file();
                if default_path.exists() {
                    Self::load_from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file, without env overrides.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Apply `EDGEQ_*` overrides looked up through `lookup`.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> CoreResult<()> {
        if let Some(host) = lookup("EDGEQ_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("EDGEQ_PORT") {
            self.port = parse_env("EDGEQ_PORT", &port)?;
        }
        if let Some(username) = lookup("EDGEQ_USERNAME") {
            self.username = Some(username);
        }
        if let Some(password) = lookup("EDGEQ_PASSWORD") {
            self.password = Some(password);
        }
        if let Some(client_id) = lookup("EDGEQ_CLIENT_ID") {
            self.client_identity = client_id;
        }
        if let Some(store_path) = lookup("EDGEQ_STORE_PATH") {
            self.store_path = Some(PathBuf::from(store_path));
        }
        if let Some(retention) = lookup("EDGEQ_RETENTION_SECONDS") {
            self.retention_window_seconds = Some(parse_env("EDGEQ_RETENTION_SECONDS", &retention)?);
        }
        if let Some(log_level) = lookup("EDGEQ_LOG_LEVEL") {
            self.log_level = log_level;
        }
        Ok(())
    }

    /// Reject configurations the queue cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        let fail = |msg: &str| Err(CoreError::Config(msg.to_string()));

        if self.host.trim().is_empty() {
            return fail("host must not be empty");
        }
        if self.port == 0 {
            return fail("port must be non-zero");
        }
        if self.keepalive_seconds == 0 {
            return fail("keepaliveSeconds must be positive");
        }
        if self.reconnect_min_delay == 0 {
            return fail("reconnectMinDelay must be positive");
        }
        if self.reconnect_max_delay < self.reconnect_min_delay {
            return fail("reconnectMaxDelay must not be below reconnectMinDelay");
        }
        if !(0.0..=1.0).contains(&self.reconnect_jitter) {
            return fail("reconnectJitter must be within [0, 1]");
        }
        if self.poll_interval_seconds == 0 {
            return fail("pollIntervalSeconds must be positive");
        }
        if self.ack_timeout_seconds == 0 {
            return fail("ackTimeoutSeconds must be positive");
        }
        if self.connect_timeout_seconds == 0 {
            return fail("connectTimeoutSeconds must be positive");
        }
        if self.retention_window_seconds == Some(0) {
            return fail("retentionWindowSeconds must be positive when set");
        }
        if self.retention_sweep_seconds == 0 {
            return fail("retentionSweepSeconds must be positive");
        }
        if self.password.is_some() && self.username.is_none() {
            return fail("password given without username");
        }
        Ok(())
    }

    /// Store location, falling back to the default under `paths`.
    pub fn resolved_store_path(&self, paths: &Paths) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| paths.database_file())
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_seconds)
    }

    pub fn reconnect_min(&self) -> Duration {
        Duration::from_secs(self.reconnect_min_delay)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_delay)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn retention_window(&self) -> Option<Duration> {
        self.retention_window_seconds.map(Duration::from_secs)
    }

    pub fn retention_sweep(&self) -> Duration {
        Duration::from_secs(self.retention_sweep_seconds)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> CoreResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| CoreError::Config(format!("{key} has an invalid value: {raw:?}")))
}
