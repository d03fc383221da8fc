//! # Observability
//!
//! Logging setup for the EdgeQ binaries.
//!
//! Components are **log producers** only. They use the standard `tracing`
//! macros and never decide where output goes. The binary calls
//! [`init_with_config`] once at startup:
//!
//! - compact, human-readable lines on stderr
//! - optionally, structured JSONL appended to a file (one object per line),
//!   suitable for `tail -f queue.jsonl | jq` on a device
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "edgeq".into(),
//!     default_level: "debug".into(),
//!     log_path: Some("/var/log/edgeq/edgeq.jsonl".into()),
//!     ..Default::default()
//! });
//! ```

mod file;
mod json_layer;

use std::path::PathBuf;

pub use json_layer::LogEntry;

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every JSONL line.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional JSONL log file.
    pub log_path: Option<PathBuf>,

    /// Emit compact logs to stderr. With no `log_path` and this off, nothing
    /// is installed and events are dropped.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "edgeq".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: true,
        }
    }
}

/// Initialize logging with default settings and the given service name.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// Calling this more than once is harmless: the first installed subscriber wins.
pub fn init_with_config(config: LogConfig) {
    match Output::for_config(&config) {
        Output::File => file::init_file_subscriber(&config),
        Output::Stderr => {
            use tracing_subscriber::util::SubscriberInitExt;
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter(&config.default_level))
                .with_target(true)
                .with_writer(std::io::stderr)
                .compact()
                .finish()
                .try_init();
        }
        Output::Silent => {}
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Output {
    /// JSONL file, plus stderr when `also_stderr` is set.
    File,
    Stderr,
    Silent,
}

impl Output {
    fn for_config(config: &LogConfig) -> Self {
        if config.log_path.is_some() {
            Self::File
        } else if config.also_stderr {
            Self::Stderr
        } else {
            Self::Silent
        }
    }
}

/// Build the level filter from `RUST_LOG`, falling back to `default_level`.
pub(crate) fn env_filter(default_level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level))
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "edgeq");
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(config.also_stderr);
    }

    #[test]
    fn test_output_follows_config() {
        let stderr = LogConfig::default();
        assert_eq!(Output::for_config(&stderr), Output::Stderr);

        let silent = LogConfig {
            also_stderr: false,
            ..LogConfig::default()
        };
        assert_eq!(Output::for_config(&silent), Output::Silent);

        let file = LogConfig {
            log_path: Some("edgeq.jsonl".into()),
            also_stderr: false,
            ..LogConfig::default()
        };
        assert_eq!(Output::for_config(&file), Output::File);
    }
}
